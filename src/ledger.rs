// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Ledger store.
//!
//! The [`Ledger`] applies transfers between two account handles and keeps an
//! append-only transaction history per account. Histories are ordered by the
//! order in which transfers complete.
//!
//! A transfer either commits both legs or nothing: the withdrawal and the
//! deposit are computed first, and the history is only appended once both
//! succeeded. A failed deposit discards the computed withdrawal.
//!
//! [`Ledger`] works on any [`BankAccount`]; [`SharedLedger`] and the
//! [`BankService`] port are fixed to [`Account`].
//!
//! # Thread Safety
//!
//! [`Ledger`] itself is single-threaded (`&mut self` for mutations).
//! [`SharedLedger`] wraps it in one [`Mutex`] so that at most one transfer
//! or statement read is in flight at any time.

use crate::account::{Account, BankAccount};
use crate::base::AccountId;
use crate::error::TransferError;
use crate::transaction::Transaction;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::debug;

/// Outcome of a transfer: the post-transfer `(from, to)` accounts.
pub type TransferResult = Result<(Account, Account), TransferError>;

/// The banking operations the transfer pipeline and the engine depend on.
///
/// Absent handles (`None`) are accepted so that implementations can report
/// [`TransferError::InvalidAccount`] themselves.
pub trait BankService: Send + Sync {
    fn transfer(
        &self,
        from: Option<&Account>,
        to: Option<&Account>,
        amount: Decimal,
        reference: &str,
    ) -> TransferResult;

    fn statement(&self, account: Option<&Account>) -> Result<Vec<Transaction>, TransferError>;
}

/// In-memory transaction history keyed by account id.
#[derive(Debug, Default)]
pub struct Ledger {
    transactions: HashMap<AccountId, Vec<Transaction>>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves `amount` from `from` to `to` and records the transaction for both.
    ///
    /// # Errors
    ///
    /// - [`TransferError::InvalidAccount`] - either handle is absent.
    /// - [`TransferError::SelfTransferDisallowed`] - both handles share an id.
    /// - [`TransferError::WithdrawalFailed`] - negative amount or insufficient funds.
    /// - [`TransferError::DepositFailed`] - the destination rejected the amount.
    ///
    /// Nothing is recorded on error.
    pub fn transfer<A: BankAccount>(
        &mut self,
        from: Option<&A>,
        to: Option<&A>,
        amount: Decimal,
        reference: &str,
    ) -> Result<(A, A), TransferError> {
        let (Some(from), Some(to)) = (from, to) else {
            return Err(TransferError::InvalidAccount);
        };
        if from.id() == to.id() {
            return Err(TransferError::SelfTransferDisallowed);
        }

        let new_from = from
            .withdraw(amount)
            .map_err(TransferError::WithdrawalFailed)?;
        let new_to = to.deposit(amount).map_err(TransferError::DepositFailed)?;

        let transaction = Transaction::new(
            Transaction::derive_id(from.id(), to.id(), amount, reference),
            from.id().clone(),
            to.id().clone(),
            amount,
            reference,
        );
        debug!(id = %transaction.id(), from = %from.id(), to = %to.id(), %amount, "transaction recorded");

        self.record(from.id(), transaction.clone());
        self.record(to.id(), transaction);

        Ok((new_from, new_to))
    }

    /// Returns the transactions recorded for `account`, oldest first.
    ///
    /// Accounts that never took part in a transfer have an empty statement.
    ///
    /// # Errors
    ///
    /// [`TransferError::InvalidAccount`] if the handle is absent.
    pub fn statement<A: BankAccount>(
        &self,
        account: Option<&A>,
    ) -> Result<Vec<Transaction>, TransferError> {
        let account = account.ok_or(TransferError::InvalidAccount)?;
        Ok(self
            .transactions
            .get(account.id())
            .cloned()
            .unwrap_or_default())
    }

    fn record(&mut self, account_id: &AccountId, transaction: Transaction) {
        self.transactions
            .entry(account_id.clone())
            .or_default()
            .push(transaction);
    }
}

/// A [`Ledger`] behind a single mutex, shareable between worker threads.
#[derive(Debug, Default)]
pub struct SharedLedger {
    inner: Mutex<Ledger>,
}

impl SharedLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BankService for SharedLedger {
    fn transfer(
        &self,
        from: Option<&Account>,
        to: Option<&Account>,
        amount: Decimal,
        reference: &str,
    ) -> TransferResult {
        self.inner.lock().transfer(from, to, amount, reference)
    }

    fn statement(&self, account: Option<&Account>) -> Result<Vec<Transaction>, TransferError> {
        self.inner.lock().statement(account)
    }
}
