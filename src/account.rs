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

//! Account values.
//!
//! An [`Account`] is an immutable handle: withdrawing or depositing never
//! changes the receiver, it returns a new value carrying the new balance.
//! Callers must always continue with the returned value.
//!
//! # Example
//!
//! ```
//! use rust_decimal_macros::dec;
//! use transfer_ledger::Account;
//!
//! let account = Account::new("A", dec!(100));
//! let after = account.withdraw(dec!(30)).unwrap();
//! assert_eq!(account.balance(), dec!(100));
//! assert_eq!(after.balance(), dec!(70));
//! ```

use crate::base::AccountId;
use crate::error::{AccountError, AccountOp};
use rust_decimal::Decimal;
use std::fmt;

/// Immutable account handle: identifier plus balance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    balance: Decimal,
}

impl Account {
    pub fn new(id: impl Into<AccountId>, balance: Decimal) -> Self {
        Self {
            id: id.into(),
            balance,
        }
    }

    pub fn id(&self) -> &AccountId {
        &self.id
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    /// Returns a new account with `amount` taken out.
    ///
    /// # Errors
    ///
    /// - [`AccountError::NegativeAmount`] if `amount` is below zero.
    /// - [`AccountError::InsufficientFunds`] if `amount` exceeds the balance.
    pub fn withdraw(&self, amount: Decimal) -> Result<Account, AccountError> {
        if amount < Decimal::ZERO {
            return Err(AccountError::NegativeAmount(AccountOp::Withdraw));
        }
        if amount > self.balance {
            return Err(AccountError::InsufficientFunds);
        }
        Ok(Account::new(self.id.clone(), self.balance - amount))
    }

    /// Returns a new account with `amount` added.
    ///
    /// # Errors
    ///
    /// [`AccountError::NegativeAmount`] if `amount` is below zero.
    pub fn deposit(&self, amount: Decimal) -> Result<Account, AccountError> {
        if amount < Decimal::ZERO {
            return Err(AccountError::NegativeAmount(AccountOp::Deposit));
        }
        Ok(Account::new(self.id.clone(), self.balance + amount))
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Account ID: {}, Balance: {:.2}",
            self.id,
            self.balance.round_dp(2)
        )
    }
}

/// What every account flavor offers: an id, a balance and value-returning
/// withdraw and deposit.
pub trait BankAccount: Sized {
    fn id(&self) -> &AccountId;
    fn balance(&self) -> Decimal;
    fn withdraw(&self, amount: Decimal) -> Result<Self, AccountError>;
    fn deposit(&self, amount: Decimal) -> Result<Self, AccountError>;
}

impl BankAccount for Account {
    fn id(&self) -> &AccountId {
        Account::id(self)
    }

    fn balance(&self) -> Decimal {
        Account::balance(self)
    }

    fn withdraw(&self, amount: Decimal) -> Result<Self, AccountError> {
        Account::withdraw(self, amount)
    }

    fn deposit(&self, amount: Decimal) -> Result<Self, AccountError> {
        Account::deposit(self, amount)
    }
}

/// Account wrapper that counts successful withdrawals and deposits.
///
/// Delegates to the wrapped [`Account`]; like the account itself, every
/// operation returns a new wrapper. Failed operations keep the count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountWithCounter {
    inner: Account,
    count: usize,
}

impl AccountWithCounter {
    pub fn new(inner: Account) -> Self {
        Self { inner, count: 0 }
    }

    pub fn account(&self) -> &Account {
        &self.inner
    }

    pub fn id(&self) -> &AccountId {
        self.inner.id()
    }

    pub fn balance(&self) -> Decimal {
        self.inner.balance()
    }

    /// Number of successful operations applied through this wrapper chain.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn withdraw(&self, amount: Decimal) -> Result<AccountWithCounter, AccountError> {
        let inner = self.inner.withdraw(amount)?;
        Ok(Self {
            inner,
            count: self.count + 1,
        })
    }

    pub fn deposit(&self, amount: Decimal) -> Result<AccountWithCounter, AccountError> {
        let inner = self.inner.deposit(amount)?;
        Ok(Self {
            inner,
            count: self.count + 1,
        })
    }

    pub fn into_inner(self) -> Account {
        self.inner
    }
}

impl BankAccount for AccountWithCounter {
    fn id(&self) -> &AccountId {
        AccountWithCounter::id(self)
    }

    fn balance(&self) -> Decimal {
        AccountWithCounter::balance(self)
    }

    fn withdraw(&self, amount: Decimal) -> Result<Self, AccountError> {
        AccountWithCounter::withdraw(self, amount)
    }

    fn deposit(&self, amount: Decimal) -> Result<Self, AccountError> {
        AccountWithCounter::deposit(self, amount)
    }
}

impl From<Account> for AccountWithCounter {
    fn from(inner: Account) -> Self {
        Self::new(inner)
    }
}
