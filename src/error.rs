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

//! Error types, one enum per layer.
//!
//! - [`AccountError`]: account primitives (withdraw, deposit).
//! - [`TransferError`]: ledger and pipeline failures, delivered per job.
//! - [`ProcessorError`]: job submission and processor lifecycle.
//! - [`RegistryError`]: account lookup and registration.
//! - [`EngineError`]: the public string-based engine contract.

use crate::base::AccountId;
use rust_decimal::Decimal;
use std::fmt;
use thiserror::Error;

/// The account primitive that rejected an amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountOp {
    Withdraw,
    Deposit,
}

impl fmt::Display for AccountOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Withdraw => f.write_str("withdraw"),
            Self::Deposit => f.write_str("deposit"),
        }
    }
}

/// Account primitive errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AccountError {
    /// Withdraw or deposit called with a negative amount
    #[error("amount must be >= 0: cannot {0}")]
    NegativeAmount(AccountOp),

    /// Withdrawal would exceed the balance
    #[error("insufficient funds")]
    InsufficientFunds,
}

/// Transfer errors produced by the ledger, the pipeline and the job processor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The ledger was handed an absent account handle
    #[error("invalid account")]
    InvalidAccount,

    /// The validation decorator was handed an absent account handle
    #[error("invalid account: from and to accounts must be present")]
    NilAccount,

    /// Source and destination share the same identifier
    #[error("cannot transfer to self")]
    SelfTransferDisallowed,

    /// Transfer amount is below zero
    #[error("amount must be >= 0")]
    NegativeAmount,

    /// The source account rejected the withdrawal leg
    #[error("from account: withdrawal failed: {0}")]
    WithdrawalFailed(#[source] AccountError),

    /// The destination account rejected the deposit leg
    #[error("to account: deposit failed: {0}")]
    DepositFailed(#[source] AccountError),

    /// The job deadline elapsed before the transfer reported back.
    /// The transfer may still have been applied.
    #[error("transfer timed out, outcome unknown")]
    Timeout,

    /// The processor was cancelled while the job was in flight
    #[error("transfer cancelled")]
    Cancelled,

    /// The transfer function panicked
    #[error("transfer panicked: {0}")]
    Panicked(String),
}

impl TransferError {
    /// Returns `true` when the transfer failed for lack of funds on the source account.
    pub fn is_insufficient_funds(&self) -> bool {
        matches!(self, Self::WithdrawalFailed(AccountError::InsufficientFunds))
    }
}

/// Job processor errors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorError {
    /// The processor has been stopped and accepts no more jobs
    #[error("processor stopped")]
    Stopped,

    /// The bounded job queue has no free slot
    #[error("job queue full")]
    QueueFull,

    /// `start` was called on a running processor
    #[error("processor already started")]
    AlreadyStarted,
}

impl ProcessorError {
    /// Transient errors are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QueueFull)
    }
}

/// Account registry errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown account: {0}")]
    UnknownAccount(AccountId),

    #[error("account already exists: {0}")]
    DuplicateAccount(AccountId),
}

/// Which side of a transfer an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    From,
    To,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::From => f.write_str("from"),
            Self::To => f.write_str("to"),
        }
    }
}

/// Errors surfaced by the [`Engine`](crate::Engine) public API.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// One of the transfer ids is not registered
    #[error("{side}: unknown account: {id}")]
    UnknownAccount { side: Side, id: AccountId },

    /// Statement requested for an id that is not registered
    #[error("unknown account: {0}")]
    AccountNotFound(AccountId),

    /// Source and destination ids are equal
    #[error("cannot transfer to self")]
    SelfTransferDisallowed,

    /// Amount is zero or negative
    #[error("invalid amount: {0} (must be positive)")]
    InvalidAmount(Decimal),

    /// Account creation for an id that is already registered
    #[error("account already exists: {0}")]
    DuplicateAccount(AccountId),

    /// The processor refused the job after all retries
    #[error("submit: {0}")]
    Submit(#[from] ProcessorError),

    /// Statement lookup failed in the ledger
    #[error("statement: {0}")]
    Statement(#[from] TransferError),
}

impl EngineError {
    /// Returns `true` for lookups of ids the registry does not know.
    pub fn is_unknown_account(&self) -> bool {
        matches!(self, Self::UnknownAccount { .. } | Self::AccountNotFound(_))
    }
}

impl From<RegistryError> for EngineError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::UnknownAccount(id) => Self::AccountNotFound(id),
            RegistryError::DuplicateAccount(id) => Self::DuplicateAccount(id),
        }
    }
}
