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

//! # Transfer Ledger
//!
//! An in-memory ledger that moves money between accounts through a
//! concurrent job processor.
//!
//! ## Core Components
//!
//! - [`Account`]: Immutable account value; withdraw and deposit return new values
//! - [`Ledger`] / [`SharedLedger`]: Per-account transaction history and the atomic transfer
//! - [`pipeline`]: Validation, audit and logging decorators around a transfer
//! - [`Processor`]: Fixed worker pool draining a bounded job queue
//! - [`AccountRegistry`]: Concurrent map from account id to account
//! - [`Engine`]: String-based front door tying the above together
//! - [`http`]: REST API over the engine
//!
//! ## Example
//!
//! ```
//! use std::time::Duration;
//! use crossbeam::channel;
//! use rust_decimal_macros::dec;
//! use transfer_ledger::{Account, Engine, EngineConfig};
//!
//! let engine = Engine::with_config(EngineConfig::default()).unwrap();
//! engine.register_account(Account::new("A", dec!(1000)));
//! engine.register_account(Account::new("B", dec!(500)));
//!
//! let (done_tx, done_rx) = channel::bounded(1);
//! engine.on_complete(move |outcome| {
//!     let _ = done_tx.send(outcome.result.clone());
//! });
//!
//! engine.submit_transfer("A", "B", dec!(200), "rent").unwrap();
//! assert_eq!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap(), Ok(()));
//!
//! let statement = engine.statement("B").unwrap();
//! assert_eq!(statement[0].amount(), dec!(200));
//! engine.shutdown();
//! ```
//!
//! ## Thread Safety
//!
//! The ledger serializes every mutation behind one mutex. The registry and the
//! audit log are safe to read while transfers run, and a completion callback
//! runs on its own observer thread.

pub mod account;
pub mod audit;
mod base;
pub mod cancel;
pub mod engine;
pub mod error;
pub mod http;
pub mod ledger;
pub mod pipeline;
pub mod processor;
pub mod registry;
mod transaction;

pub use account::{Account, AccountWithCounter, BankAccount};
pub use audit::{AuditLog, AuditRecord};
pub use base::{AccountId, JobId, TransactionId};
pub use cancel::{CancelSource, CancelToken};
pub use engine::{CompletionCallback, Engine, EngineConfig};
pub use error::{
    AccountError, AccountOp, EngineError, ProcessorError, RegistryError, Side, TransferError,
};
pub use ledger::{BankService, Ledger, SharedLedger, TransferResult};
pub use pipeline::{AuditEntry, PipelineBuilder, TransferFn};
pub use processor::{
    CompletionHandle, JobOutcome, Processor, ProcessorState, ProcessorStats, SubmitError,
    TransferJob,
};
pub use registry::AccountRegistry;
pub use transaction::Transaction;
