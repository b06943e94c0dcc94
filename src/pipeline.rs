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

//! Transfer pipeline.
//!
//! Every stage shares one call shape, [`TransferFn`]:
//! `(from, to, amount, reference) -> Result<(new_from, new_to), TransferError>`.
//! Decorators take a `TransferFn` and return a new one, so stages compose by
//! plain wrapping:
//!
//! ```text
//! with_logging ─► with_audit ─► with_validation ─► core_transfer ─► BankService
//! ```
//!
//! Order matters. With validation inside audit (the [`PipelineBuilder`]
//! order), rejected attempts are audited as failures; with validation outside
//! audit, only attempts that passed validation reach the audit sink.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use rust_decimal_macros::dec;
//! use transfer_ledger::{Account, SharedLedger, pipeline};
//!
//! let ledger = Arc::new(SharedLedger::new());
//! let transfer = pipeline::with_validation(pipeline::core_transfer(ledger));
//!
//! let a = Account::new("A", dec!(10));
//! let b = Account::new("B", dec!(0));
//! let (a, b) = transfer(Some(&a), Some(&b), dec!(4), "lunch").unwrap();
//! assert_eq!((a.balance(), b.balance()), (dec!(6), dec!(4)));
//! ```

use crate::account::Account;
use crate::base::AccountId;
use crate::error::TransferError;
use crate::ledger::{BankService, TransferResult};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

/// The single transfer contract shared by the core and every decorator.
pub type TransferFn = Arc<
    dyn Fn(Option<&Account>, Option<&Account>, Decimal, &str) -> TransferResult + Send + Sync,
>;

/// Receives one [`AuditEntry`] per audited invocation.
///
/// Runs synchronously on the transferring thread; sinks shared between
/// workers must synchronize internally.
pub type AuditSink = Arc<dyn Fn(AuditEntry) + Send + Sync>;

/// Outcome of one transfer attempt, handed to an [`AuditSink`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub from: AccountId,
    pub to: AccountId,
    pub amount: Decimal,
    pub reference: String,
    pub success: bool,
    pub error: Option<TransferError>,
}

/// Wraps a closure as a [`TransferFn`].
pub fn transfer_fn<F>(f: F) -> TransferFn
where
    F: Fn(Option<&Account>, Option<&Account>, Decimal, &str) -> TransferResult
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// The innermost stage: delegates straight to the ledger.
pub fn core_transfer(service: Arc<dyn BankService>) -> TransferFn {
    transfer_fn(move |from, to, amount, reference| {
        service.transfer(from, to, amount, reference)
    })
}

/// Rejects absent handles, self-transfers and negative amounts before
/// calling `next`.
pub fn with_validation(next: TransferFn) -> TransferFn {
    transfer_fn(move |from, to, amount, reference| {
        let (Some(f), Some(t)) = (from, to) else {
            return Err(TransferError::NilAccount);
        };
        if f.id() == t.id() {
            return Err(TransferError::SelfTransferDisallowed);
        }
        if amount < Decimal::ZERO {
            return Err(TransferError::NegativeAmount);
        }
        next(from, to, amount, reference)
    })
}

/// Calls `next`, then hands an [`AuditEntry`] describing the attempt to
/// `sink`, whatever the outcome. Absent handles are audited with empty ids.
pub fn with_audit<S>(sink: S, next: TransferFn) -> TransferFn
where
    S: Fn(AuditEntry) + Send + Sync + 'static,
{
    transfer_fn(move |from, to, amount, reference| {
        let result = next(from, to, amount, reference);

        sink(AuditEntry {
            from: id_or_empty(from),
            to: id_or_empty(to),
            amount,
            reference: reference.to_string(),
            success: result.is_ok(),
            error: result.as_ref().err().cloned(),
        });

        result
    })
}

/// Logs the start of every transfer and its outcome with the elapsed time.
pub fn with_logging(next: TransferFn) -> TransferFn {
    transfer_fn(move |from, to, amount, reference| {
        let from_id = id_or_empty(from);
        let to_id = id_or_empty(to);

        let start = Instant::now();
        info!(from = %from_id, to = %to_id, %amount, reference, "initiating transfer");

        let result = next(from, to, amount, reference);
        match &result {
            Ok((new_from, new_to)) => info!(
                elapsed = ?start.elapsed(),
                new_from_balance = %new_from.balance(),
                new_to_balance = %new_to.balance(),
                "transfer succeeded"
            ),
            Err(err) => warn!(elapsed = ?start.elapsed(), error = %err, "transfer failed"),
        }
        result
    })
}

fn id_or_empty(account: Option<&Account>) -> AccountId {
    account
        .map(|a| a.id().clone())
        .unwrap_or_else(|| AccountId::new(""))
}

/// Assembles the standard pipeline around a [`BankService`].
///
/// The resulting order, outermost first, is
/// `logging -> audit -> validation -> core`. Stages that were not enabled are
/// skipped; the relative order never changes.
pub struct PipelineBuilder {
    service: Arc<dyn BankService>,
    validation: bool,
    audit: Option<AuditSink>,
    logging: bool,
}

impl PipelineBuilder {
    pub fn new(service: Arc<dyn BankService>) -> Self {
        Self {
            service,
            validation: false,
            audit: None,
            logging: false,
        }
    }

    pub fn validation(mut self) -> Self {
        self.validation = true;
        self
    }

    pub fn audit(mut self, sink: AuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn logging(mut self) -> Self {
        self.logging = true;
        self
    }

    pub fn build(self) -> TransferFn {
        let mut pipeline = core_transfer(self.service);
        if self.validation {
            pipeline = with_validation(pipeline);
        }
        if let Some(sink) = self.audit {
            pipeline = with_audit(move |entry| sink(entry), pipeline);
        }
        if self.logging {
            pipeline = with_logging(pipeline);
        }
        pipeline
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::SharedLedger;
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Core stand-in that counts calls and always succeeds.
    fn counting_core(calls: Arc<AtomicUsize>) -> TransferFn {
        transfer_fn(move |from, to, amount, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            let from = from.ok_or(TransferError::InvalidAccount)?;
            let to = to.ok_or(TransferError::InvalidAccount)?;
            Ok((
                Account::new(from.id().clone(), from.balance() - amount),
                Account::new(to.id().clone(), to.balance() + amount),
            ))
        })
    }

    fn collecting_sink() -> (Arc<Mutex<Vec<AuditEntry>>>, impl Fn(AuditEntry) + Send + Sync) {
        let entries = Arc::new(Mutex::new(Vec::new()));
        let sink_entries = Arc::clone(&entries);
        (entries, move |entry| sink_entries.lock().push(entry))
    }

    #[test]
    fn validation_rejects_before_calling_next() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transfer = with_validation(counting_core(Arc::clone(&calls)));
        let a = Account::new("A", dec!(10));
        let b = Account::new("B", dec!(10));

        assert_eq!(
            transfer(None, Some(&b), dec!(1), "x"),
            Err(TransferError::NilAccount)
        );
        assert_eq!(
            transfer(Some(&a), Some(&a), dec!(1), "x"),
            Err(TransferError::SelfTransferDisallowed)
        );
        assert_eq!(
            transfer(Some(&a), Some(&b), dec!(-1), "x"),
            Err(TransferError::NegativeAmount)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        transfer(Some(&a), Some(&b), Decimal::ZERO, "x").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn audit_records_success() {
        let (entries, sink) = collecting_sink();
        let transfer = with_audit(sink, counting_core(Arc::new(AtomicUsize::new(0))));
        let a = Account::new("A", dec!(10));
        let b = Account::new("B", dec!(0));

        transfer(Some(&a), Some(&b), dec!(3), "ref-1").unwrap();

        let entries = entries.lock();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0],
            AuditEntry {
                from: AccountId::from("A"),
                to: AccountId::from("B"),
                amount: dec!(3),
                reference: "ref-1".to_string(),
                success: true,
                error: None,
            }
        );
    }

    #[test]
    fn audit_records_failure_with_error() {
        let (entries, sink) = collecting_sink();
        let ledger: Arc<dyn BankService> = Arc::new(SharedLedger::new());
        let transfer = with_audit(sink, core_transfer(ledger));
        let a = Account::new("A", dec!(1));
        let b = Account::new("B", dec!(0));

        let err = transfer(Some(&a), Some(&b), dec!(5), "too-much").unwrap_err();

        let entries = entries.lock();
        assert_eq!(entries.len(), 1);
        assert!(!entries[0].success);
        assert_eq!(entries[0].error.as_ref(), Some(&err));
    }

    #[test]
    fn audit_outside_validation_sees_rejections() {
        let (entries, sink) = collecting_sink();
        let transfer = with_audit(
            sink,
            with_validation(counting_core(Arc::new(AtomicUsize::new(0)))),
        );
        let a = Account::new("A", dec!(1));

        let _ = transfer(Some(&a), Some(&a), dec!(1), "self");
        let _ = transfer(None, Some(&a), dec!(1), "nil");

        let entries = entries.lock();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].error,
            Some(TransferError::SelfTransferDisallowed)
        );
        assert_eq!(entries[1].from, AccountId::new(""));
        assert_eq!(entries[1].error, Some(TransferError::NilAccount));
    }

    #[test]
    fn validation_outside_audit_hides_rejections() {
        let (entries, sink) = collecting_sink();
        let transfer = with_validation(with_audit(
            sink,
            counting_core(Arc::new(AtomicUsize::new(0))),
        ));
        let a = Account::new("A", dec!(1));

        let _ = transfer(Some(&a), Some(&a), dec!(1), "self");
        assert!(entries.lock().is_empty());
    }

    #[test]
    fn logging_is_transparent() {
        let ledger: Arc<dyn BankService> = Arc::new(SharedLedger::new());
        let transfer = with_logging(core_transfer(ledger));
        let a = Account::new("A", dec!(10));
        let b = Account::new("B", dec!(0));

        let (a2, b2) = transfer(Some(&a), Some(&b), dec!(10), "all").unwrap();
        assert_eq!(a2.balance(), Decimal::ZERO);
        assert_eq!(b2.balance(), dec!(10));

        let err = transfer(Some(&a2), Some(&b2), dec!(1), "broke").unwrap_err();
        assert!(err.is_insufficient_funds());
    }

    #[test]
    fn builder_audits_validation_failures() {
        let (entries, sink) = collecting_sink();
        let ledger: Arc<dyn BankService> = Arc::new(SharedLedger::new());
        let transfer = PipelineBuilder::new(ledger)
            .validation()
            .audit(Arc::new(sink))
            .logging()
            .build();
        let a = Account::new("A", dec!(10));
        let b = Account::new("B", dec!(0));

        transfer(Some(&a), Some(&b), dec!(2), "ok").unwrap();
        let _ = transfer(Some(&a), Some(&b), dec!(-2), "negative");

        let entries = entries.lock();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].success);
        assert_eq!(entries[1].error, Some(TransferError::NegativeAmount));
    }
}
