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

//! Transfer engine.
//!
//! The [`Engine`] ties the account registry, the job processor and the ledger
//! together behind a string-based contract: callers name accounts by id and
//! get a [`JobId`] back as soon as the transfer is queued.
//!
//! # Completion
//!
//! Every accepted transfer gets an observer thread that waits for the job's
//! outcome until the job deadline plus [`EngineConfig::observer_grace`]. The
//! observer appends an [`AuditRecord`] to the engine's [`AuditLog`] and then
//! calls the completion callback registered with [`Engine::on_complete`].
//! An observer that gives up records a failed entry and skips the callback.
//!
//! # Balances
//!
//! The registry holds the handles accounts were registered with. Transfers
//! produce new account values inside the ledger, but the registry is not
//! updated with them: each transfer starts from the registered balance.

use crate::account::Account;
use crate::audit::{AuditLog, AuditRecord};
use crate::base::{AccountId, JobId};
use crate::cancel::CancelSource;
use crate::error::{EngineError, ProcessorError, Side};
use crate::ledger::{BankService, SharedLedger};
use crate::pipeline::{AuditEntry, PipelineBuilder};
use crate::processor::{
    CompletionHandle, DEFAULT_QUEUE_CAPACITY, JobOutcome, Processor, ProcessorStats, TransferJob,
};
use crate::registry::AccountRegistry;
use crate::transaction::Transaction;
use chrono::Utc;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Callback invoked once per observed job outcome.
pub type CompletionCallback = Arc<dyn Fn(&JobOutcome) + Send + Sync>;

/// Audit error message for jobs whose outcome never arrived.
pub const COMPLETION_NOT_OBSERVED: &str = "completion not observed";

/// Engine tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Worker threads started by [`Engine::with_config`].
    pub workers: usize,
    /// Bounded job queue capacity.
    pub queue_capacity: usize,
    /// Extra submission attempts when the queue is full.
    pub submit_retries: u32,
    /// Pause between submission attempts.
    pub retry_backoff: Duration,
    /// Per-job deadline, measured from submission.
    pub job_timeout: Duration,
    /// How long an observer keeps waiting after the job deadline.
    pub observer_grace: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            submit_retries: 3,
            retry_backoff: Duration::from_millis(100),
            job_timeout: Duration::from_secs(5),
            observer_grace: Duration::from_secs(1),
        }
    }
}

/// Orchestrates registry, processor and ledger.
pub struct Engine {
    registry: Arc<AccountRegistry>,
    processor: Arc<Processor>,
    service: Arc<dyn BankService>,
    audit: Arc<AuditLog>,
    on_done: Arc<RwLock<Option<CompletionCallback>>>,
    config: EngineConfig,
    next_job: AtomicU64,
    /// Present when the engine started its own processor.
    cancel: Option<CancelSource>,
}

impl Engine {
    /// Wires an engine around externally built components.
    ///
    /// The processor must be started by the caller; its pipeline is expected
    /// to run against `service`.
    pub fn new(
        registry: Arc<AccountRegistry>,
        processor: Arc<Processor>,
        service: Arc<dyn BankService>,
        config: EngineConfig,
    ) -> Self {
        Self {
            registry,
            processor,
            service,
            audit: Arc::new(AuditLog::new()),
            on_done: Arc::new(RwLock::new(None)),
            config,
            next_job: AtomicU64::new(1),
            cancel: None,
        }
    }

    /// Builds the default stack: an empty registry, a [`SharedLedger`], the
    /// logged, audited and validated pipeline, and a started processor.
    ///
    /// # Errors
    ///
    /// Propagates [`Processor::start`] failures.
    pub fn with_config(config: EngineConfig) -> Result<Self, ProcessorError> {
        let service: Arc<dyn BankService> = Arc::new(SharedLedger::new());
        let pipeline = PipelineBuilder::new(Arc::clone(&service))
            .validation()
            .audit(Arc::new(trace_attempt))
            .logging()
            .build();
        let processor = Arc::new(Processor::with_capacity(
            pipeline,
            config.workers,
            config.queue_capacity,
        ));

        let cancel = CancelSource::new();
        processor.start(cancel.token())?;

        let mut engine = Self::new(
            Arc::new(AccountRegistry::new()),
            processor,
            service,
            config,
        );
        engine.cancel = Some(cancel);
        Ok(engine)
    }

    /// Queues a transfer between two registered accounts.
    ///
    /// Returns as soon as the job is accepted. The outcome is reported to the
    /// completion callback and the audit log.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownAccount`] if either id is not registered.
    /// - [`EngineError::SelfTransferDisallowed`] if both ids are equal.
    /// - [`EngineError::InvalidAmount`] if `amount` is not positive.
    /// - [`EngineError::Submit`] if the processor refused the job after all retries.
    pub fn submit_transfer(
        &self,
        from_id: &str,
        to_id: &str,
        amount: Decimal,
        reference: &str,
    ) -> Result<JobId, EngineError> {
        let from = self.resolve(Side::From, from_id)?;
        let to = self.resolve(Side::To, to_id)?;
        if from.id() == to.id() {
            return Err(EngineError::SelfTransferDisallowed);
        }
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(amount));
        }

        let id = JobId(self.next_job.fetch_add(1, Ordering::Relaxed));
        let deadline = Instant::now() + self.config.job_timeout;
        let (job, completion) = TransferJob::new(from, to, amount, reference)
            .with_id(id)
            .with_deadline(deadline)
            .with_completion();

        if let Err(err) = self.processor.submit_with_retry(
            job,
            self.config.submit_retries,
            self.config.retry_backoff,
        ) {
            warn!(job = %id, from = from_id, to = to_id, error = %err, "transfer rejected");
            return Err(EngineError::Submit(err.kind()));
        }
        info!(job = %id, from = from_id, to = to_id, %amount, reference, "transfer queued");

        self.observe(
            Pending {
                id,
                from: AccountId::from(from_id),
                to: AccountId::from(to_id),
                amount,
                reference: reference.to_string(),
            },
            completion,
            deadline + self.config.observer_grace,
        );
        Ok(id)
    }

    /// Transaction history of a registered account, in completion order.
    ///
    /// # Errors
    ///
    /// [`EngineError::AccountNotFound`] for unregistered ids,
    /// [`EngineError::Statement`] if the ledger refuses the lookup.
    pub fn statement(&self, account_id: &str) -> Result<Vec<Transaction>, EngineError> {
        let account = self.registry.get(account_id)?;
        Ok(self.service.statement(Some(&account))?)
    }

    /// Sets the completion callback, replacing any previous one.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: Fn(&JobOutcome) + Send + Sync + 'static,
    {
        *self.on_done.write() = Some(Arc::new(callback));
    }

    /// Registers `account`, replacing an existing handle with the same id.
    pub fn register_account(&self, account: Account) {
        debug!(account = %account.id(), balance = %account.balance(), "account registered");
        self.registry.register(account);
    }

    /// Creates a new account.
    ///
    /// # Errors
    ///
    /// [`EngineError::DuplicateAccount`] if the id is already registered.
    pub fn open_account(&self, id: &str, balance: Decimal) -> Result<Account, EngineError> {
        let account = Account::new(id, balance);
        self.registry.register_new(account.clone())?;
        info!(account = id, %balance, "account opened");
        Ok(account)
    }

    /// Looks up a registered account.
    pub fn account(&self, id: &str) -> Result<Account, EngineError> {
        Ok(self.registry.get(id)?)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.registry.list()
    }

    /// Copy of the audit log.
    pub fn audit_log(&self) -> Vec<AuditRecord> {
        self.audit.snapshot()
    }

    pub fn stats(&self) -> ProcessorStats {
        self.processor.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stops the processor after it drained the queued jobs. Idempotent.
    pub fn shutdown(&self) {
        info!("engine shutting down");
        self.processor.stop();
    }

    /// Cancels in-flight work and stops the processor.
    ///
    /// Jobs still running report [`TransferError::Cancelled`](crate::TransferError::Cancelled).
    /// Only affects processors started by [`Engine::with_config`].
    pub fn abort(&self) {
        if let Some(cancel) = &self.cancel {
            warn!("engine aborting in-flight transfers");
            cancel.cancel();
        }
        self.processor.stop();
    }

    fn resolve(&self, side: Side, id: &str) -> Result<Account, EngineError> {
        self.registry.get(id).map_err(|_| EngineError::UnknownAccount {
            side,
            id: AccountId::from(id),
        })
    }

    fn observe(&self, pending: Pending, completion: CompletionHandle, wait_until: Instant) {
        let audit = Arc::clone(&self.audit);
        let on_done = Arc::clone(&self.on_done);
        let id = pending.id;

        let spawned = thread::Builder::new()
            .name(format!("transfer-observer-{id}"))
            .spawn(move || match completion.wait_deadline(wait_until) {
                Some(outcome) => {
                    audit.append(pending.record(
                        outcome.result.is_ok(),
                        outcome.result.as_ref().err().map(ToString::to_string),
                    ));
                    // Clone out of the lock so the callback may re-register.
                    let callback = on_done.read().clone();
                    if let Some(callback) = callback {
                        callback(&outcome);
                    }
                }
                None => {
                    warn!(job = %pending.id, "gave up waiting for transfer outcome");
                    audit.append(pending.record(false, Some(COMPLETION_NOT_OBSERVED.to_string())));
                }
            });

        if let Err(err) = spawned {
            error!(job = %id, error = %err, "failed to spawn transfer observer");
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.cancel.is_some() {
            self.processor.stop();
        }
    }
}

/// Request fields kept by an observer for its audit record.
struct Pending {
    id: JobId,
    from: AccountId,
    to: AccountId,
    amount: Decimal,
    reference: String,
}

impl Pending {
    fn record(&self, success: bool, error: Option<String>) -> AuditRecord {
        AuditRecord {
            from: self.from.clone(),
            to: self.to.clone(),
            amount: self.amount,
            reference: self.reference.clone(),
            timestamp: Utc::now(),
            success,
            error,
        }
    }
}

fn trace_attempt(entry: AuditEntry) {
    match &entry.error {
        None => debug!(
            from = %entry.from,
            to = %entry.to,
            amount = %entry.amount,
            reference = %entry.reference,
            "transfer attempt succeeded"
        ),
        Some(err) => debug!(
            from = %entry.from,
            to = %entry.to,
            amount = %entry.amount,
            reference = %entry.reference,
            error = %err,
            "transfer attempt failed"
        ),
    }
}
