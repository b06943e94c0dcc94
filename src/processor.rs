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

//! Asynchronous transfer job processor.
//!
//! A [`Processor`] owns a bounded job queue and a fixed pool of worker
//! threads. Each worker waits on the parent [`CancelToken`] and on the queue,
//! runs the transfer pipeline for every job it receives and writes the
//! outcome to the job's completion channel, if the job has one.
//!
//! ```text
//!               submit (try_send)          ┌──────────┐
//! caller ──────────────────────► queue ───►│ worker 0 │──► pipeline ──► completion
//!                                   │      ├──────────┤
//!                                   └─────►│ worker N │──► pipeline ──► completion
//!                                          └──────────┘
//! ```
//!
//! # Lifecycle
//!
//! `Created -> Running -> Stopping -> Stopped`. [`Processor::stop`] closes the
//! queue, lets the workers drain every job that was already queued and joins
//! them; it runs exactly once no matter how many threads call it. Cancelling
//! the parent token makes workers exit as soon as they are done with (or gave
//! up on) their current job.
//!
//! # Deadlines
//!
//! A job with a deadline runs its transfer on a helper thread raced against
//! the deadline. When the deadline wins the job reports
//! [`TransferError::Timeout`], but the transfer is abandoned rather than
//! interrupted: a timed-out transfer may still be applied.

use crate::account::Account;
use crate::base::JobId;
use crate::cancel::CancelToken;
use crate::error::{ProcessorError, TransferError};
use crate::pipeline::TransferFn;
use crossbeam::channel::{self, Receiver, Sender, TrySendError};
use crossbeam::select;
use parking_lot::{Mutex, Once, RwLock};
use rust_decimal::Decimal;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Default number of jobs the queue holds before `submit` reports
/// [`ProcessorError::QueueFull`].
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// A transfer to run on the worker pool.
///
/// Built by the submitter and consumed by exactly one worker. A job created
/// with [`TransferJob::with_completion`] reports back exactly once through
/// the returned [`CompletionHandle`].
#[derive(Debug)]
pub struct TransferJob {
    pub id: JobId,
    pub from: Account,
    pub to: Account,
    pub amount: Decimal,
    pub reference: String,
    /// Point in time after which the job reports [`TransferError::Timeout`].
    /// `None` means unbounded.
    pub deadline: Option<Instant>,
    completion: Option<Completion>,
}

impl TransferJob {
    pub fn new(from: Account, to: Account, amount: Decimal, reference: impl Into<String>) -> Self {
        Self {
            id: JobId(0),
            from,
            to,
            amount,
            reference: reference.into(),
            deadline: None,
            completion: None,
        }
    }

    pub fn with_id(mut self, id: JobId) -> Self {
        self.id = id;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attaches a fresh single-slot completion channel to the job.
    pub fn with_completion(mut self) -> (Self, CompletionHandle) {
        let (sender, receiver) = channel::bounded(1);
        self.completion = Some(Completion { sender });
        (self, CompletionHandle { receiver })
    }

    pub fn has_completion(&self) -> bool {
        self.completion.is_some()
    }

    /// Writes `result` to the completion channel, if any, consuming the job.
    fn complete(mut self, result: Result<(), TransferError>) {
        if let Some(completion) = self.completion.take() {
            completion.send(JobOutcome { job: self, result });
        }
    }
}

/// What a worker reports for a job: the job itself and how it ended.
#[derive(Debug)]
pub struct JobOutcome {
    pub job: TransferJob,
    pub result: Result<(), TransferError>,
}

/// Sending half of a job's completion channel. Consumed on first use.
#[derive(Debug)]
struct Completion {
    sender: Sender<JobOutcome>,
}

impl Completion {
    fn send(self, outcome: JobOutcome) {
        // The slot is private to this job, so it is never full. A dropped
        // handle just means nobody is waiting.
        let _ = self.sender.try_send(outcome);
    }
}

/// Receiving half of a job's completion channel.
#[derive(Debug)]
pub struct CompletionHandle {
    receiver: Receiver<JobOutcome>,
}

impl CompletionHandle {
    /// Blocks until the job completes.
    ///
    /// Returns `None` if the job was dropped without being processed.
    pub fn wait(self) -> Option<JobOutcome> {
        self.receiver.recv().ok()
    }

    /// Blocks for at most `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<JobOutcome> {
        self.receiver.recv_timeout(timeout).ok()
    }

    /// Blocks until `deadline` at the latest.
    pub fn wait_deadline(&self, deadline: Instant) -> Option<JobOutcome> {
        self.receiver.recv_deadline(deadline).ok()
    }
}

/// A refused submission. Hands the job back so the caller can retry it.
#[derive(Error, Debug)]
#[error("{kind}")]
pub struct SubmitError {
    kind: ProcessorError,
    job: Box<TransferJob>,
}

impl SubmitError {
    fn new(kind: ProcessorError, job: TransferJob) -> Self {
        Self {
            kind,
            job: Box::new(job),
        }
    }

    pub fn kind(&self) -> ProcessorError {
        self.kind
    }

    pub fn into_job(self) -> TransferJob {
        *self.job
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    Created,
    Running,
    Stopping,
    Stopped,
}

/// Point-in-time job counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    /// Jobs accepted onto the queue.
    pub submitted: u64,
    /// Jobs that finished successfully.
    pub completed: u64,
    /// Jobs that finished with an error (including timeouts and cancellations).
    pub failed: u64,
    /// Submission attempts refused with `QueueFull` or `Stopped`.
    pub rejected: u64,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
}

impl Counters {
    fn record(&self, result: &Result<(), TransferError>) {
        match result {
            Ok(()) => self.completed.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.failed.fetch_add(1, Ordering::Relaxed),
        };
    }
}

/// Fixed-size worker pool executing transfer jobs.
pub struct Processor {
    pipeline: TransferFn,
    workers: usize,
    capacity: usize,
    /// Submission side of the queue; `None` once the processor is stopping.
    queue: RwLock<Option<Sender<TransferJob>>>,
    jobs: Receiver<TransferJob>,
    state: Mutex<ProcessorState>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    stop_once: Once,
    counters: Arc<Counters>,
}

impl Processor {
    /// Creates a processor with `workers` threads and a queue of
    /// [`DEFAULT_QUEUE_CAPACITY`] jobs. Workers are launched by [`start`](Self::start).
    pub fn new(pipeline: TransferFn, workers: usize) -> Self {
        Self::with_capacity(pipeline, workers, DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(pipeline: TransferFn, workers: usize, capacity: usize) -> Self {
        let (sender, jobs) = channel::bounded(capacity);
        Self {
            pipeline,
            workers,
            capacity,
            queue: RwLock::new(Some(sender)),
            jobs,
            state: Mutex::new(ProcessorState::Created),
            handles: Mutex::new(Vec::new()),
            stop_once: Once::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Launches the worker threads.
    ///
    /// Starting with zero workers is allowed; such a processor queues jobs
    /// but never runs them.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::AlreadyStarted`] - the workers are already running.
    /// - [`ProcessorError::Stopped`] - the processor was stopped.
    pub fn start(&self, cancel: CancelToken) -> Result<(), ProcessorError> {
        let mut state = self.state.lock();
        match *state {
            ProcessorState::Created => {}
            ProcessorState::Running => return Err(ProcessorError::AlreadyStarted),
            ProcessorState::Stopping | ProcessorState::Stopped => {
                return Err(ProcessorError::Stopped);
            }
        }

        if self.workers == 0 {
            warn!("processor started without workers, queued jobs will not run");
        }

        let mut handles = self.handles.lock();
        for index in 0..self.workers {
            let worker = Worker {
                index,
                pipeline: Arc::clone(&self.pipeline),
                jobs: self.jobs.clone(),
                cancel: cancel.clone(),
                counters: Arc::clone(&self.counters),
            };
            match thread::Builder::new()
                .name(format!("transfer-worker-{index}"))
                .spawn(move || worker.run())
            {
                Ok(handle) => handles.push(handle),
                Err(err) => error!(worker = index, error = %err, "failed to spawn worker"),
            }
        }

        *state = ProcessorState::Running;
        info!(workers = handles.len(), capacity = self.capacity, "processor started");
        Ok(())
    }

    /// Queues a job without blocking.
    ///
    /// # Errors
    ///
    /// - [`ProcessorError::Stopped`] - `stop` has been called.
    /// - [`ProcessorError::QueueFull`] - no free slot in the queue.
    ///
    /// The job is returned inside the error.
    pub fn submit(&self, job: TransferJob) -> Result<(), SubmitError> {
        // Held across `try_send` so that `stop` cannot close the queue
        // between the check and the enqueue.
        let queue = self.queue.read();
        let Some(sender) = queue.as_ref() else {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SubmitError::new(ProcessorError::Stopped, job));
        };

        match sender.try_send(job) {
            Ok(()) => {
                self.counters.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::new(ProcessorError::QueueFull, job))
            }
            Err(TrySendError::Disconnected(job)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError::new(ProcessorError::Stopped, job))
            }
        }
    }

    /// Like [`submit`](Self::submit), but retries up to `retries` more times,
    /// sleeping `backoff` in between, while the queue is full.
    ///
    /// [`ProcessorError::Stopped`] is returned at once. After the last retry
    /// the last error is returned.
    pub fn submit_with_retry(
        &self,
        job: TransferJob,
        retries: u32,
        backoff: Duration,
    ) -> Result<(), SubmitError> {
        let mut job = job;
        let mut attempt = 0;
        loop {
            match self.submit(job) {
                Ok(()) => return Ok(()),
                Err(err) if err.kind().is_transient() && attempt < retries => {
                    attempt += 1;
                    debug!(attempt, retries, ?backoff, "queue full, retrying submit");
                    job = err.into_job();
                    thread::sleep(backoff);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Closes the queue, waits for the workers to drain it and exit.
    ///
    /// Idempotent: the shutdown runs once, concurrent callers block until it
    /// is done. Jobs no worker can run any more (zero workers, never started,
    /// or workers cancelled by the parent token) complete with
    /// [`TransferError::Cancelled`].
    pub fn stop(&self) {
        self.stop_once.call_once(|| {
            *self.state.lock() = ProcessorState::Stopping;
            self.queue.write().take();

            let handles = std::mem::take(&mut *self.handles.lock());
            for handle in handles {
                if handle.join().is_err() {
                    error!("worker thread panicked");
                }
            }

            let mut abandoned = 0;
            while let Ok(job) = self.jobs.try_recv() {
                let result = Err(TransferError::Cancelled);
                self.counters.record(&result);
                job.complete(result);
                abandoned += 1;
            }
            if abandoned > 0 {
                warn!(abandoned, "jobs left in queue were cancelled");
            }

            *self.state.lock() = ProcessorState::Stopped;
            info!("processor stopped");
        });
    }

    pub fn state(&self) -> ProcessorState {
        *self.state.lock()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of jobs waiting in the queue.
    pub fn queued(&self) -> usize {
        self.jobs.len()
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
        }
    }
}

struct Worker {
    index: usize,
    pipeline: TransferFn,
    jobs: Receiver<TransferJob>,
    cancel: CancelToken,
    counters: Arc<Counters>,
}

impl Worker {
    fn run(self) {
        debug!(worker = self.index, "worker started");
        loop {
            select! {
                recv(self.cancel.receiver()) -> _ => {
                    debug!(worker = self.index, "worker cancelled");
                    return;
                }
                recv(self.jobs) -> job => {
                    match job {
                        Ok(job) => self.handle(job),
                        Err(_) => {
                            // queue closed and drained
                            debug!(worker = self.index, "worker stopped");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, job: TransferJob) {
        let result = if self.cancel.is_cancelled() {
            Err(TransferError::Cancelled)
        } else {
            self.process(&job)
        };

        if let Err(err) = &result {
            debug!(worker = self.index, job = %job.id, error = %err, "job failed");
        }
        self.counters.record(&result);
        job.complete(result);
    }

    fn process(&self, job: &TransferJob) -> Result<(), TransferError> {
        let Some(deadline) = job.deadline else {
            return invoke(
                &self.pipeline,
                &job.from,
                &job.to,
                job.amount,
                &job.reference,
            );
        };
        if Instant::now() >= deadline {
            return Err(TransferError::Timeout);
        }

        let (sender, receiver) = channel::bounded(1);
        let pipeline = Arc::clone(&self.pipeline);
        let (from, to, amount, reference) = (
            job.from.clone(),
            job.to.clone(),
            job.amount,
            job.reference.clone(),
        );
        let spawned = thread::Builder::new()
            .name(format!("transfer-job-{}", job.id))
            .spawn(move || {
                let _ = sender.send(invoke(&pipeline, &from, &to, amount, &reference));
            });
        if let Err(err) = spawned {
            warn!(job = %job.id, error = %err, "cannot spawn transfer thread, running inline");
            return invoke(
                &self.pipeline,
                &job.from,
                &job.to,
                job.amount,
                &job.reference,
            );
        }

        select! {
            recv(receiver) -> result => result.unwrap_or_else(|_| {
                Err(TransferError::Panicked("transfer thread exited without a result".to_string()))
            }),
            recv(self.cancel.receiver()) -> _ => Err(TransferError::Cancelled),
            recv(channel::at(deadline)) -> _ => {
                warn!(job = %job.id, "job deadline elapsed, abandoning transfer");
                Err(TransferError::Timeout)
            }
        }
    }
}

/// Runs the pipeline, turning a panic into [`TransferError::Panicked`].
fn invoke(
    pipeline: &TransferFn,
    from: &Account,
    to: &Account,
    amount: Decimal,
    reference: &str,
) -> Result<(), TransferError> {
    match panic::catch_unwind(AssertUnwindSafe(|| {
        pipeline(Some(from), Some(to), amount, reference)
    })) {
        Ok(result) => result.map(|_| ()),
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(TransferError::Panicked(message))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelSource;
    use crate::ledger::{BankService, SharedLedger};
    use crate::pipeline::{self, AuditEntry, transfer_fn};
    use rust_decimal_macros::dec;
    use std::sync::atomic::AtomicUsize;

    fn job(from: &str, to: &str, amount: Decimal) -> TransferJob {
        TransferJob::new(
            Account::new(from, dec!(1000)),
            Account::new(to, dec!(0)),
            amount,
            format!("{from}->{to}"),
        )
    }

    fn ledger_pipeline() -> TransferFn {
        let ledger: Arc<dyn BankService> = Arc::new(SharedLedger::new());
        pipeline::with_validation(pipeline::core_transfer(ledger))
    }

    fn sleeping_pipeline(delay: Duration, calls: Arc<AtomicUsize>) -> TransferFn {
        transfer_fn(move |from, to, _, _| {
            calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(delay);
            Ok((from.cloned().unwrap(), to.cloned().unwrap()))
        })
    }

    #[test]
    fn executes_job_and_reports_outcome() {
        let processor = Processor::new(ledger_pipeline(), 1);
        processor.start(CancelToken::never()).unwrap();

        let (job, done) = job("FROM", "TO", dec!(250)).with_completion();
        processor.submit(job).unwrap();

        let outcome = done.wait_timeout(Duration::from_secs(1)).expect("job completes");
        assert_eq!(outcome.result, Ok(()));
        assert_eq!(outcome.job.amount, dec!(250));
        assert!(!outcome.job.has_completion());

        processor.stop();
        assert_eq!(processor.stats().completed, 1);
    }

    #[test]
    fn failed_job_reports_error_and_worker_survives() {
        let processor = Processor::new(ledger_pipeline(), 1);
        processor.start(CancelToken::never()).unwrap();

        let (bad, bad_done) = job("A", "A", dec!(1)).with_completion();
        let (good, good_done) = job("A", "B", dec!(1)).with_completion();
        processor.submit(bad).unwrap();
        processor.submit(good).unwrap();

        let bad = bad_done.wait_timeout(Duration::from_secs(1)).unwrap();
        let good = good_done.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(bad.result, Err(TransferError::SelfTransferDisallowed));
        assert_eq!(good.result, Ok(()));

        processor.stop();
    }

    #[test]
    fn concurrent_jobs_each_complete_once() {
        const NUM_JOBS: usize = 200;
        let audit = Arc::new(parking_lot::Mutex::new(Vec::<AuditEntry>::new()));
        let sink = Arc::clone(&audit);
        let ledger: Arc<dyn BankService> = Arc::new(SharedLedger::new());
        let transfer = pipeline::with_audit(
            move |entry| sink.lock().push(entry),
            pipeline::with_validation(pipeline::core_transfer(ledger)),
        );

        let processor = Arc::new(Processor::with_capacity(transfer, 4, NUM_JOBS));
        processor.start(CancelToken::never()).unwrap();

        let handles: Vec<_> = (0..NUM_JOBS)
            .map(|i| {
                let processor = Arc::clone(&processor);
                thread::spawn(move || {
                    let (job, done) =
                        job(&format!("FROM-{i}"), &format!("TO-{i}"), dec!(100)).with_completion();
                    processor.submit(job).unwrap();
                    done.wait_timeout(Duration::from_secs(5))
                        .expect("completion signal")
                        .result
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().expect("Thread panicked"), Ok(()));
        }
        processor.stop();

        let audit = audit.lock();
        assert_eq!(audit.len(), NUM_JOBS);
        let mut refs: Vec<_> = audit.iter().map(|e| e.reference.clone()).collect();
        refs.sort();
        refs.dedup();
        assert_eq!(refs.len(), NUM_JOBS);
    }

    #[test]
    fn stop_drains_queued_jobs_then_rejects() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(
            sleeping_pipeline(Duration::from_millis(5), Arc::clone(&calls)),
            2,
        );
        processor.start(CancelToken::never()).unwrap();

        let handles: Vec<_> = (0..20)
            .map(|i| {
                let (job, done) = job(&format!("S{i}"), "D", dec!(1)).with_completion();
                processor.submit(job).unwrap();
                done
            })
            .collect();

        processor.stop();
        assert_eq!(processor.state(), ProcessorState::Stopped);
        assert_eq!(calls.load(Ordering::SeqCst), 20);
        for done in handles {
            assert_eq!(done.wait_timeout(Duration::ZERO).unwrap().result, Ok(()));
        }

        let err = processor.submit(job("A", "B", dec!(1))).unwrap_err();
        assert_eq!(err.kind(), ProcessorError::Stopped);
        assert_eq!(err.into_job().amount, dec!(1));
    }

    #[test]
    fn queue_full_without_workers() {
        let processor = Processor::with_capacity(ledger_pipeline(), 0, 2);
        processor.start(CancelToken::never()).unwrap();

        processor.submit(job("A", "B", dec!(1))).unwrap();
        processor.submit(job("A", "B", dec!(2))).unwrap();

        let started = Instant::now();
        let err = processor.submit(job("A", "B", dec!(3))).unwrap_err();
        assert_eq!(err.kind(), ProcessorError::QueueFull);
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(processor.queued(), 2);
        assert_eq!(processor.stats().rejected, 1);
    }

    #[test]
    fn retry_gives_up_after_bounded_attempts() {
        let processor = Processor::with_capacity(ledger_pipeline(), 0, 1);
        processor.submit(job("A", "B", dec!(1))).unwrap();

        let started = Instant::now();
        let err = processor
            .submit_with_retry(job("A", "B", dec!(1)), 3, Duration::from_millis(10))
            .unwrap_err();
        assert_eq!(err.kind(), ProcessorError::QueueFull);
        assert!(started.elapsed() >= Duration::from_millis(30));
        // one initial attempt plus three retries
        assert_eq!(processor.stats().rejected, 4);
    }

    #[test]
    fn retry_succeeds_once_the_queue_drains() {
        let processor = Arc::new(Processor::with_capacity(ledger_pipeline(), 1, 1));
        processor.submit(job("A", "B", dec!(1))).unwrap();

        let starter = Arc::clone(&processor);
        let delayed_start = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            starter.start(CancelToken::never()).unwrap();
        });

        processor
            .submit_with_retry(job("C", "D", dec!(1)), 50, Duration::from_millis(10))
            .unwrap();
        delayed_start.join().expect("Thread panicked");
        processor.stop();
        assert_eq!(processor.stats().completed, 2);
    }

    #[test]
    fn retry_does_not_retry_stopped() {
        let processor = Processor::new(ledger_pipeline(), 1);
        processor.stop();

        let started = Instant::now();
        let err = processor
            .submit_with_retry(job("A", "B", dec!(1)), 5, Duration::from_millis(100))
            .unwrap_err();
        assert_eq!(err.kind(), ProcessorError::Stopped);
        assert!(started.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn stop_is_idempotent_across_threads() {
        let processor = Arc::new(Processor::new(ledger_pipeline(), 3));
        processor.start(CancelToken::never()).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let processor = Arc::clone(&processor);
                thread::spawn(move || processor.stop())
            })
            .collect();
        for handle in handles {
            handle.join().expect("Thread panicked");
        }

        processor.stop();
        assert_eq!(processor.state(), ProcessorState::Stopped);
    }

    #[test]
    fn lifecycle_errors() {
        let processor = Processor::new(ledger_pipeline(), 1);
        assert_eq!(processor.state(), ProcessorState::Created);

        processor.start(CancelToken::never()).unwrap();
        assert_eq!(processor.state(), ProcessorState::Running);
        assert_eq!(
            processor.start(CancelToken::never()),
            Err(ProcessorError::AlreadyStarted)
        );

        processor.stop();
        assert_eq!(
            processor.start(CancelToken::never()),
            Err(ProcessorError::Stopped)
        );
    }

    #[test]
    fn deadline_elapses_before_transfer_finishes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(
            sleeping_pipeline(Duration::from_millis(300), Arc::clone(&calls)),
            1,
        );
        processor.start(CancelToken::never()).unwrap();

        let (job, done) = job("A", "B", dec!(1))
            .with_timeout(Duration::from_millis(20))
            .with_completion();
        let started = Instant::now();
        processor.submit(job).unwrap();

        let outcome = done.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.result, Err(TransferError::Timeout));
        assert!(started.elapsed() < Duration::from_millis(300));
        processor.stop();
    }

    #[test]
    fn expired_deadline_skips_the_transfer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(
            sleeping_pipeline(Duration::ZERO, Arc::clone(&calls)),
            1,
        );
        processor.start(CancelToken::never()).unwrap();

        let (job, done) = job("A", "B", dec!(1))
            .with_deadline(Instant::now())
            .with_completion();
        processor.submit(job).unwrap();

        let outcome = done.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.result, Err(TransferError::Timeout));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        processor.stop();
    }

    #[test]
    fn transfer_within_deadline_succeeds() {
        let processor = Processor::new(ledger_pipeline(), 1);
        processor.start(CancelToken::never()).unwrap();

        let (job, done) = job("A", "B", dec!(1))
            .with_timeout(Duration::from_secs(5))
            .with_completion();
        processor.submit(job).unwrap();

        assert_eq!(done.wait_timeout(Duration::from_secs(1)).unwrap().result, Ok(()));
        processor.stop();
    }

    #[test]
    fn parent_cancellation_stops_workers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(
            sleeping_pipeline(Duration::from_millis(500), Arc::clone(&calls)),
            1,
        );
        let source = CancelSource::new();
        processor.start(source.token()).unwrap();

        let (in_flight, in_flight_done) = job("A", "B", dec!(1))
            .with_timeout(Duration::from_secs(5))
            .with_completion();
        processor.submit(in_flight).unwrap();
        thread::sleep(Duration::from_millis(50));

        source.cancel();
        let outcome = in_flight_done.wait_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(outcome.result, Err(TransferError::Cancelled));

        // nobody drains the queue any more; stop cancels leftovers
        let (queued, queued_done) = job("C", "D", dec!(1)).with_completion();
        processor.submit(queued).unwrap();
        processor.stop();
        assert_eq!(
            queued_done.wait_timeout(Duration::ZERO).unwrap().result,
            Err(TransferError::Cancelled)
        );
    }

    #[test]
    fn panicking_transfer_is_reported() {
        let boom = transfer_fn(|_, _, _, reference| {
            if reference == "boom" {
                panic!("ledger exploded");
            }
            Err(TransferError::InvalidAccount)
        });
        let processor = Processor::new(boom, 1);
        processor.start(CancelToken::never()).unwrap();

        let mut first = job("A", "B", dec!(1));
        first.reference = "boom".to_string();
        let (first, first_done) = first.with_completion();
        let (second, second_done) = job("A", "B", dec!(1)).with_completion();
        processor.submit(first).unwrap();
        processor.submit(second).unwrap();

        assert_eq!(
            first_done.wait_timeout(Duration::from_secs(1)).unwrap().result,
            Err(TransferError::Panicked("ledger exploded".to_string()))
        );
        assert_eq!(
            second_done.wait_timeout(Duration::from_secs(1)).unwrap().result,
            Err(TransferError::InvalidAccount)
        );
        processor.stop();
        assert_eq!(processor.stats().failed, 2);
    }

    #[test]
    fn fire_and_forget_jobs_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = Processor::new(sleeping_pipeline(Duration::ZERO, Arc::clone(&calls)), 2);
        processor.start(CancelToken::never()).unwrap();

        for i in 0..10 {
            processor.submit(job(&format!("A{i}"), "B", dec!(1))).unwrap();
        }
        processor.stop();
        assert_eq!(calls.load(Ordering::SeqCst), 10);
    }
}
