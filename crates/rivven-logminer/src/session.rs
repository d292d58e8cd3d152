//! # Mining Session Retry Control
//!
//! A mining session reads redo records from the database. When it fails,
//! [`SessionRetryController::handle_failure`] asks the
//! [`RetriableErrorClassifier`] for a verdict:
//!
//! - **retriable**: report [`SessionSignal::Retrying`], back off, close the
//!   session and reopen it at the SCN of the last applied record
//! - **fatal** (or retry budget spent): report [`SessionSignal::Fatal`] and
//!   return the error
//!
//! The controller never touches transaction buffers. Open transactions
//! survive a reopen unchanged, and reopening repeatedly without new records
//! leaves them exactly as they were.
//!
//! # Replay after a reopen
//!
//! SCNs are not unique: several redo records can share one. The controller
//! therefore remembers the last applied SCN together with how many records
//! at that SCN went through the processor. After a reopen it drops records
//! below that SCN and the first `n` records at it, so the DML of open
//! transactions is never buffered twice.
//!
//! ```text
//! applied: t2@12 t2@13 ──fault──▶ open(13) replays t2@13 (skipped), commit@14
//! ```

use crate::classifier::{RetriableErrorClassifier, RetryReason, Verdict};
use crate::config::{LogMinerConfig, RetryPolicy};
use crate::error::{LogMinerError, Result};
use crate::event::Scn;
use crate::processor::{MinedRecord, TransactionProcessor};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// Source of mined redo records.
#[async_trait]
pub trait MiningSession: Send {
    /// Start mining at `from`: every record with an SCN at or above `from`,
    /// in log order. Called again after every retriable failure.
    ///
    /// Records the controller already applied are skipped, so a source that
    /// resumes strictly after `from` is also fine as long as it never splits
    /// the records of one SCN.
    async fn open(&mut self, from: Scn) -> Result<()>;

    /// Next record, or `None` once the session has nothing more to mine.
    async fn next_record(&mut self) -> Result<Option<MinedRecord>>;

    /// Release the session
    async fn close(&mut self) -> Result<()>;
}

/// Failure notification for the embedding application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionSignal {
    /// A transient fault; the session is being reopened
    Retrying {
        attempt: u32,
        delay: Duration,
        reason: RetryReason,
        message: String,
    },
    /// A terminal fault; mining has stopped
    Fatal {
        error_code: &'static str,
        message: String,
    },
}

impl SessionSignal {
    pub fn is_fatal(&self) -> bool {
        matches!(self, SessionSignal::Fatal { .. })
    }
}

/// Receives session failure signals.
#[async_trait]
pub trait FailureReporter: Send + Sync {
    async fn report(&self, signal: SessionSignal);
}

/// Reporter forwarding signals into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    tx: mpsc::Sender<SessionSignal>,
}

impl ChannelReporter {
    pub fn new(tx: mpsc::Sender<SessionSignal>) -> Self {
        Self { tx }
    }

    /// Create a reporter and the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SessionSignal>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl FailureReporter for ChannelReporter {
    async fn report(&self, signal: SessionSignal) {
        if self.tx.send(signal).await.is_err() {
            debug!("Failure signal receiver dropped");
        }
    }
}

/// Reporter that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogReporter;

#[async_trait]
impl FailureReporter for LogReporter {
    async fn report(&self, signal: SessionSignal) {
        match signal {
            SessionSignal::Retrying {
                attempt,
                delay,
                reason,
                message,
            } => info!(attempt, ?delay, %reason, %message, "Mining session retrying"),
            SessionSignal::Fatal {
                error_code,
                message,
            } => error!(error_code, %message, "Mining session failed"),
        }
    }
}

/// Session health counters.
#[derive(Debug, Default)]
pub struct SessionMetrics {
    connected: AtomicBool,
    retries: AtomicU64,
    fatal_faults: AtomicU64,
    reopens: AtomicU64,
    records: AtomicU64,
}

impl SessionMetrics {
    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Relaxed);
    }

    /// Whether the session is currently open
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Retriable faults handled
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// Fatal faults reported
    pub fn fatal_faults(&self) -> u64 {
        self.fatal_faults.load(Ordering::Relaxed)
    }

    /// Successful reopens after a fault
    pub fn reopens(&self) -> u64 {
        self.reopens.load(Ordering::Relaxed)
    }

    /// Records read from the session
    pub fn records(&self) -> u64 {
        self.records.load(Ordering::Relaxed)
    }
}

/// Last applied position in the redo stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct LogPosition {
    scn: Scn,
    /// Records at `scn` already handed to the processor
    applied: u64,
}

/// Decides between reopening a failed session and stopping.
pub struct SessionRetryController {
    policy: RetryPolicy,
    classifier: RetriableErrorClassifier,
    reporter: Arc<dyn FailureReporter>,
    metrics: Arc<SessionMetrics>,
    position: LogPosition,
    /// Records at `position.scn` still to skip; `None` once past the replay
    replay: Option<u64>,
    attempts: u32,
}

impl SessionRetryController {
    pub fn new(
        policy: RetryPolicy,
        classifier: RetriableErrorClassifier,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            policy,
            classifier,
            reporter,
            metrics: Arc::new(SessionMetrics::default()),
            position: LogPosition::default(),
            replay: None,
            attempts: 0,
        }
    }

    pub fn from_config(config: &LogMinerConfig, reporter: Arc<dyn FailureReporter>) -> Self {
        Self::new(
            config.retry.clone(),
            RetriableErrorClassifier::from_config(&config.classifier),
            reporter,
        )
    }

    /// Start mining at `scn` instead of the beginning.
    pub fn with_start_scn(mut self, scn: Scn) -> Self {
        self.position = LogPosition { scn, applied: 0 };
        self
    }

    pub fn metrics(&self) -> &Arc<SessionMetrics> {
        &self.metrics
    }

    /// Position the next reopen starts from
    pub fn resume_scn(&self) -> Scn {
        self.position.scn
    }

    /// Consecutive retries since the last successful read
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Move the resume position forward. Older positions are ignored.
    ///
    /// Records at `scn` itself are delivered again after a reopen.
    pub fn acknowledge(&mut self, scn: Scn) {
        if scn > self.position.scn {
            self.position = LogPosition { scn, applied: 0 };
        }
    }

    fn mark_applied(&mut self, scn: Scn) {
        if scn > self.position.scn {
            self.position = LogPosition { scn, applied: 1 };
        } else if scn == self.position.scn {
            self.position.applied += 1;
        }
    }

    fn begin_replay(&mut self) {
        self.replay = Some(self.position.applied);
    }

    /// Whether a record read after a reopen was already applied.
    fn is_replayed(&mut self, scn: Scn) -> bool {
        let Some(remaining) = self.replay else {
            return false;
        };
        if scn < self.position.scn {
            return true;
        }
        if scn == self.position.scn && remaining > 0 {
            self.replay = Some(remaining - 1);
            return true;
        }
        self.replay = None;
        false
    }

    /// Reset the retry budget after the session produced a record.
    pub fn record_success(&mut self) {
        self.attempts = 0;
        self.metrics.records.fetch_add(1, Ordering::Relaxed);
    }

    /// Open `session` at the resume position, retrying transient faults.
    pub async fn open<S>(&mut self, session: &mut S) -> Result<()>
    where
        S: MiningSession + ?Sized,
    {
        match session.open(self.position.scn).await {
            Ok(()) => {
                self.metrics.set_connected(true);
                self.begin_replay();
                debug!(from = %self.position.scn, "Mining session opened");
                Ok(())
            }
            Err(e) => self.handle_failure(session, e).await,
        }
    }

    /// React to a session failure.
    ///
    /// Returns `Ok(())` once the session has been reopened, or the error
    /// (wrapped in `RetriesExhausted` when the budget ran out) after a
    /// fatal signal was reported.
    pub async fn handle_failure<S>(&mut self, session: &mut S, error: LogMinerError) -> Result<()>
    where
        S: MiningSession + ?Sized,
    {
        let mut error = error;
        loop {
            self.metrics.set_connected(false);

            let reason = match self.classifier.classify_error(&error) {
                Verdict::Retriable(reason) => reason,
                Verdict::Fatal => return self.fail(session, error).await,
            };

            if !self.policy.should_retry(self.attempts) {
                let exhausted = LogMinerError::RetriesExhausted {
                    attempts: self.attempts,
                    last_error: Box::new(error),
                };
                return self.fail(session, exhausted).await;
            }

            let delay = self.policy.delay_for_attempt(self.attempts);
            self.attempts += 1;
            self.metrics.retries.fetch_add(1, Ordering::Relaxed);

            warn!(
                attempt = self.attempts,
                ?delay,
                %reason,
                from = %self.position.scn,
                error = %error,
                "Retriable mining session failure, reopening"
            );
            self.reporter
                .report(SessionSignal::Retrying {
                    attempt: self.attempts,
                    delay,
                    reason,
                    message: error.to_string(),
                })
                .await;

            if let Err(e) = session.close().await {
                debug!(error = %e, "Ignoring close failure of broken session");
            }
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            match session.open(self.position.scn).await {
                Ok(()) => {
                    self.metrics.set_connected(true);
                    self.metrics.reopens.fetch_add(1, Ordering::Relaxed);
                    self.begin_replay();
                    info!(
                        from = %self.position.scn,
                        skip = self.position.applied,
                        "Mining session reopened"
                    );
                    return Ok(());
                }
                Err(e) => error = e,
            }
        }
    }

    async fn fail<S>(&mut self, session: &mut S, error: LogMinerError) -> Result<()>
    where
        S: MiningSession + ?Sized,
    {
        self.metrics.set_connected(false);
        self.metrics.fatal_faults.fetch_add(1, Ordering::Relaxed);
        error!(
            error_code = error.error_code(),
            error = %error,
            "Fatal mining session failure"
        );
        self.reporter
            .report(SessionSignal::Fatal {
                error_code: error.error_code(),
                message: error.to_string(),
            })
            .await;
        if let Err(e) = session.close().await {
            debug!(error = %e, "Ignoring close failure of failed session");
        }
        Err(error)
    }

    /// Mine until the session runs dry or fails fatally.
    ///
    /// Every record goes through `processor` once. The position of each
    /// applied record is kept so a reopen resumes where mining stopped and
    /// replayed records are dropped. Returns the number of records applied.
    pub async fn run<S>(&mut self, session: &mut S, processor: &mut TransactionProcessor) -> Result<u64>
    where
        S: MiningSession + ?Sized,
    {
        self.open(session).await?;

        let mut applied_records = 0u64;
        loop {
            let record = match session.next_record().await {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(e) => {
                    self.handle_failure(session, e).await?;
                    continue;
                }
            };

            self.record_success();
            let scn = record.scn();
            if self.is_replayed(scn) {
                trace!(%scn, "Skipping record replayed after reopen");
                continue;
            }
            match processor.apply(record).await {
                Ok(_) => {
                    applied_records += 1;
                    self.mark_applied(scn);
                }
                Err(e) => return self.fail(session, e).await.map(|_| applied_records),
            }
        }

        session.close().await?;
        self.metrics.set_connected(false);
        info!(records = applied_records, resume_scn = %self.position.scn, "Mining session finished");
        Ok(applied_records)
    }
}

impl std::fmt::Debug for SessionRetryController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRetryController")
            .field("policy", &self.policy)
            .field("position", &self.position)
            .field("attempts", &self.attempts)
            .finish()
    }
}
