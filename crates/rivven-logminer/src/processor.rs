//! # Mined Record Processing
//!
//! [`TransactionProcessor`] applies mined redo records to the
//! [`TransactionRegistry`] and hands every committed transaction to an
//! [`EventSink`] in one call.
//!
//! | Record | Effect |
//! |--------|--------|
//! | DML | buffer the event in its transaction |
//! | DML (undo) | remove buffered changes of the same row id |
//! | COMMIT | drain in SCN order, emit, retire the id |
//! | ROLLBACK | discard the buffer, retire the id |

use crate::config::{LogMinerConfig, TransactionIdPolicy};
use crate::error::{LogMinerError, Result};
use crate::event::{LogMinerEvent, Scn};
use crate::registry::{CommittedTransaction, TransactionRegistry};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// One record produced by a mining session.
#[derive(Debug, Clone, PartialEq)]
pub enum MinedRecord {
    Dml {
        transaction_id: String,
        user_name: Option<String>,
        event: LogMinerEvent,
    },
    Commit {
        transaction_id: String,
        scn: Scn,
        /// Unix epoch millis
        commit_time: i64,
    },
    Rollback {
        transaction_id: String,
        scn: Scn,
    },
}

impl MinedRecord {
    pub fn dml(transaction_id: impl Into<String>, event: LogMinerEvent) -> Self {
        MinedRecord::Dml {
            transaction_id: transaction_id.into(),
            user_name: None,
            event,
        }
    }

    pub fn commit(transaction_id: impl Into<String>, scn: impl Into<Scn>, commit_time: i64) -> Self {
        MinedRecord::Commit {
            transaction_id: transaction_id.into(),
            scn: scn.into(),
            commit_time,
        }
    }

    pub fn rollback(transaction_id: impl Into<String>, scn: impl Into<Scn>) -> Self {
        MinedRecord::Rollback {
            transaction_id: transaction_id.into(),
            scn: scn.into(),
        }
    }

    pub fn transaction_id(&self) -> &str {
        match self {
            MinedRecord::Dml { transaction_id, .. }
            | MinedRecord::Commit { transaction_id, .. }
            | MinedRecord::Rollback { transaction_id, .. } => transaction_id,
        }
    }

    /// Redo position of the record
    pub fn scn(&self) -> Scn {
        match self {
            MinedRecord::Dml { event, .. } => event.scn,
            MinedRecord::Commit { scn, .. } | MinedRecord::Rollback { scn, .. } => *scn,
        }
    }
}

/// Result of applying one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Event appended with this per-transaction event id
    Buffered(u64),
    /// Undo removed this many buffered events
    Undone(usize),
    /// Transaction committed and emitted
    Committed { events: usize },
    /// Transaction rolled back
    RolledBack,
    /// Record ignored (unknown or retired transaction)
    Skipped,
}

impl Applied {
    /// Whether the record ended a transaction
    pub fn ends_transaction(&self) -> bool {
        matches!(self, Applied::Committed { .. } | Applied::RolledBack)
    }
}

/// Destination for committed transactions.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Accept one committed transaction; all of its events arrive together.
    async fn emit(&self, transaction: CommittedTransaction) -> Result<()>;
}

/// Sink forwarding committed transactions into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<CommittedTransaction>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<CommittedTransaction>) -> Self {
        Self { tx }
    }

    /// Create a sink and the receiving end of its channel
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CommittedTransaction>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn emit(&self, transaction: CommittedTransaction) -> Result<()> {
        self.tx
            .send(transaction)
            .await
            .map_err(|e| LogMinerError::sink(format!("receiver dropped transaction {}", e.0.transaction_id)))
    }
}

/// Sink keeping committed transactions in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    transactions: Mutex<Vec<CommittedTransaction>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transactions(&self) -> Vec<CommittedTransaction> {
        self.transactions.lock().clone()
    }

    /// Every emitted event in emission order
    pub fn events(&self) -> Vec<LogMinerEvent> {
        self.transactions
            .lock()
            .iter()
            .flat_map(|t| t.events.iter().cloned())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.lock().is_empty()
    }
}

#[async_trait]
impl EventSink for CollectingSink {
    async fn emit(&self, transaction: CommittedTransaction) -> Result<()> {
        self.transactions.lock().push(transaction);
        Ok(())
    }
}

/// Applies mined records to the registry and emits committed transactions.
pub struct TransactionProcessor {
    registry: TransactionRegistry,
    sink: Arc<dyn EventSink>,
    id_policy: TransactionIdPolicy,
}

impl TransactionProcessor {
    pub fn new(registry: TransactionRegistry, sink: Arc<dyn EventSink>) -> Self {
        Self {
            registry,
            sink,
            id_policy: TransactionIdPolicy::default(),
        }
    }

    /// Build the registry from configuration and attach `sink`.
    pub fn from_config(config: &LogMinerConfig, sink: Arc<dyn EventSink>) -> Result<Self> {
        let registry = TransactionRegistry::from_config(config)?;
        Ok(Self::new(registry, sink).with_id_policy(config.transaction_id_policy))
    }

    pub fn with_id_policy(mut self, policy: TransactionIdPolicy) -> Self {
        self.id_policy = policy;
        self
    }

    pub fn registry(&self) -> &TransactionRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut TransactionRegistry {
        &mut self.registry
    }

    /// Apply one mined record.
    pub async fn apply(&mut self, record: MinedRecord) -> Result<Applied> {
        match record {
            MinedRecord::Dml {
                transaction_id,
                user_name,
                event,
            } => self.apply_dml(&transaction_id, user_name.as_deref(), event),
            MinedRecord::Commit {
                transaction_id,
                scn,
                commit_time,
            } => self.apply_commit(&transaction_id, scn, commit_time).await,
            MinedRecord::Rollback {
                transaction_id,
                scn,
            } => {
                if self.registry.rollback(&transaction_id)? {
                    Ok(Applied::RolledBack)
                } else {
                    trace!(%transaction_id, %scn, "Skipping rollback of unknown transaction");
                    Ok(Applied::Skipped)
                }
            }
        }
    }

    fn apply_dml(
        &mut self,
        transaction_id: &str,
        user_name: Option<&str>,
        event: LogMinerEvent,
    ) -> Result<Applied> {
        if self.id_policy == TransactionIdPolicy::ProcessUnique
            && !self.registry.contains(transaction_id)
            && self.registry.was_recently_retired(transaction_id)
        {
            debug!(
                %transaction_id,
                scn = %event.scn,
                "Skipping change for already retired transaction"
            );
            return Ok(Applied::Skipped);
        }

        if event.is_undo() {
            let removed = self.registry.undo(transaction_id, &event.row_id)?;
            return Ok(Applied::Undone(removed));
        }

        let event_id = self
            .registry
            .resolve(transaction_id, event.scn, event.change_time, user_name)?
            .add_event(event)?;
        Ok(Applied::Buffered(event_id))
    }

    async fn apply_commit(
        &mut self,
        transaction_id: &str,
        scn: Scn,
        commit_time: i64,
    ) -> Result<Applied> {
        let Some(committed) = self.registry.commit(transaction_id, scn, commit_time)? else {
            return Ok(Applied::Skipped);
        };

        let events = committed.len();
        if events > 0 {
            self.sink.emit(committed).await?;
        } else {
            trace!(%transaction_id, %scn, "Committed transaction has no events");
        }
        Ok(Applied::Committed { events })
    }

    /// Discard open transactions and close the spill store.
    pub fn shutdown(&mut self) -> Result<()> {
        self.registry.shutdown()
    }
}

impl std::fmt::Debug for TransactionProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionProcessor")
            .field("registry", &self.registry)
            .field("id_policy", &self.id_policy)
            .finish()
    }
}
