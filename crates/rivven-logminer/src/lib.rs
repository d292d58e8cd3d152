//! # rivven-logminer - Oracle LogMiner transaction buffering for Rivven
//!
//! Buffers the uncommitted changes of every open source transaction until
//! the redo log shows its COMMIT or ROLLBACK, so downstream consumers only
//! ever see committed data, in log order, one transaction at a time.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────┐  MinedRecord   ┌──────────────────────┐
//! │ MiningSession  │───────────────▶│ TransactionProcessor │
//! └───────┬────────┘                └──────────┬───────────┘
//!         │ failure                            │
//!         ▼                                    ▼
//! ┌────────────────────────┐       ┌──────────────────────┐
//! │ SessionRetryController │       │ TransactionRegistry  │
//! │  + ErrorClassifier     │       │  Transaction ──▶ ... │
//! └────────────────────────┘       └──────────┬───────────┘
//!                                             │ past threshold
//!                                             ▼
//!                                  ┌──────────────────────┐
//!                                  │ EventCodec+SpillStore│
//!                                  │       (redb)         │
//!                                  └──────────────────────┘
//! ```
//!
//! Large transactions spill from memory into an embedded redb database, one
//! key per event, so a transaction touching millions of rows does not have
//! to fit in the heap. Transient session faults (lost connections, known
//! ORA codes) reopen the mining session without disturbing open
//! transactions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! # async fn example(mut session: impl rivven_logminer::MiningSession) -> rivven_logminer::Result<()> {
//! use rivven_logminer::{
//!     CollectingSink, LogMinerConfig, LogReporter, SessionRetryController, TransactionProcessor,
//! };
//! use std::sync::Arc;
//!
//! let config = LogMinerConfig::from_yaml(
//!     "spill:\n  path: /var/lib/rivven/logminer/spill.redb\n",
//! )?;
//!
//! let sink = Arc::new(CollectingSink::new());
//! let mut processor = TransactionProcessor::from_config(&config, sink.clone())?;
//! let mut controller = SessionRetryController::from_config(&config, Arc::new(LogReporter));
//!
//! controller.run(&mut session, &mut processor).await?;
//! processor.shutdown()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Public API Organization
//!
//! ### Tier 1: Core Types (crate root)
//! Events, the processor, the session controller and configuration.
//!
//! ### Tier 2: Building Blocks (modules)
//! Buffers, spill stores, codecs and the classifier - accessed via their
//! modules for custom wiring.

pub mod buffer;
pub mod classifier;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod processor;
pub mod registry;
pub mod session;
pub mod store;
pub mod transaction;

// =============================================================================
// TIER 1: Core Types
// =============================================================================

pub use config::{LogMinerConfig, RetryPolicy, TransactionIdPolicy};
pub use error::{ErrorCategory, LogMinerError, Result, SessionFaultKind};
pub use event::{ColumnValue, EventType, LogMinerEvent, Scn, TableId};
pub use processor::{Applied, ChannelSink, CollectingSink, EventSink, MinedRecord, TransactionProcessor};
pub use registry::{CommittedTransaction, TransactionRegistry};
pub use session::{
    ChannelReporter, FailureReporter, LogReporter, MiningSession, SessionRetryController,
    SessionSignal,
};

// =============================================================================
// TIER 2: Building Blocks
// =============================================================================

pub use buffer::{BufferMode, EventBuffer, TransactionEventBuffer};
pub use classifier::{ErrorDescription, RetriableErrorClassifier, Verdict};
pub use codec::{CodecKind, EventCodec};
pub use store::{MemorySpillStore, RedbSpillStore, SpillStore};
pub use transaction::Transaction;
