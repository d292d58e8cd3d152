//! # Transaction Event Buffers
//!
//! Ordered, densely indexed event storage for one open transaction.
//!
//! ## Strategies
//!
//! - [`MemoryEventBuffer`]: events live in a `Vec`
//! - [`SpilledEventBuffer`]: one spill store key per event, keyed by
//!   transaction id + index
//!
//! [`TransactionEventBuffer`] hides which strategy is in use. In tiered mode
//! it starts in memory and moves everything to the spill tier once the
//! transaction reaches the configured threshold. Callers address events by
//! index in both cases and never observe the promotion.
//!
//! ## Density
//!
//! After any sequence of appends and removals, `get(i)` succeeds exactly for
//! `i` in `0..len()`. Removing index `i` shifts every later event down by one.

mod memory;
mod spilled;

pub use memory::MemoryEventBuffer;
pub use spilled::{SpillTier, SpilledEventBuffer};

use crate::error::{LogMinerError, Result};
use crate::event::LogMinerEvent;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Ordered sequence of events addressable by 0-based index.
pub trait EventBuffer: Send {
    /// Owning transaction
    fn transaction_id(&self) -> &str;

    /// Append at index `len()`. Storage failures are returned, never dropped.
    fn append(&mut self, event: LogMinerEvent) -> Result<()>;

    /// Event at `index`, `IndexOutOfBounds` outside `0..len()`
    fn get(&self, index: usize) -> Result<LogMinerEvent>;

    /// Remove the event at `index`, shifting later events down by one
    fn remove_at(&mut self, index: usize) -> Result<LogMinerEvent>;

    /// Remove every event matching `predicate`, keeping the rest in order.
    ///
    /// Returns the number of removed events; zero matches is not an error.
    fn remove_if(&mut self, predicate: &mut dyn FnMut(&LogMinerEvent) -> bool) -> Result<usize>;

    /// Number of retrievable events
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take every event in index order, leaving the buffer empty
    fn drain(&mut self) -> Result<Vec<LogMinerEvent>>;

    /// Discard every event, reclaiming spilled storage
    fn clear(&mut self) -> Result<()>;

    /// Whether events currently live in the spill tier
    fn is_spilled(&self) -> bool;
}

/// How transaction buffers store their events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BufferMode {
    /// Always keep events in memory
    Memory,
    /// Always write events to the spill store
    Spill,
    /// Start in memory, spill once a transaction holds `spill_threshold` events
    Tiered { spill_threshold: usize },
}

impl Default for BufferMode {
    fn default() -> Self {
        BufferMode::Tiered {
            spill_threshold: 10_000,
        }
    }
}

impl BufferMode {
    /// Whether this mode needs a spill store
    pub fn requires_spill(&self) -> bool {
        !matches!(self, BufferMode::Memory)
    }
}

enum Tier {
    Memory(MemoryEventBuffer),
    Spilled(SpilledEventBuffer),
}

/// Event buffer of one transaction, resident or spilled.
pub struct TransactionEventBuffer {
    tier: Tier,
    spill: Option<SpillTier>,
    spill_threshold: Option<usize>,
}

impl TransactionEventBuffer {
    /// Create a buffer for `mode`.
    ///
    /// Fails with a configuration error when the mode spills but no spill
    /// tier is available.
    pub fn new(
        transaction_id: impl Into<String>,
        mode: BufferMode,
        spill: Option<SpillTier>,
    ) -> Result<Self> {
        let transaction_id = transaction_id.into();
        match (mode, spill) {
            (BufferMode::Memory, _) => Ok(Self::memory(transaction_id)),
            (BufferMode::Spill, Some(tier)) => Ok(Self::spilled(transaction_id, tier)),
            (BufferMode::Tiered { spill_threshold }, Some(tier)) => {
                Ok(Self::tiered(transaction_id, tier, spill_threshold))
            }
            (mode, None) => Err(LogMinerError::config(format!(
                "buffer mode {:?} requires a spill store",
                mode
            ))),
        }
    }

    /// Memory-only buffer
    pub fn memory(transaction_id: impl Into<String>) -> Self {
        Self {
            tier: Tier::Memory(MemoryEventBuffer::new(transaction_id)),
            spill: None,
            spill_threshold: None,
        }
    }

    /// Buffer writing every event to the spill tier
    pub fn spilled(transaction_id: impl Into<String>, tier: SpillTier) -> Self {
        Self {
            tier: Tier::Spilled(SpilledEventBuffer::new(transaction_id, tier.clone())),
            spill: Some(tier),
            spill_threshold: None,
        }
    }

    /// Memory buffer promoted to the spill tier at `spill_threshold` events
    pub fn tiered(transaction_id: impl Into<String>, tier: SpillTier, spill_threshold: usize) -> Self {
        Self {
            tier: Tier::Memory(MemoryEventBuffer::new(transaction_id)),
            spill: Some(tier),
            spill_threshold: Some(spill_threshold),
        }
    }

    /// Copy of every event in index order; the buffer is left untouched.
    pub fn events(&self) -> Result<Vec<LogMinerEvent>> {
        match &self.tier {
            Tier::Memory(buffer) => Ok(buffer.events().to_vec()),
            Tier::Spilled(buffer) => (0..buffer.len()).map(|i| buffer.get(i)).collect(),
        }
    }

    fn inner(&self) -> &dyn EventBuffer {
        match &self.tier {
            Tier::Memory(buffer) => buffer,
            Tier::Spilled(buffer) => buffer,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn EventBuffer {
        match &mut self.tier {
            Tier::Memory(buffer) => buffer,
            Tier::Spilled(buffer) => buffer,
        }
    }

    fn should_promote(&self) -> bool {
        match (&self.tier, self.spill_threshold) {
            (Tier::Memory(buffer), Some(threshold)) => buffer.len() >= threshold,
            _ => false,
        }
    }

    /// Copy resident events to the spill tier, then switch over.
    ///
    /// On failure the partially written keys are removed and the memory tier
    /// stays in place, so no event is lost.
    fn promote(&mut self) -> Result<()> {
        let (Tier::Memory(resident), Some(tier)) = (&self.tier, &self.spill) else {
            return Ok(());
        };

        let mut spilled = SpilledEventBuffer::new(resident.transaction_id(), tier.clone());
        for event in resident.events() {
            if let Err(e) = spilled.append(event.clone()) {
                if let Err(cleanup) = spilled.clear() {
                    warn!(
                        transaction_id = %resident.transaction_id(),
                        error = %cleanup,
                        "Failed to remove partial spill after promotion error"
                    );
                }
                return Err(e);
            }
        }

        debug!(
            transaction_id = %resident.transaction_id(),
            events = resident.len(),
            store = tier.store().name(),
            "Promoted transaction buffer to spill tier"
        );
        self.tier = Tier::Spilled(spilled);
        Ok(())
    }
}

impl EventBuffer for TransactionEventBuffer {
    fn transaction_id(&self) -> &str {
        self.inner().transaction_id()
    }

    fn append(&mut self, event: LogMinerEvent) -> Result<()> {
        if self.should_promote() {
            self.promote()?;
        }
        self.inner_mut().append(event)
    }

    fn get(&self, index: usize) -> Result<LogMinerEvent> {
        self.inner().get(index)
    }

    fn remove_at(&mut self, index: usize) -> Result<LogMinerEvent> {
        self.inner_mut().remove_at(index)
    }

    fn remove_if(&mut self, predicate: &mut dyn FnMut(&LogMinerEvent) -> bool) -> Result<usize> {
        self.inner_mut().remove_if(predicate)
    }

    fn len(&self) -> usize {
        self.inner().len()
    }

    fn drain(&mut self) -> Result<Vec<LogMinerEvent>> {
        self.inner_mut().drain()
    }

    fn clear(&mut self) -> Result<()> {
        self.inner_mut().clear()
    }

    fn is_spilled(&self) -> bool {
        self.inner().is_spilled()
    }
}

impl std::fmt::Debug for TransactionEventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionEventBuffer")
            .field("transaction_id", &self.transaction_id())
            .field("len", &self.len())
            .field("spilled", &self.is_spilled())
            .field("spill_threshold", &self.spill_threshold)
            .finish()
    }
}
