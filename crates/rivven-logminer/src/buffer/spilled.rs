//! Spill-store backed event buffer

use super::EventBuffer;
use crate::codec::EventCodec;
use crate::error::{LogMinerError, Result};
use crate::event::LogMinerEvent;
use crate::store::{spill_key, SpillStore};
use std::fmt;
use std::sync::Arc;
use tracing::{trace, warn};

/// Deletes are issued in chunks so one redb write never grows unbounded.
const DELETE_CHUNK: usize = 1024;

/// Shared handles needed to spill events: the store and the codec.
#[derive(Clone)]
pub struct SpillTier {
    store: Arc<dyn SpillStore>,
    codec: Arc<dyn EventCodec>,
}

impl SpillTier {
    pub fn new(store: Arc<dyn SpillStore>, codec: Arc<dyn EventCodec>) -> Self {
        Self { store, codec }
    }

    pub fn store(&self) -> &Arc<dyn SpillStore> {
        &self.store
    }

    pub fn codec(&self) -> &Arc<dyn EventCodec> {
        &self.codec
    }
}

impl fmt::Debug for SpillTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillTier")
            .field("store", &self.store.name())
            .field("codec", &self.codec.name())
            .finish()
    }
}

/// Events stored one per key under `spill_key(transaction_id, index)`.
///
/// `len` is the live size counter. The store content is authoritative:
/// indices `0..len` exist and nothing above. Every method that writes or
/// deletes keys adjusts `len` in the same place, either in [`Self::push`]
/// or in [`Self::truncate`].
///
/// Removals rewrite several keys. If the store fails partway through, the
/// keys no longer describe the transaction (an event may sit at two
/// indices), so the buffer is poisoned: every operation except
/// [`EventBuffer::clear`] fails with `BufferPoisoned` from then on.
pub struct SpilledEventBuffer {
    transaction_id: String,
    tier: SpillTier,
    len: usize,
    poisoned: bool,
}

impl SpilledEventBuffer {
    pub fn new(transaction_id: impl Into<String>, tier: SpillTier) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            tier,
            len: 0,
            poisoned: false,
        }
    }

    /// Whether a failed multi-key write left the buffer inconsistent
    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn ensure_consistent(&self) -> Result<()> {
        if self.poisoned {
            return Err(LogMinerError::BufferPoisoned {
                transaction_id: self.transaction_id.clone(),
            });
        }
        Ok(())
    }

    fn poison_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if !self.poisoned {
                warn!(
                    transaction_id = %self.transaction_id,
                    error = %e,
                    "Spill write failed mid-update, buffer poisoned"
                );
            }
            self.poisoned = true;
        }
        result
    }

    fn key(&self, index: usize) -> Vec<u8> {
        spill_key(&self.transaction_id, index as u64)
    }

    fn check_bounds(&self, index: usize) -> Result<()> {
        if index >= self.len {
            return Err(LogMinerError::IndexOutOfBounds {
                transaction_id: self.transaction_id.clone(),
                index,
                len: self.len,
            });
        }
        Ok(())
    }

    fn get_raw(&self, index: usize) -> Result<Vec<u8>> {
        self.tier.store.get(&self.key(index))?.ok_or_else(|| {
            LogMinerError::storage(format!(
                "missing spill entry {} for transaction {} (len {})",
                index, self.transaction_id, self.len
            ))
        })
    }

    /// Write encoded bytes at `len` and grow the counter.
    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.tier.store.put(&self.key(self.len), bytes)?;
        self.len += 1;
        Ok(())
    }

    /// Delete every key at or above `new_len` and shrink the counter.
    fn truncate(&mut self, new_len: usize) -> Result<()> {
        if new_len >= self.len {
            return Ok(());
        }
        let keys: Vec<Vec<u8>> = (new_len..self.len).map(|i| self.key(i)).collect();
        for chunk in keys.chunks(DELETE_CHUNK) {
            let deleted = self.tier.store.delete_many(chunk);
            self.poison_on_err(deleted)?;
        }
        self.len = new_len;
        Ok(())
    }

    /// Move every event above `index` down one slot and drop the last key.
    fn shift_down(&mut self, index: usize) -> Result<()> {
        for i in index + 1..self.len {
            let bytes = self.get_raw(i)?;
            self.tier.store.put(&self.key(i - 1), &bytes)?;
        }
        self.truncate(self.len - 1)
    }

    /// Rewrite survivors down to dense indices, then truncate the tail.
    fn compact(&mut self, predicate: &mut dyn FnMut(&LogMinerEvent) -> bool) -> Result<usize> {
        let mut write = 0;
        for read in 0..self.len {
            let bytes = self.get_raw(read)?;
            let event = self.tier.codec.decode(&bytes)?;
            if predicate(&event) {
                continue;
            }
            if write != read {
                self.tier.store.put(&self.key(write), &bytes)?;
            }
            write += 1;
        }

        let removed = self.len - write;
        self.truncate(write)?;
        Ok(removed)
    }
}

impl EventBuffer for SpilledEventBuffer {
    fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    fn append(&mut self, event: LogMinerEvent) -> Result<()> {
        self.ensure_consistent()?;
        let bytes = self.tier.codec.encode(&event)?;
        self.push(&bytes)
    }

    fn get(&self, index: usize) -> Result<LogMinerEvent> {
        self.ensure_consistent()?;
        self.check_bounds(index)?;
        self.tier.codec.decode(&self.get_raw(index)?)
    }

    fn remove_at(&mut self, index: usize) -> Result<LogMinerEvent> {
        self.ensure_consistent()?;
        self.check_bounds(index)?;
        let removed = self.tier.codec.decode(&self.get_raw(index)?)?;

        let shifted = self.shift_down(index);
        self.poison_on_err(shifted)?;

        trace!(
            transaction_id = %self.transaction_id,
            index,
            len = self.len,
            "Removed spilled event"
        );
        Ok(removed)
    }

    fn remove_if(&mut self, predicate: &mut dyn FnMut(&LogMinerEvent) -> bool) -> Result<usize> {
        self.ensure_consistent()?;
        let compacted = self.compact(predicate);
        self.poison_on_err(compacted)
    }

    fn len(&self) -> usize {
        self.len
    }

    fn drain(&mut self) -> Result<Vec<LogMinerEvent>> {
        self.ensure_consistent()?;
        let mut events = Vec::with_capacity(self.len);
        for i in 0..self.len {
            events.push(self.tier.codec.decode(&self.get_raw(i)?)?);
        }
        self.truncate(0)?;
        Ok(events)
    }

    /// Deletes every key up to `len`. Works on a poisoned buffer and
    /// leaves it consistent again once the deletes succeed.
    fn clear(&mut self) -> Result<()> {
        self.truncate(0)?;
        self.poisoned = false;
        Ok(())
    }

    fn is_spilled(&self) -> bool {
        true
    }
}

impl fmt::Debug for SpilledEventBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpilledEventBuffer")
            .field("transaction_id", &self.transaction_id)
            .field("tier", &self.tier)
            .field("len", &self.len)
            .field("poisoned", &self.poisoned)
            .finish()
    }
}
