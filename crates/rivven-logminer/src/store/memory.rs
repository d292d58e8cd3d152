//! In-memory spill store

use super::SpillStore;
use crate::error::{LogMinerError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Ordered in-memory map implementing [`SpillStore`].
///
/// Mirrors the redb backend's contract (including close semantics) so the
/// buffer logic can be exercised without touching disk.
#[derive(Debug, Default)]
pub struct MemorySpillStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemorySpillStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored keys
    pub fn key_count(&self) -> usize {
        self.entries.read().len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LogMinerError::StoreClosed);
        }
        Ok(())
    }
}

impl SpillStore for MemorySpillStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.ensure_open()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.ensure_open()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn delete_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        self.ensure_open()?;
        let mut entries = self.entries.write();
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        self.ensure_open()?;
        Ok(self
            .entries
            .read()
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .count())
    }

    fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Memory spill store already closed");
            return Ok(());
        }
        self.entries.write().clear();
        Ok(())
    }
}
