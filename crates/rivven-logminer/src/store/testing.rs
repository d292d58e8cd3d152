//! Store wrapper with injectable write failures, for unit tests

use super::{MemorySpillStore, SpillStore};
use crate::error::{LogMinerError, Result};
use std::sync::atomic::{AtomicI64, Ordering};

/// Delegates to a [`MemorySpillStore`] until its put budget runs out.
///
/// A budget of `-1` means unlimited. Once the budget reaches zero every
/// `put` fails with a storage error; reads and deletes keep working.
#[derive(Debug)]
pub struct FaultyStore {
    inner: MemorySpillStore,
    puts_left: AtomicI64,
}

impl Default for FaultyStore {
    fn default() -> Self {
        Self {
            inner: MemorySpillStore::new(),
            puts_left: AtomicI64::new(-1),
        }
    }
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Let `n` more puts succeed, then fail every following one
    pub fn fail_puts_after(&self, n: i64) {
        self.puts_left.store(n, Ordering::SeqCst);
    }

    pub fn key_count(&self) -> usize {
        self.inner.key_count()
    }
}

impl SpillStore for FaultyStore {
    fn name(&self) -> &'static str {
        "faulty"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let left = self.puts_left.load(Ordering::SeqCst);
        if left == 0 {
            return Err(LogMinerError::storage("injected put failure"));
        }
        if left > 0 {
            self.puts_left.fetch_sub(1, Ordering::SeqCst);
        }
        self.inner.put(key, value)
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.delete(key)
    }

    fn delete_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        self.inner.delete_many(keys)
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        self.inner.count_prefix(prefix)
    }

    fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
