//! Spill tier storage backends
//!
//! Large transactions overflow from memory into an embedded key-value store.
//! Every buffered event occupies exactly one key, so the store only needs
//! point operations:
//!
//! - **redb** (default): pure Rust, ACID, zero C dependencies
//! - **memory**: in-process map for tests and memory-only deployments
//!
//! # Key layout
//!
//! ```text
//! ┌──────────────┬─────────────────────┬──────────────────┐
//! │ u32 BE len   │ transaction id utf8 │ u64 BE index     │
//! └──────────────┴─────────────────────┴──────────────────┘
//! ```
//!
//! The length prefix keeps `("tx1", 23)` and `("tx12", 3)` apart, and the
//! big-endian index keeps one transaction's entries contiguous and ordered.
//!
//! # Example
//!
//! ```ignore
//! use rivven_logminer::store::{spill_key, RedbSpillStore, SpillStore};
//!
//! let store = RedbSpillStore::open("/var/lib/rivven/logminer.spill")?;
//! store.put(&spill_key("0a001b00c4170000", 0), b"...")?;
//! store.close()?;
//! ```

mod memory;
mod redb_store;
#[cfg(test)]
pub(crate) mod testing;

pub use memory::MemorySpillStore;
pub use redb_store::RedbSpillStore;

use crate::error::Result;

/// Point-operation key-value store used as the overflow tier.
///
/// Implementations must be safe for concurrent use by many transaction
/// buffers. Keys of different transactions never collide, so no
/// cross-transaction locking is expected from callers.
pub trait SpillStore: Send + Sync {
    /// Backend name for logging
    fn name(&self) -> &'static str;

    /// Read the value stored under `key`
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Remove several keys. Backends may apply this in one write.
    fn delete_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    /// Count keys starting with `prefix`
    fn count_prefix(&self, prefix: &[u8]) -> Result<usize>;

    /// Release the store. Subsequent operations fail with `StoreClosed`;
    /// closing twice is a no-op.
    fn close(&self) -> Result<()>;
}

/// Key prefix shared by every spill entry of one transaction.
pub fn spill_key_prefix(transaction_id: &str) -> Vec<u8> {
    let id = transaction_id.as_bytes();
    let mut key = Vec::with_capacity(4 + id.len() + 8);
    key.extend_from_slice(&(id.len() as u32).to_be_bytes());
    key.extend_from_slice(id);
    key
}

/// Key of the event at `index` within a transaction's spilled buffer.
pub fn spill_key(transaction_id: &str, index: u64) -> Vec<u8> {
    let mut key = spill_key_prefix(transaction_id);
    key.extend_from_slice(&index.to_be_bytes());
    key
}
