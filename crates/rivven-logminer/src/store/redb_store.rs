//! redb-based spill store
//!
//! Pure Rust implementation using redb - zero C dependencies, compiles
//! cleanly for all targets including musl.

use super::SpillStore;
use crate::error::{LogMinerError, Result};
use parking_lot::RwLock;
use redb::{Database, Durability, Table, TableDefinition};
use std::fmt::Display;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Table for spilled events (key: txn id + index, value: encoded event)
const SPILL_TABLE: TableDefinition<&[u8], &[u8]> = TableDefinition::new("logminer_spill");

fn storage_err(e: impl Display) -> LogMinerError {
    LogMinerError::storage(e.to_string())
}

/// redb-backed spill store.
///
/// Opened once per process and shared by every transaction buffer. Spilled
/// entries only live for the lifetime of the process that wrote them: stale
/// entries left behind by a crashed process are cleared on open, since the
/// mining source replays those transactions anyway.
///
/// # Performance Characteristics
///
/// - **Write**: O(log n) per point operation, one write transaction each
/// - **Read**: O(log n) point lookup
///
/// Writes use non-durable commits unless `durable_writes` is enabled; the
/// database stays consistent after a crash either way.
pub struct RedbSpillStore {
    db: RwLock<Option<Database>>,
    path: PathBuf,
    durable_writes: bool,
}

impl RedbSpillStore {
    /// Open (or create) the spill database at `path`.
    ///
    /// Creates parent directories if they don't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let db = Database::create(path)
            .map_err(|e| LogMinerError::storage(format!("Failed to open redb: {}", e)))?;

        let stale = {
            let write_txn = db.begin_write().map_err(storage_err)?;
            let stale = write_txn.delete_table(SPILL_TABLE).map_err(storage_err)?;
            {
                write_txn.open_table(SPILL_TABLE).map_err(storage_err)?;
            }
            write_txn.commit().map_err(storage_err)?;
            stale
        };

        info!(
            path = %path.display(),
            cleared_stale = stale,
            "Opened redb spill store"
        );

        Ok(Self {
            db: RwLock::new(Some(db)),
            path: path.to_path_buf(),
            durable_writes: false,
        })
    }

    /// Fsync every write transaction.
    pub fn with_durable_writes(mut self, durable: bool) -> Self {
        self.durable_writes = durable;
        self
    }

    /// Location of the database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the store has been closed
    pub fn is_closed(&self) -> bool {
        self.db.read().is_none()
    }

    fn write<F>(&self, op: F) -> Result<()>
    where
        F: FnOnce(&mut Table<'_, &'static [u8], &'static [u8]>) -> Result<()>,
    {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(LogMinerError::StoreClosed)?;

        let mut write_txn = db.begin_write().map_err(storage_err)?;
        if !self.durable_writes {
            write_txn.set_durability(Durability::None);
        }
        {
            let mut table = write_txn.open_table(SPILL_TABLE).map_err(storage_err)?;
            op(&mut table)?;
        }
        write_txn.commit().map_err(storage_err)
    }
}

impl SpillStore for RedbSpillStore {
    fn name(&self) -> &'static str {
        "redb"
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(LogMinerError::StoreClosed)?;

        let read_txn = db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(SPILL_TABLE).map_err(storage_err)?;
        let value = table.get(key).map_err(storage_err)?;
        Ok(value.map(|v| v.value().to_vec()))
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write(|table| {
            table.insert(key, value).map_err(storage_err)?;
            Ok(())
        })
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.write(|table| {
            table.remove(key).map_err(storage_err)?;
            Ok(())
        })
    }

    fn delete_many(&self, keys: &[Vec<u8>]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        self.write(|table| {
            for key in keys {
                table.remove(key.as_slice()).map_err(storage_err)?;
            }
            Ok(())
        })
    }

    fn count_prefix(&self, prefix: &[u8]) -> Result<usize> {
        let guard = self.db.read();
        let db = guard.as_ref().ok_or(LogMinerError::StoreClosed)?;

        let read_txn = db.begin_read().map_err(storage_err)?;
        let table = read_txn.open_table(SPILL_TABLE).map_err(storage_err)?;

        let mut count = 0;
        for entry in table.range(prefix..).map_err(storage_err)? {
            let (key, _) = entry.map_err(storage_err)?;
            if !key.value().starts_with(prefix) {
                break;
            }
            count += 1;
        }
        Ok(count)
    }

    fn close(&self) -> Result<()> {
        match self.db.write().take() {
            Some(db) => {
                drop(db);
                info!(path = %self.path.display(), "Closed redb spill store");
            }
            None => debug!("redb spill store already closed"),
        }
        Ok(())
    }
}
