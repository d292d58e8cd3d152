//! # Transaction Registry
//!
//! Tracks every open source transaction by id. The registry owns the spill
//! tier handle shared by all transaction buffers and closes it exactly once
//! on [`TransactionRegistry::shutdown`].
//!
//! ```text
//! DML ──▶ resolve(id) ──▶ Transaction::add_event
//! COMMIT ──▶ commit(id) ──▶ CommittedTransaction (events sorted by SCN)
//! ROLLBACK ──▶ rollback(id) ──▶ buffer discarded
//! ```
//!
//! Committed and rolled back ids are remembered in a bounded cache so a
//! restarted session that replays redo can tell a finished transaction from
//! a new one.

use crate::buffer::{BufferMode, SpillTier, TransactionEventBuffer};
use crate::config::LogMinerConfig;
use crate::error::{LogMinerError, Result};
use crate::event::{LogMinerEvent, Scn};
use crate::store::{RedbSpillStore, SpillStore};
use crate::transaction::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A committed transaction ready for the sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedTransaction {
    pub transaction_id: String,
    pub user_name: Option<String>,
    pub start_scn: Scn,
    pub commit_scn: Scn,
    /// Commit timestamp (Unix epoch millis)
    pub commit_time: i64,
    /// Events in ascending SCN order
    pub events: Vec<LogMinerEvent>,
}

impl CommittedTransaction {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Statistics for the transaction registry.
#[derive(Debug, Default)]
pub struct RegistryStats {
    /// Transactions registered
    transactions_created: AtomicU64,
    /// Transactions committed
    transactions_committed: AtomicU64,
    /// Transactions rolled back
    transactions_rolled_back: AtomicU64,
    /// Transactions discarded as abandoned
    transactions_abandoned: AtomicU64,
    /// Retired transactions whose buffer had reached the spill tier
    transactions_spilled: AtomicU64,
    /// Events handed out by commits
    events_committed: AtomicU64,
    /// Events removed by undo records
    events_undone: AtomicU64,
}

impl RegistryStats {
    fn record_created(&self) {
        self.transactions_created.fetch_add(1, Ordering::Relaxed);
    }

    fn record_commit(&self, event_count: u64, spilled: bool) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.events_committed
            .fetch_add(event_count, Ordering::Relaxed);
        self.record_spilled(spilled);
    }

    fn record_rollback(&self, spilled: bool) {
        self.transactions_rolled_back
            .fetch_add(1, Ordering::Relaxed);
        self.record_spilled(spilled);
    }

    fn record_abandoned(&self, spilled: bool) {
        self.transactions_abandoned.fetch_add(1, Ordering::Relaxed);
        self.record_spilled(spilled);
    }

    fn record_spilled(&self, spilled: bool) {
        if spilled {
            self.transactions_spilled.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_undone(&self, count: u64) {
        self.events_undone.fetch_add(count, Ordering::Relaxed);
    }

    /// Get registered transactions.
    pub fn transactions_created(&self) -> u64 {
        self.transactions_created.load(Ordering::Relaxed)
    }

    /// Get committed transactions.
    pub fn transactions_committed(&self) -> u64 {
        self.transactions_committed.load(Ordering::Relaxed)
    }

    /// Get rolled back transactions.
    pub fn transactions_rolled_back(&self) -> u64 {
        self.transactions_rolled_back.load(Ordering::Relaxed)
    }

    /// Get abandoned transactions.
    pub fn transactions_abandoned(&self) -> u64 {
        self.transactions_abandoned.load(Ordering::Relaxed)
    }

    /// Get retired transactions that had spilled.
    pub fn transactions_spilled(&self) -> u64 {
        self.transactions_spilled.load(Ordering::Relaxed)
    }

    /// Get committed events.
    pub fn events_committed(&self) -> u64 {
        self.events_committed.load(Ordering::Relaxed)
    }

    /// Get undone events.
    pub fn events_undone(&self) -> u64 {
        self.events_undone.load(Ordering::Relaxed)
    }
}

/// Bounded FIFO set of retired transaction ids.
#[derive(Debug)]
struct RetiredIds {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl RetiredIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    fn insert(&mut self, transaction_id: &str) {
        if self.capacity == 0 || !self.ids.insert(transaction_id.to_string()) {
            return;
        }
        self.order.push_back(transaction_id.to_string());
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
    }

    fn forget(&mut self, transaction_id: &str) {
        if self.ids.remove(transaction_id) {
            self.order.retain(|id| id != transaction_id);
        }
    }

    fn contains(&self, transaction_id: &str) -> bool {
        self.ids.contains(transaction_id)
    }
}

/// Map of open transactions keyed by transaction id.
pub struct TransactionRegistry {
    buffer_mode: BufferMode,
    spill: Option<SpillTier>,
    transactions: HashMap<String, Transaction>,
    retired: RetiredIds,
    stats: Arc<RegistryStats>,
    shut_down: bool,
}

impl TransactionRegistry {
    /// Create a registry.
    ///
    /// `spill` is required unless `buffer_mode` is [`BufferMode::Memory`].
    pub fn new(buffer_mode: BufferMode, spill: Option<SpillTier>) -> Result<Self> {
        if buffer_mode.requires_spill() && spill.is_none() {
            return Err(LogMinerError::config(format!(
                "buffer mode {:?} requires a spill store",
                buffer_mode
            )));
        }
        Ok(Self {
            buffer_mode,
            spill,
            transactions: HashMap::new(),
            retired: RetiredIds::new(0),
            stats: Arc::new(RegistryStats::default()),
            shut_down: false,
        })
    }

    /// Memory-only registry
    pub fn in_memory() -> Self {
        Self {
            buffer_mode: BufferMode::Memory,
            spill: None,
            transactions: HashMap::new(),
            retired: RetiredIds::new(0),
            stats: Arc::new(RegistryStats::default()),
            shut_down: false,
        }
    }

    /// Build a registry from configuration, opening the redb spill store
    /// when the buffer mode needs one.
    pub fn from_config(config: &LogMinerConfig) -> Result<Self> {
        let spill = if config.buffer_mode.requires_spill() {
            let store: Arc<dyn SpillStore> = Arc::new(
                RedbSpillStore::open(&config.spill.path)?
                    .with_durable_writes(config.spill.durable_writes),
            );
            Some(SpillTier::new(store, config.spill.codec.build()))
        } else {
            None
        };
        Ok(Self::new(config.buffer_mode, spill)?.with_retired_cache(config.retired_cache_size))
    }

    /// Remember up to `capacity` retired transaction ids.
    pub fn with_retired_cache(mut self, capacity: usize) -> Self {
        self.retired = RetiredIds::new(capacity);
        self
    }

    /// Get statistics.
    pub fn stats(&self) -> &Arc<RegistryStats> {
        &self.stats
    }

    pub fn buffer_mode(&self) -> BufferMode {
        self.buffer_mode
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down {
            return Err(LogMinerError::StoreClosed);
        }
        Ok(())
    }

    /// Get the open transaction for `transaction_id`, registering it first
    /// if needed.
    ///
    /// The first observation wins: start values passed for an id that is
    /// already open are ignored.
    pub fn resolve(
        &mut self,
        transaction_id: &str,
        start_scn: Scn,
        change_time: i64,
        user_name: Option<&str>,
    ) -> Result<&mut Transaction> {
        self.ensure_running()?;
        match self.transactions.entry(transaction_id.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let buffer = TransactionEventBuffer::new(
                    transaction_id,
                    self.buffer_mode,
                    self.spill.clone(),
                )?;
                let mut transaction = Transaction::new(
                    transaction_id,
                    start_scn,
                    change_time,
                    user_name.map(str::to_string),
                    buffer,
                );
                transaction.start();
                self.retired.forget(transaction_id);
                self.stats.record_created();
                debug!(%transaction_id, %start_scn, "Registered transaction");
                Ok(entry.insert(transaction))
            }
        }
    }

    /// Remove a committed transaction and hand out its events in ascending
    /// SCN order. Spilled entries are deleted before this returns.
    ///
    /// Returns `None` for an unknown id.
    pub fn commit(
        &mut self,
        transaction_id: &str,
        commit_scn: Scn,
        commit_time: i64,
    ) -> Result<Option<CommittedTransaction>> {
        self.ensure_running()?;
        let Some(mut transaction) = self.transactions.remove(transaction_id) else {
            debug!(%transaction_id, %commit_scn, "Commit for unknown transaction");
            return Ok(None);
        };

        let spilled = transaction.is_spilled();
        self.retired.insert(transaction_id);
        let events = match transaction.drain_ordered() {
            Ok(events) => events,
            Err(e) => {
                if let Err(cleanup) = transaction.discard() {
                    warn!(%transaction_id, error = %cleanup, "Failed to discard transaction after drain error");
                }
                return Err(e);
            }
        };

        self.stats.record_commit(events.len() as u64, spilled);
        debug!(
            %transaction_id,
            %commit_scn,
            events = events.len(),
            spilled,
            "Committed transaction"
        );

        Ok(Some(CommittedTransaction {
            transaction_id: transaction.transaction_id().to_string(),
            user_name: transaction.user_name().map(str::to_string),
            start_scn: transaction.start_scn(),
            commit_scn,
            commit_time,
            events,
        }))
    }

    /// Remove a rolled back transaction and discard its events.
    ///
    /// Returns `false` for an unknown id.
    pub fn rollback(&mut self, transaction_id: &str) -> Result<bool> {
        self.ensure_running()?;
        let Some(mut transaction) = self.transactions.remove(transaction_id) else {
            debug!(%transaction_id, "Rollback for unknown transaction");
            return Ok(false);
        };

        let spilled = transaction.is_spilled();
        let discarded = transaction.buffered_len();
        self.retired.insert(transaction_id);
        transaction.discard()?;
        self.stats.record_rollback(spilled);
        debug!(%transaction_id, discarded, spilled, "Rolled back transaction");
        Ok(true)
    }

    /// Undo every buffered change of `row_id` within a transaction.
    ///
    /// An unknown transaction or a row with no buffered change yields `0`.
    /// If the undo fails the buffer can no longer be trusted: the
    /// transaction is discarded and its id retired before the error is
    /// returned, so a later COMMIT for it emits nothing.
    pub fn undo(&mut self, transaction_id: &str, row_id: &str) -> Result<usize> {
        self.ensure_running()?;
        let Some(transaction) = self.transactions.get_mut(transaction_id) else {
            debug!(%transaction_id, row_id, "Undo for unknown transaction");
            return Ok(0);
        };
        match transaction.remove_events_with_row_id(row_id) {
            Ok(removed) => {
                self.stats.record_undone(removed as u64);
                Ok(removed)
            }
            Err(e) => {
                self.drop_failed(transaction_id, &e);
                Err(e)
            }
        }
    }

    fn drop_failed(&mut self, transaction_id: &str, error: &LogMinerError) {
        let Some(mut transaction) = self.transactions.remove(transaction_id) else {
            return;
        };
        let spilled = transaction.is_spilled();
        warn!(
            %transaction_id,
            error = %error,
            events = transaction.buffered_len(),
            "Discarding transaction after failed buffer update"
        );
        self.retired.insert(transaction_id);
        if let Err(cleanup) = transaction.discard() {
            warn!(%transaction_id, error = %cleanup, "Failed to discard transaction buffer");
        }
        self.stats.record_abandoned(spilled);
    }

    /// Discard every open transaction that started before `scn`.
    ///
    /// Returns the discarded ids. Discarded ids are treated as retired.
    pub fn abandon_older_than(&mut self, scn: Scn) -> Result<Vec<String>> {
        self.ensure_running()?;
        let mut abandoned: Vec<String> = self
            .transactions
            .values()
            .filter(|t| t.start_scn() < scn)
            .map(|t| t.transaction_id().to_string())
            .collect();
        abandoned.sort();

        for transaction_id in &abandoned {
            if let Some(mut transaction) = self.transactions.remove(transaction_id) {
                let spilled = transaction.is_spilled();
                warn!(
                    %transaction_id,
                    start_scn = %transaction.start_scn(),
                    events = transaction.buffered_len(),
                    "Abandoning long running transaction"
                );
                self.retired.insert(transaction_id);
                transaction.discard()?;
                self.stats.record_abandoned(spilled);
            }
        }
        Ok(abandoned)
    }

    pub fn active_count(&self) -> usize {
        self.transactions.len()
    }

    /// Ids of every open transaction, sorted
    pub fn active_transaction_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.transactions.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn get(&self, transaction_id: &str) -> Option<&Transaction> {
        self.transactions.get(transaction_id)
    }

    pub fn contains(&self, transaction_id: &str) -> bool {
        self.transactions.contains_key(transaction_id)
    }

    /// Smallest start SCN among open transactions.
    ///
    /// Mining must resume at or below this position to see every change of
    /// the open transactions again.
    pub fn oldest_active_scn(&self) -> Option<Scn> {
        self.transactions.values().map(|t| t.start_scn()).min()
    }

    /// Events retained across all open transactions
    pub fn buffered_events(&self) -> usize {
        self.transactions.values().map(|t| t.buffered_len()).sum()
    }

    /// Whether `transaction_id` was committed, rolled back or abandoned
    /// recently enough to still be in the retired cache
    pub fn was_recently_retired(&self, transaction_id: &str) -> bool {
        self.retired.contains(transaction_id)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Discard every open transaction and close the spill store.
    ///
    /// Only the first call does anything.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.shut_down {
            debug!("Transaction registry already shut down");
            return Ok(());
        }
        self.shut_down = true;

        let open = self.transactions.len();
        let mut first_error = None;
        for (transaction_id, mut transaction) in self.transactions.drain() {
            if let Err(e) = transaction.discard() {
                warn!(%transaction_id, error = %e, "Failed to discard transaction on shutdown");
                first_error.get_or_insert(e);
            }
        }

        if let Some(spill) = &self.spill {
            if let Err(e) = spill.store().close() {
                first_error.get_or_insert(e);
            }
        }

        info!(discarded = open, "Transaction registry shut down");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for TransactionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionRegistry")
            .field("buffer_mode", &self.buffer_mode)
            .field("spill", &self.spill)
            .field("active", &self.transactions.len())
            .field("shut_down", &self.shut_down)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::PostcardCodec;
    use crate::event::TableId;
    use crate::store::testing::FaultyStore;
    use crate::store::{spill_key_prefix, MemorySpillStore};

    fn users() -> TableId {
        TableId::new("ORCLPDB1", "NEPTUNE", "USERS")
    }

    fn insert(scn: u64, row_id: &str) -> LogMinerEvent {
        LogMinerEvent::insert(scn, users(), row_id, vec![], 0)
    }

    fn spilling_registry(threshold: usize) -> (Arc<MemorySpillStore>, TransactionRegistry) {
        let store = Arc::new(MemorySpillStore::new());
        let tier = SpillTier::new(store.clone(), Arc::new(PostcardCodec));
        let registry = TransactionRegistry::new(
            BufferMode::Tiered {
                spill_threshold: threshold,
            },
            Some(tier),
        )
        .unwrap()
        .with_retired_cache(16);
        (store, registry)
    }

    #[test]
    fn test_resolve_first_write_wins() {
        let mut registry = TransactionRegistry::in_memory();
        registry
            .resolve("txn-1", Scn::new(10), 1000, Some("NEPKISA"))
            .unwrap()
            .add_event(insert(10, "r1"))
            .unwrap();
        let txn = registry
            .resolve("txn-1", Scn::new(99), 9999, Some("OTHER"))
            .unwrap();

        assert_eq!(txn.start_scn(), Scn::new(10));
        assert_eq!(txn.change_time(), 1000);
        assert_eq!(txn.user_name(), Some("NEPKISA"));
        assert_eq!(txn.event_count(), 1);
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.stats().transactions_created(), 1);
    }

    #[test]
    fn test_commit_sorts_by_scn() {
        let mut registry = TransactionRegistry::in_memory();
        let txn = registry.resolve("txn-1", Scn::new(5), 0, None).unwrap();
        txn.add_event(insert(7, "a")).unwrap();
        txn.add_event(insert(5, "b")).unwrap();
        txn.add_event(insert(7, "c")).unwrap();

        let committed = registry
            .commit("txn-1", Scn::new(8), 1234)
            .unwrap()
            .unwrap();
        let rows: Vec<&str> = committed.events.iter().map(|e| e.row_id.as_str()).collect();
        assert_eq!(rows, vec!["b", "a", "c"]);
        assert_eq!(committed.start_scn, Scn::new(5));
        assert_eq!(committed.commit_scn, Scn::new(8));
        assert_eq!(committed.commit_time, 1234);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.stats().events_committed(), 3);
    }

    #[test]
    fn test_commit_unknown_is_none() {
        let mut registry = TransactionRegistry::in_memory();
        assert!(registry.commit("nope", Scn::new(1), 0).unwrap().is_none());
        assert!(!registry.rollback("nope").unwrap());
        assert_eq!(registry.undo("nope", "r1").unwrap(), 0);
    }

    #[test]
    fn test_large_transaction_spills_and_commits() {
        let (store, mut registry) = spilling_registry(100);
        let txn = registry.resolve("big", Scn::new(1), 0, None).unwrap();
        for scn in 1..=1000 {
            txn.add_event(insert(scn, "row")).unwrap();
        }
        assert!(registry.get("big").unwrap().is_spilled());
        assert_eq!(
            store.count_prefix(&spill_key_prefix("big")).unwrap(),
            1000
        );

        let committed = registry
            .commit("big", Scn::new(1001), 0)
            .unwrap()
            .unwrap();
        assert_eq!(committed.len(), 1000);
        assert!(committed
            .events
            .windows(2)
            .all(|w| w[0].scn <= w[1].scn));
        assert_eq!(store.key_count(), 0);
        assert_eq!(registry.stats().transactions_spilled(), 1);
    }

    #[test]
    fn test_rollback_deletes_spilled_entries() {
        let (store, mut registry) = spilling_registry(2);
        let txn = registry.resolve("txn", Scn::new(1), 0, None).unwrap();
        for scn in 1..=5 {
            txn.add_event(insert(scn, "row")).unwrap();
        }
        assert_eq!(store.key_count(), 5);

        assert!(registry.rollback("txn").unwrap());
        assert_eq!(store.key_count(), 0);
        assert!(!registry.contains("txn"));
        assert_eq!(registry.stats().transactions_rolled_back(), 1);
    }

    #[test]
    fn test_undo_through_registry() {
        let mut registry = TransactionRegistry::in_memory();
        let txn = registry.resolve("txn", Scn::new(1), 0, None).unwrap();
        txn.add_event(insert(1, "AAA")).unwrap();
        txn.add_event(insert(2, "BBB")).unwrap();
        txn.add_event(insert(3, "AAA")).unwrap();

        assert_eq!(registry.undo("txn", "AAA").unwrap(), 2);
        assert_eq!(registry.undo("txn", "ZZZ").unwrap(), 0);
        assert_eq!(registry.buffered_events(), 1);
        assert_eq!(registry.get("txn").unwrap().event_count(), 3);
        assert_eq!(registry.stats().events_undone(), 2);
    }

    #[test]
    fn test_failed_undo_discards_transaction() {
        let store = Arc::new(FaultyStore::new());
        let tier = SpillTier::new(store.clone(), Arc::new(PostcardCodec));
        let mut registry = TransactionRegistry::new(BufferMode::Spill, Some(tier))
            .unwrap()
            .with_retired_cache(16);

        let txn = registry.resolve("txn-1", Scn::new(1), 0, None).unwrap();
        for (scn, row) in [(1, "a"), (2, "b"), (3, "c"), (4, "d")] {
            txn.add_event(insert(scn, row)).unwrap();
        }
        registry
            .resolve("txn-2", Scn::new(5), 0, None)
            .unwrap()
            .add_event(insert(5, "a"))
            .unwrap();

        // Undo of "a" in txn-1 rewrites three keys; the second rewrite fails.
        store.fail_puts_after(1);
        assert!(registry.undo("txn-1", "a").is_err());

        assert!(!registry.contains("txn-1"));
        assert!(registry.was_recently_retired("txn-1"));
        assert_eq!(store.count_prefix(&spill_key_prefix("txn-1")).unwrap(), 0);
        assert_eq!(registry.stats().transactions_abandoned(), 1);
        assert_eq!(registry.stats().events_undone(), 0);

        // The COMMIT arriving later finds nothing to emit.
        store.fail_puts_after(-1);
        assert!(registry.commit("txn-1", Scn::new(9), 0).unwrap().is_none());

        let other = registry.commit("txn-2", Scn::new(10), 0).unwrap().unwrap();
        assert_eq!(other.len(), 1);
    }

    #[test]
    fn test_retired_ids_are_remembered() {
        let (_, mut registry) = spilling_registry(10);
        registry.resolve("a", Scn::new(1), 0, None).unwrap();
        registry.resolve("b", Scn::new(2), 0, None).unwrap();
        registry.commit("a", Scn::new(3), 0).unwrap();
        registry.rollback("b").unwrap();

        assert!(registry.was_recently_retired("a"));
        assert!(registry.was_recently_retired("b"));
        assert!(!registry.was_recently_retired("c"));

        registry.resolve("a", Scn::new(10), 0, None).unwrap();
        assert!(!registry.was_recently_retired("a"));
    }

    #[test]
    fn test_retired_cache_is_bounded() {
        let mut registry = TransactionRegistry::in_memory().with_retired_cache(2);
        for id in ["a", "b", "c"] {
            registry.resolve(id, Scn::new(1), 0, None).unwrap();
            registry.rollback(id).unwrap();
        }
        assert!(!registry.was_recently_retired("a"));
        assert!(registry.was_recently_retired("b"));
        assert!(registry.was_recently_retired("c"));
    }

    #[test]
    fn test_oldest_active_scn_and_ids() {
        let mut registry = TransactionRegistry::in_memory();
        assert_eq!(registry.oldest_active_scn(), None);
        registry.resolve("b", Scn::new(20), 0, None).unwrap();
        registry.resolve("a", Scn::new(10), 0, None).unwrap();
        registry.resolve("c", Scn::new(30), 0, None).unwrap();

        assert_eq!(registry.oldest_active_scn(), Some(Scn::new(10)));
        assert_eq!(registry.active_transaction_ids(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_abandon_older_than() {
        let (store, mut registry) = spilling_registry(0);
        for (id, scn) in [("old", 5), ("older", 1), ("new", 50)] {
            registry
                .resolve(id, Scn::new(scn), 0, None)
                .unwrap()
                .add_event(insert(scn, "row"))
                .unwrap();
        }

        let abandoned = registry.abandon_older_than(Scn::new(10)).unwrap();
        assert_eq!(abandoned, vec!["old", "older"]);
        assert_eq!(registry.active_transaction_ids(), vec!["new"]);
        assert_eq!(store.key_count(), 1);
        assert!(registry.was_recently_retired("old"));
        assert_eq!(registry.stats().transactions_abandoned(), 2);
    }

    #[test]
    fn test_shutdown_closes_store_once() {
        let (store, mut registry) = spilling_registry(0);
        registry
            .resolve("txn", Scn::new(1), 0, None)
            .unwrap()
            .add_event(insert(1, "row"))
            .unwrap();

        registry.shutdown().unwrap();
        registry.shutdown().unwrap();
        assert!(registry.is_shut_down());
        assert_eq!(registry.active_count(), 0);
        assert!(matches!(
            store.put(b"k", b"v").unwrap_err(),
            LogMinerError::StoreClosed
        ));
        assert!(matches!(
            registry.resolve("txn", Scn::new(2), 0, None).unwrap_err(),
            LogMinerError::StoreClosed
        ));
    }

    #[test]
    fn test_spill_mode_requires_tier() {
        let err = TransactionRegistry::new(BufferMode::Spill, None).unwrap_err();
        assert!(matches!(err, LogMinerError::Config(_)));
    }

    #[test]
    fn test_from_config_opens_redb() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogMinerConfig::builder()
            .spill_path(dir.path().join("spill.redb"))
            .buffer_mode(BufferMode::Spill)
            .build()
            .unwrap();

        let mut registry = TransactionRegistry::from_config(&config).unwrap();
        registry
            .resolve("txn", Scn::new(1), 0, None)
            .unwrap()
            .add_event(insert(1, "row"))
            .unwrap();
        assert!(registry.get("txn").unwrap().is_spilled());
        registry.shutdown().unwrap();
    }
}
