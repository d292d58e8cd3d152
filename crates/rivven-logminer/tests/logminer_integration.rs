//! End-to-end buffering tests against a real redb spill store.

mod harness;

use harness::*;
use rivven_logminer::buffer::SpillTier;
use rivven_logminer::codec::{JsonCodec, PostcardCodec};
use rivven_logminer::store::{spill_key, spill_key_prefix};
use rivven_logminer::{
    Applied, BufferMode, CollectingSink, LogMinerError, LogReporter, MinedRecord,
    RedbSpillStore, RetryPolicy, Scn, SessionFaultKind, SessionRetryController, SpillStore,
    TransactionProcessor, TransactionRegistry,
};
use std::sync::Arc;

fn redb_processor(
    threshold: usize,
) -> (
    tempfile::TempDir,
    Arc<RedbSpillStore>,
    Arc<CollectingSink>,
    TransactionProcessor,
) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbSpillStore::open(dir.path().join("spill.redb")).unwrap());
    let tier = SpillTier::new(store.clone(), Arc::new(PostcardCodec));
    let registry = TransactionRegistry::new(
        BufferMode::Tiered {
            spill_threshold: threshold,
        },
        Some(tier),
    )
    .unwrap()
    .with_retired_cache(1_000);
    let sink = Arc::new(CollectingSink::new());
    let processor = TransactionProcessor::new(registry, sink.clone());
    (dir, store, sink, processor)
}

#[tokio::test]
async fn test_large_transaction_spills_and_commits_in_order() {
    init_test_logging();
    let (_dir, store, sink, mut processor) = redb_processor(100);

    // Apply in descending SCN order to exercise the commit sort
    for scn in (1..=1000u64).rev() {
        processor
            .apply(insert("0a001b00c4170000", scn, &format!("AAAR{:05}", scn)))
            .await
            .unwrap();
    }
    let txn = processor.registry().get("0a001b00c4170000").unwrap();
    assert!(txn.is_spilled());
    assert_eq!(txn.buffered_len(), 1000);
    assert_eq!(
        store
            .count_prefix(&spill_key_prefix("0a001b00c4170000"))
            .unwrap(),
        1000
    );

    let applied = processor
        .apply(MinedRecord::commit("0a001b00c4170000", 1001, 0))
        .await
        .unwrap();
    assert_eq!(applied, Applied::Committed { events: 1000 });

    let events = sink.events();
    assert_eq!(events.len(), 1000);
    let scns: Vec<u64> = events.iter().map(|e| e.scn.value()).collect();
    assert_eq!(scns, (1..=1000).collect::<Vec<_>>());
    assert_eq!(
        store
            .count_prefix(&spill_key_prefix("0a001b00c4170000"))
            .unwrap(),
        0
    );
    assert_eq!(processor.registry().stats().transactions_spilled(), 1);
}

#[tokio::test]
async fn test_undo_in_spilled_transaction() {
    init_test_logging();
    let (_dir, store, sink, mut processor) = redb_processor(2);

    for (scn, row) in [(1, "A"), (2, "B"), (3, "A"), (4, "C"), (5, "A")] {
        processor.apply(insert("txn", scn, row)).await.unwrap();
    }
    assert_eq!(
        processor.apply(undo("txn", 6, "A")).await.unwrap(),
        Applied::Undone(3)
    );
    assert_eq!(store.count_prefix(&spill_key_prefix("txn")).unwrap(), 2);

    let txn = processor.registry().get("txn").unwrap();
    assert_eq!(txn.event_count(), 5);
    assert_eq!(txn.buffered_len(), 2);

    processor
        .apply(MinedRecord::commit("txn", 7, 0))
        .await
        .unwrap();
    let rows: Vec<String> = sink.events().into_iter().map(|e| e.row_id).collect();
    assert_eq!(rows, vec!["B", "C"]);
    assert_eq!(store.count_prefix(&spill_key_prefix("txn")).unwrap(), 0);
}

#[tokio::test]
async fn test_rollback_of_spilled_transaction_reclaims_keys() {
    init_test_logging();
    let (_dir, store, sink, mut processor) = redb_processor(10);

    for scn in 1..=50 {
        processor.apply(insert("doomed", scn, "r")).await.unwrap();
        processor.apply(insert("kept", scn, "r")).await.unwrap();
    }
    processor
        .apply(MinedRecord::rollback("doomed", 51))
        .await
        .unwrap();

    assert_eq!(store.count_prefix(&spill_key_prefix("doomed")).unwrap(), 0);
    assert_eq!(store.count_prefix(&spill_key_prefix("kept")).unwrap(), 50);
    assert!(sink.is_empty());

    processor
        .apply(MinedRecord::commit("kept", 52, 0))
        .await
        .unwrap();
    assert_eq!(sink.len(), 1);
    assert_eq!(sink.transactions()[0].events.len(), 50);
}

#[tokio::test]
async fn test_interleaved_transactions_stay_separate() {
    init_test_logging();
    let (_dir, _store, sink, mut processor) = redb_processor(3);

    let records = vec![
        insert("t1", 1, "a"),
        insert("t2", 2, "b"),
        insert("t1", 3, "c"),
        insert("t3", 4, "d"),
        insert("t2", 5, "e"),
        MinedRecord::commit("t2", 6, 0),
        insert("t1", 7, "f"),
        insert("t1", 8, "g"),
        MinedRecord::rollback("t3", 9),
        MinedRecord::commit("t1", 10, 0),
    ];
    for record in records {
        processor.apply(record).await.unwrap();
    }

    let committed = sink.transactions();
    assert_eq!(committed.len(), 2);
    assert_eq!(committed[0].transaction_id, "t2");
    assert_eq!(committed[1].transaction_id, "t1");
    let t1_rows: Vec<&str> = committed[1]
        .events
        .iter()
        .map(|e| e.row_id.as_str())
        .collect();
    assert_eq!(t1_rows, vec!["a", "c", "f", "g"]);
    assert_eq!(committed[1].user_name.as_deref(), Some("NEPKISA"));
    assert_eq!(processor.registry().active_count(), 0);
}

fn spilled_fault_script() -> Vec<Step> {
    let mut steps: Vec<Step> = (1..=20).map(|scn| insert("big", scn, "r").into()).collect();
    steps.push(Step::Fail(
        SessionFaultKind::Other,
        "Closed Connection: No more data to read from socket",
    ));
    steps.extend((21..=30).map(|scn| Step::from(insert("big", scn, "r"))));
    steps.push(MinedRecord::commit("big", 31, 0).into());
    steps
}

#[tokio::test]
async fn test_session_fault_during_spilled_transaction() {
    init_test_logging();
    for mut session in [
        ScriptedSession::new(spilled_fault_script()),
        ScriptedSession::new(spilled_fault_script()).exclusive(),
    ] {
        let (_dir, store, sink, mut processor) = redb_processor(5);
        let mut controller = SessionRetryController::new(
            RetryPolicy::immediate(3),
            Default::default(),
            Arc::new(LogReporter),
        );

        let applied = controller.run(&mut session, &mut processor).await.unwrap();

        assert_eq!(applied, 31);
        assert_eq!(session.opened_at, vec![Scn::NULL, Scn::new(20)]);
        assert_eq!(controller.metrics().reopens(), 1);
        assert_eq!(controller.resume_scn(), Scn::new(31));

        let emitted: Vec<u64> = sink.events().iter().map(|e| e.scn.value()).collect();
        assert_eq!(emitted, (1..=30).collect::<Vec<u64>>());
        assert_eq!(store.count_prefix(&spill_key_prefix("big")).unwrap(), 0);
    }
}

#[tokio::test]
async fn test_reopen_keeps_interleaved_transactions_exact() {
    init_test_logging();
    let (_dir, _store, sink, mut processor) = redb_processor(2);
    let mut controller = SessionRetryController::new(
        RetryPolicy::immediate(3),
        Default::default(),
        Arc::new(LogReporter),
    );
    let mut session = ScriptedSession::new(vec![
        insert("t1", 1, "a").into(),
        insert("t2", 2, "x").into(),
        insert("t1", 3, "b").into(),
        MinedRecord::commit("t2", 4, 0).into(),
        insert("t1", 5, "c").into(),
        Step::Fail(SessionFaultKind::Database, "ORA-03135: connection lost contact"),
        undo("t1", 6, "b").into(),
        insert("t1", 7, "d").into(),
        MinedRecord::commit("t1", 8, 0).into(),
    ]);

    controller.run(&mut session, &mut processor).await.unwrap();

    assert_eq!(session.opened_at, vec![Scn::NULL, Scn::new(5)]);
    let committed = sink.transactions();
    assert_eq!(committed.len(), 2);
    let rows = |i: usize| -> Vec<String> {
        committed[i].events.iter().map(|e| e.row_id.clone()).collect()
    };
    assert_eq!(rows(0), vec!["x"]);
    assert_eq!(rows(1), vec!["a", "c", "d"]);
}

#[tokio::test]
async fn test_fatal_fault_keeps_open_transactions() {
    init_test_logging();
    let (_dir, store, sink, mut processor) = redb_processor(1);
    let mut controller = SessionRetryController::new(
        RetryPolicy::immediate(3),
        Default::default(),
        Arc::new(LogReporter),
    );
    let mut session = ScriptedSession::new(vec![
        insert("t1", 1, "a").into(),
        insert("t1", 2, "b").into(),
        Step::Fail(SessionFaultKind::Database, "ORA-00942: table or view does not exist"),
    ]);

    let err = controller
        .run(&mut session, &mut processor)
        .await
        .unwrap_err();
    assert!(matches!(err, LogMinerError::Session { .. }));
    assert!(sink.is_empty());
    assert_eq!(processor.registry().get("t1").unwrap().buffered_len(), 2);
    assert_eq!(store.count_prefix(&spill_key_prefix("t1")).unwrap(), 2);

    processor.shutdown().unwrap();
    assert!(store.is_closed());
    assert!(matches!(
        store.get(&spill_key("t1", 0)).unwrap_err(),
        LogMinerError::StoreClosed
    ));
}

#[test]
fn test_stale_entries_cleared_on_reopen() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spill.redb");

    {
        let store = RedbSpillStore::open(&path).unwrap();
        store.put(&spill_key("crashed", 0), b"left behind").unwrap();
        store.put(&spill_key("crashed", 1), b"left behind").unwrap();
        // Dropped without close, like a crashed process
    }

    let store = RedbSpillStore::open(&path).unwrap();
    assert_eq!(store.count_prefix(&spill_key_prefix("crashed")).unwrap(), 0);
    assert!(store.get(&spill_key("crashed", 0)).unwrap().is_none());
    store.close().unwrap();
    store.close().unwrap();
}

#[tokio::test]
async fn test_json_codec_spill() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(RedbSpillStore::open(dir.path().join("spill.redb")).unwrap());
    let tier = SpillTier::new(store.clone(), Arc::new(JsonCodec));
    let registry = TransactionRegistry::new(BufferMode::Spill, Some(tier)).unwrap();
    let sink = Arc::new(CollectingSink::new());
    let mut processor = TransactionProcessor::new(registry, sink.clone());

    let record = insert("t1", 7, "r1");
    let expected = match &record {
        MinedRecord::Dml { event, .. } => event.clone(),
        _ => unreachable!(),
    };
    processor.apply(record).await.unwrap();
    let raw = store.get(&spill_key("t1", 0)).unwrap().unwrap();
    assert!(String::from_utf8(raw).unwrap().contains("\"row_id\":\"r1\""));

    processor
        .apply(MinedRecord::commit("t1", 8, 0))
        .await
        .unwrap();
    assert_eq!(sink.events(), vec![expected]);
}

#[tokio::test]
async fn test_processor_from_yaml_config() {
    init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let yaml = format!(
        "buffer_mode:\n  mode: tiered\n  spill_threshold: 4\nspill:\n  path: {}\n  codec: postcard\n",
        dir.path().join("nested").join("spill.redb").display()
    );
    let config = rivven_logminer::LogMinerConfig::from_yaml(&yaml).unwrap();

    let sink = Arc::new(CollectingSink::new());
    let mut processor = TransactionProcessor::from_config(&config, sink.clone()).unwrap();
    for scn in 1..=10 {
        processor.apply(insert("t1", scn, "r")).await.unwrap();
    }
    assert!(processor.registry().get("t1").unwrap().is_spilled());
    processor
        .apply(MinedRecord::commit("t1", 11, 0))
        .await
        .unwrap();
    assert_eq!(sink.events().len(), 10);

    processor.shutdown().unwrap();
    processor.shutdown().unwrap();
}

#[tokio::test]
async fn test_spill_config_helper() {
    let (_dir, config) = spill_config(BufferMode::Spill);
    let sink = Arc::new(CollectingSink::new());
    let mut processor = TransactionProcessor::from_config(&config, sink).unwrap();
    processor.apply(insert("t1", 1, "r")).await.unwrap();
    assert_eq!(processor.registry().buffered_events(), 1);
    processor.shutdown().unwrap();
}
