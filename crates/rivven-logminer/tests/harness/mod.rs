//! Test harness for LogMiner buffering integration tests
//!
//! - Scripted mining sessions that rewind to the requested SCN on reopen
//! - redb-backed registries in throwaway directories
//! - Record generators for common transaction shapes

#![allow(dead_code)]

use async_trait::async_trait;
use rivven_logminer::{
    BufferMode, LogMinerConfig, LogMinerError, LogMinerEvent, MinedRecord, MiningSession, Result,
    Scn, SessionFaultKind, TableId,
};
use std::collections::HashSet;
use std::sync::Once;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize test logging (idempotent)
pub fn init_test_logging() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::from_default_env()
                    .add_directive("rivven_logminer=debug".parse().unwrap()),
            )
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// Config spilling into a fresh temp directory. Keep the `TempDir` alive.
pub fn spill_config(mode: BufferMode) -> (TempDir, LogMinerConfig) {
    let dir = tempfile::tempdir().unwrap();
    let config = LogMinerConfig::builder()
        .buffer_mode(mode)
        .spill_path(dir.path().join("spill").join("logminer.redb"))
        .retired_cache_size(1_000)
        .build()
        .unwrap();
    (dir, config)
}

pub fn users() -> TableId {
    TableId::new("ORCLPDB1", "NEPTUNE", "USERS")
}

pub fn insert(txn: &str, scn: u64, row_id: &str) -> MinedRecord {
    MinedRecord::Dml {
        transaction_id: txn.to_string(),
        user_name: Some("NEPKISA".to_string()),
        event: LogMinerEvent::insert(
            scn,
            users(),
            row_id,
            vec![(scn as i64).into(), format!("user-{}", scn).into()],
            1_705_000_000_000 + scn as i64,
        ),
    }
}

pub fn undo(txn: &str, scn: u64, row_id: &str) -> MinedRecord {
    MinedRecord::dml(txn, LogMinerEvent::undo(scn, users(), row_id, 0))
}

/// One step of a scripted session
pub enum Step {
    Record(MinedRecord),
    Fail(SessionFaultKind, &'static str),
}

impl From<MinedRecord> for Step {
    fn from(record: MinedRecord) -> Self {
        Step::Record(record)
    }
}

/// Mining session over a fixed redo script, recording every open position.
///
/// Like a real LogMiner session, `open(from)` restarts at the first record
/// with an SCN at or above `from` (strictly above with
/// [`ScriptedSession::exclusive`]). Each fault fires only once.
#[derive(Default)]
pub struct ScriptedSession {
    script: Vec<Step>,
    cursor: usize,
    fired: HashSet<usize>,
    exclusive: bool,
    pub opened_at: Vec<Scn>,
    pub closes: usize,
}

impl ScriptedSession {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: steps.into_iter().collect(),
            ..Default::default()
        }
    }

    /// Resume strictly after the open position
    pub fn exclusive(mut self) -> Self {
        self.exclusive = true;
        self
    }

    fn resume_index(&self, from: Scn) -> usize {
        let mut index = self
            .script
            .iter()
            .position(|step| match step {
                Step::Record(record) if self.exclusive => record.scn() > from,
                Step::Record(record) => record.scn() >= from,
                Step::Fail(..) => false,
            })
            .unwrap_or(self.script.len());
        while index > 0
            && matches!(self.script[index - 1], Step::Fail(..))
            && !self.fired.contains(&(index - 1))
        {
            index -= 1;
        }
        index
    }
}

#[async_trait]
impl MiningSession for ScriptedSession {
    async fn open(&mut self, from: Scn) -> Result<()> {
        self.opened_at.push(from);
        self.cursor = self.resume_index(from);
        Ok(())
    }

    async fn next_record(&mut self) -> Result<Option<MinedRecord>> {
        while let Some(step) = self.script.get(self.cursor) {
            let index = self.cursor;
            self.cursor += 1;
            match step {
                Step::Record(record) => return Ok(Some(record.clone())),
                Step::Fail(kind, message) => {
                    if self.fired.insert(index) {
                        return Err(LogMinerError::session(*kind, *message));
                    }
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) -> Result<()> {
        self.closes += 1;
        Ok(())
    }
}
