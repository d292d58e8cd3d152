//! LogMiner event representation
//!
//! A [`LogMinerEvent`] is one parsed row change taken from the redo log.
//! Events are immutable once mined; they are owned by the transaction
//! buffer that holds them until the transaction commits or rolls back.
//!
//! ## Ordering
//!
//! Every event carries the [`Scn`] (system change number) of the redo
//! record it was mined from. Committed transactions are emitted in
//! ascending SCN order.

use serde::{Deserialize, Serialize};
use std::fmt;

/// System change number: the monotonic redo log position.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Scn(u64);

impl Scn {
    /// The null SCN, used before anything has been acknowledged.
    pub const NULL: Scn = Scn(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for Scn {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for Scn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fully qualified table identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableId {
    /// Catalog / PDB name
    pub catalog: String,
    /// Schema (owner) name
    pub schema: String,
    /// Table name
    pub table: String,
}

impl TableId {
    pub fn new(
        catalog: impl Into<String>,
        schema: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        Self {
            catalog: catalog.into(),
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.catalog, self.schema, self.table)
    }
}

/// Kind of row change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// Row inserted
    Insert,
    /// Row updated
    Update,
    /// Row deleted
    Delete,
    /// Partial rollback of an earlier change to the same row id
    Undo,
    /// LOB locator selected for a subsequent LOB write
    SelectLobLocator,
    /// LOB content written
    LobWrite,
    /// LOB content erased
    LobErase,
}

impl EventType {
    /// Check if this is a data modification (INSERT/UPDATE/DELETE)
    pub fn is_dml(self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// Check if this event concerns LOB columns
    pub fn is_lob(self) -> bool {
        matches!(self, Self::SelectLobLocator | Self::LobWrite | Self::LobErase)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventType::Insert => write!(f, "INSERT"),
            EventType::Update => write!(f, "UPDATE"),
            EventType::Delete => write!(f, "DELETE"),
            EventType::Undo => write!(f, "UNDO"),
            EventType::SelectLobLocator => write!(f, "SELECT_LOB_LOCATOR"),
            EventType::LobWrite => write!(f, "LOB_WRITE"),
            EventType::LobErase => write!(f, "LOB_ERASE"),
        }
    }
}

/// A single column value as parsed from redo SQL.
///
/// Kept to self-describing-free shapes so every codec can carry it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    /// BINARY_DOUBLE may hold NaN and infinities
    Float(#[serde(with = "float_repr")] f64),
    Text(String),
    Bytes(Vec<u8>),
}

/// Non-finite floats as strings for human-readable formats, which have no
/// number syntax for them. Binary formats keep the raw `f64`.
mod float_repr {
    use serde::{de, Deserialize, Deserializer, Serializer};

    const NAN: &str = "NaN";
    const INF: &str = "inf";
    const NEG_INF: &str = "-inf";

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        if !serializer.is_human_readable() || value.is_finite() {
            return serializer.serialize_f64(*value);
        }
        let text = if value.is_nan() {
            NAN
        } else if value.is_sign_positive() {
            INF
        } else {
            NEG_INF
        };
        serializer.serialize_str(text)
    }

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(f64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        if !deserializer.is_human_readable() {
            return f64::deserialize(deserializer);
        }
        match Repr::deserialize(deserializer)? {
            Repr::Number(value) => Ok(value),
            Repr::Text(text) => match text.as_str() {
                NAN => Ok(f64::NAN),
                INF => Ok(f64::INFINITY),
                NEG_INF => Ok(f64::NEG_INFINITY),
                other => Err(de::Error::invalid_value(
                    de::Unexpected::Str(other),
                    &"a number, \"NaN\", \"inf\" or \"-inf\"",
                )),
            },
        }
    }
}

impl ColumnValue {
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int(value)
    }
}

impl From<f64> for ColumnValue {
    fn from(value: f64) -> Self {
        ColumnValue::Float(value)
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ColumnValue::Null)
    }
}

/// A row change mined from the redo log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMinerEvent {
    /// Operation type
    pub event_type: EventType,
    /// Redo position of the change
    pub scn: Scn,
    /// Table the change applies to
    pub table_id: TableId,
    /// Oracle ROWID, used to correlate undo records
    pub row_id: String,
    /// Redo sequence id (`RS_ID`) of the record
    pub rs_id: Option<String>,
    /// Column values before the change (UPDATE/DELETE)
    pub old_values: Vec<ColumnValue>,
    /// Column values after the change (INSERT/UPDATE)
    pub new_values: Vec<ColumnValue>,
    /// Change timestamp (Unix epoch millis)
    pub change_time: i64,
    /// Raw redo SQL, when retained
    pub redo_sql: Option<String>,
}

impl LogMinerEvent {
    /// Create an event with no column values attached.
    pub fn new(
        event_type: EventType,
        scn: impl Into<Scn>,
        table_id: TableId,
        row_id: impl Into<String>,
        change_time: i64,
    ) -> Self {
        Self {
            event_type,
            scn: scn.into(),
            table_id,
            row_id: row_id.into(),
            rs_id: None,
            old_values: Vec::new(),
            new_values: Vec::new(),
            change_time,
            redo_sql: None,
        }
    }

    /// Create an INSERT event
    pub fn insert(
        scn: impl Into<Scn>,
        table_id: TableId,
        row_id: impl Into<String>,
        new_values: Vec<ColumnValue>,
        change_time: i64,
    ) -> Self {
        Self::new(EventType::Insert, scn, table_id, row_id, change_time).with_new_values(new_values)
    }

    /// Create an UPDATE event
    pub fn update(
        scn: impl Into<Scn>,
        table_id: TableId,
        row_id: impl Into<String>,
        old_values: Vec<ColumnValue>,
        new_values: Vec<ColumnValue>,
        change_time: i64,
    ) -> Self {
        Self::new(EventType::Update, scn, table_id, row_id, change_time)
            .with_old_values(old_values)
            .with_new_values(new_values)
    }

    /// Create a DELETE event
    pub fn delete(
        scn: impl Into<Scn>,
        table_id: TableId,
        row_id: impl Into<String>,
        old_values: Vec<ColumnValue>,
        change_time: i64,
    ) -> Self {
        Self::new(EventType::Delete, scn, table_id, row_id, change_time).with_old_values(old_values)
    }

    /// Create an UNDO event for a row id
    pub fn undo(
        scn: impl Into<Scn>,
        table_id: TableId,
        row_id: impl Into<String>,
        change_time: i64,
    ) -> Self {
        Self::new(EventType::Undo, scn, table_id, row_id, change_time)
    }

    pub fn with_old_values(mut self, values: Vec<ColumnValue>) -> Self {
        self.old_values = values;
        self
    }

    pub fn with_new_values(mut self, values: Vec<ColumnValue>) -> Self {
        self.new_values = values;
        self
    }

    pub fn with_rs_id(mut self, rs_id: impl Into<String>) -> Self {
        self.rs_id = Some(rs_id.into());
        self
    }

    pub fn with_redo_sql(mut self, sql: impl Into<String>) -> Self {
        self.redo_sql = Some(sql.into());
        self
    }

    /// Check if this event undoes an earlier change
    pub fn is_undo(&self) -> bool {
        self.event_type == EventType::Undo
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users() -> TableId {
        TableId::new("ORCLPDB1", "NEPTUNE", "USERS")
    }

    #[test]
    fn test_insert_event() {
        let event = LogMinerEvent::insert(
            100,
            users(),
            "AAAR3sAAEAAAACXAAA",
            vec![ColumnValue::Int(1), "Alice".into()],
            1705000000000,
        );

        assert_eq!(event.event_type, EventType::Insert);
        assert_eq!(event.scn, Scn::new(100));
        assert!(event.old_values.is_empty());
        assert_eq!(event.new_values.len(), 2);
        assert!(!event.is_undo());
    }

    #[test]
    fn test_update_event() {
        let event = LogMinerEvent::update(
            101,
            users(),
            "AAAR3sAAEAAAACXAAA",
            vec!["Alice".into()],
            vec!["Bob".into()],
            1705000000000,
        );

        assert_eq!(event.event_type, EventType::Update);
        assert_eq!(event.old_values, vec![ColumnValue::Text("Alice".into())]);
        assert_eq!(event.new_values, vec![ColumnValue::Text("Bob".into())]);
    }

    #[test]
    fn test_undo_event() {
        let event = LogMinerEvent::undo(102, users(), "AAAR3sAAEAAAACXAAA", 0);
        assert!(event.is_undo());
        assert!(!event.event_type.is_dml());
    }

    #[test]
    fn test_event_type_classification() {
        assert!(EventType::Insert.is_dml());
        assert!(EventType::Delete.is_dml());
        assert!(!EventType::LobWrite.is_dml());
        assert!(EventType::LobWrite.is_lob());
        assert!(EventType::SelectLobLocator.is_lob());
        assert_eq!(EventType::SelectLobLocator.to_string(), "SELECT_LOB_LOCATOR");
    }

    #[test]
    fn test_scn_ordering() {
        assert!(Scn::new(5) < Scn::new(6));
        assert!(Scn::NULL.is_null());
        assert_eq!(Scn::from(42).to_string(), "42");
    }

    #[test]
    fn test_optional_column_value() {
        let none: Option<&str> = None;
        assert!(ColumnValue::from(none).is_null());
        assert_eq!(ColumnValue::from(Some(7i64)), ColumnValue::Int(7));
    }

    #[test]
    fn test_table_id_display() {
        assert_eq!(users().to_string(), "ORCLPDB1.NEPTUNE.USERS");
    }
}
