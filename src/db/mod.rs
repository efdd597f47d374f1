//! Database capability used by every experiment.
//!
//! The experiments never talk to an engine directly. They open sessions
//! through [`Database`], run work through [`Connection`] inside a
//! [`Transaction`], and read lock state as [`LockSnapshotRow`] records.
//! [`sim`] provides the in-process lock-manager engine behind these traits.
//!
//! # Table shape
//!
//! Every table has the fixed shape `ID, STATUS, EXECUTION_START,
//! EXECUTION_END`. A table is either a heap (row locks are RID locks on
//! `file:page:slot`) or clustered on `ID` (row locks are KEY locks on a key
//! hash).

pub mod sim;
mod transaction;

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub use transaction::{Transaction, in_transaction};

/// Logical row identifier (the `ID` column).
pub type RowId = i64;

/// Engine session identifier (one per connection).
pub type SessionId = i32;

/// Transaction isolation level as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum IsolationLevel {
    Unspecified,
    ReadUncommitted,
    #[default]
    ReadCommitted,
    Repeatable,
    Serializable,
    Snapshot,
}

impl IsolationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unspecified => "Unspecified",
            Self::ReadUncommitted => "ReadUncommitted",
            Self::ReadCommitted => "ReadCommitted",
            Self::Repeatable => "Repeatable",
            Self::Serializable => "Serializable",
            Self::Snapshot => "Snapshot",
        }
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Granularity of a locked resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResourceType {
    /// A single record: RID on heaps, KEY on clustered tables.
    Row,
    /// The whole table (OBJECT).
    Table,
    /// Anything else, e.g. PAGE intent locks.
    Other,
}

impl ResourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Row => "ROW",
            Self::Table => "TABLE",
            Self::Other => "OTHER",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    #[serde(rename = "S")]
    Shared,
    #[serde(rename = "X")]
    Exclusive,
    #[serde(rename = "IS")]
    IntentShared,
    #[serde(rename = "IX")]
    IntentExclusive,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shared => "S",
            Self::Exclusive => "X",
            Self::IntentShared => "IS",
            Self::IntentExclusive => "IX",
        }
    }

    /// Whether a lock in this mode can be granted while `other` is held
    /// by a different transaction.
    pub fn compatible_with(&self, other: LockMode) -> bool {
        use LockMode::*;
        match (*self, other) {
            (Exclusive, _) | (_, Exclusive) => false,
            (IntentShared, _) | (_, IntentShared) => true,
            (IntentExclusive, IntentExclusive) => true,
            (Shared, Shared) => true,
            _ => false,
        }
    }

    /// Strength rank used to decide whether a held lock already covers a request.
    pub(crate) fn strength(&self) -> u8 {
        match self {
            Self::IntentShared => 0,
            Self::Shared => 1,
            Self::IntentExclusive => 2,
            Self::Exclusive => 3,
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a lock request is held or still queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    #[serde(rename = "GRANT")]
    Granted,
    #[serde(rename = "WAIT")]
    Waiting,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Granted => "GRANT",
            Self::Waiting => "WAIT",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lock record as reported by the engine's lock inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSnapshotRow {
    pub resource_type: ResourceType,
    /// Object owning the resource, `<n/a>` when the engine cannot name it.
    pub owner: String,
    pub request_mode: LockMode,
    pub request_status: RequestStatus,
    /// Object id for table locks, heap-or-btree id for row and page locks.
    pub resource_entity_id: u64,
    pub session_id: SessionId,
    /// Raw resource description, possibly wrapped in parentheses.
    pub resource_key: String,
}

/// One record of a test table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataRow {
    #[serde(rename = "ID")]
    pub id: RowId,
    #[serde(rename = "STATUS")]
    pub status: String,
    #[serde(rename = "EXECUTION_START")]
    pub execution_start: DateTime<Utc>,
    #[serde(rename = "EXECUTION_END")]
    pub execution_end: Option<DateTime<Utc>>,
}

/// A record to insert; `id: None` lets the engine assign the next identity.
#[derive(Debug, Clone)]
pub struct NewRow {
    pub id: Option<RowId>,
    pub status: String,
    pub execution_start: DateTime<Utc>,
    pub execution_end: Option<DateTime<Utc>>,
}

/// Physical organization of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableLayout {
    /// No clustered index; rows are addressed by `file:page:slot`.
    Heap,
    /// Clustered primary key on `ID` with the given index name.
    Clustered { index_name: String },
}

/// Row predicate of an update or select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowFilter {
    /// `ID <= n`
    UpTo(RowId),
    /// `ID > n`
    Above(RowId),
    /// `STATUS = s`
    StatusEquals(String),
}

impl RowFilter {
    pub fn matches(&self, row: &DataRow) -> bool {
        match self {
            RowFilter::UpTo(max) => row.id <= *max,
            RowFilter::Above(min) => row.id > *min,
            RowFilter::StatusEquals(status) => row.status == *status,
        }
    }

    /// Whether the predicate only constrains `ID`, so the engine can seek
    /// instead of visiting every row.
    pub fn is_id_range(&self) -> bool {
        matches!(self, RowFilter::UpTo(_) | RowFilter::Above(_))
    }
}

impl fmt::Display for RowFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowFilter::UpTo(max) => write!(f, "ID <= {}", max),
            RowFilter::Above(min) => write!(f, "ID > {}", min),
            RowFilter::StatusEquals(status) => write!(f, "STATUS = '{}'", status),
        }
    }
}

/// Locking behavior of a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHint {
    /// Honor the session's isolation level.
    Committed,
    /// Read without taking or respecting locks (dirty read).
    NoLock,
}

/// How a lock resource key is mapped back to a logical row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityStrategy {
    /// By physical row location, formatted `(file:page:slot)`.
    PhysicalLocation,
    /// By key hash of the named clustered index, formatted `(hash)`.
    KeyIndex(String),
}

/// A connection to the engine, owning one session.
///
/// A connection runs at most one transaction at a time; transactions are
/// never nested.
pub trait Connection: Send {
    fn session_id(&self) -> SessionId;

    fn isolation_level(&self) -> IsolationLevel;

    fn in_transaction(&self) -> bool;

    fn begin(&mut self) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Set `STATUS` on every row matching `filter`; returns the number of rows updated.
    fn update_status(&mut self, table: &str, filter: &RowFilter, status: &str) -> Result<usize>;

    fn insert_rows(&mut self, table: &str, rows: &[NewRow]) -> Result<usize>;

    /// Remove every row and reset the identity sequence.
    fn truncate(&mut self, table: &str) -> Result<()>;

    fn select_rows(
        &mut self,
        table: &str,
        filter: Option<&RowFilter>,
        hint: ReadHint,
    ) -> Result<Vec<DataRow>>;

    /// Every lock currently held or requested, across all sessions.
    fn lock_records(&mut self) -> Result<Vec<LockSnapshotRow>>;

    /// Raw resource keys (as the engine formats them) paired with the row they identify.
    fn record_identities(
        &mut self,
        table: &str,
        strategy: &IdentityStrategy,
    ) -> Result<Vec<(String, DataRow)>>;
}

/// Factory for connections plus the schema operations the fixtures need.
pub trait Database: Send + Sync {
    fn connect(&self) -> Result<Box<dyn Connection>>;

    fn create_table(&self, name: &str, layout: TableLayout) -> Result<()>;

    /// Drop the table if it exists.
    fn drop_table(&self, name: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isolation_level_names() {
        assert_eq!(IsolationLevel::default().to_string(), "ReadCommitted");
        assert_eq!(IsolationLevel::ReadUncommitted.to_string(), "ReadUncommitted");
        assert_eq!(IsolationLevel::Snapshot.to_string(), "Snapshot");
    }

    #[test]
    fn test_exclusive_conflicts_with_everything() {
        for other in [
            LockMode::Shared,
            LockMode::Exclusive,
            LockMode::IntentShared,
            LockMode::IntentExclusive,
        ] {
            assert!(!LockMode::Exclusive.compatible_with(other));
            assert!(!other.compatible_with(LockMode::Exclusive));
        }
    }

    #[test]
    fn test_intent_locks_coexist() {
        assert!(LockMode::IntentExclusive.compatible_with(LockMode::IntentExclusive));
        assert!(LockMode::IntentShared.compatible_with(LockMode::IntentExclusive));
        assert!(!LockMode::Shared.compatible_with(LockMode::IntentExclusive));
        assert!(LockMode::Shared.compatible_with(LockMode::Shared));
    }

    #[test]
    fn test_id_filters_seek_and_status_filters_scan() {
        assert!(RowFilter::UpTo(6).is_id_range());
        assert!(RowFilter::Above(7).is_id_range());
        assert!(!RowFilter::StatusEquals("A".to_string()).is_id_range());
        assert_eq!(RowFilter::Above(7).to_string(), "ID > 7");
    }

    #[test]
    fn test_data_row_serializes_with_column_names() {
        let row = DataRow {
            id: 3,
            status: "XXX".to_string(),
            execution_start: Utc::now(),
            execution_end: None,
        };
        let json = serde_json::to_value(&row).unwrap();
        assert_eq!(json["ID"], 3);
        assert_eq!(json["STATUS"], "XXX");
        assert!(json["EXECUTION_END"].is_null());
    }
}
