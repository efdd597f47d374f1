//! Joining lock records back to the rows they lock.

use crate::db::{
    DataRow, Database, IdentityStrategy, LockMode, LockSnapshotRow, RequestStatus, ResourceType,
    RowId, SessionId, in_transaction,
};
use crate::error::Result;
use serde::Serialize;
use std::collections::HashMap;

/// Strip surrounding whitespace and one pair of enclosing parentheses from a resource key.
pub fn normalize_resource_key(raw: &str) -> String {
    let key = raw.trim();
    let key = key.strip_prefix('(').unwrap_or(key);
    key.strip_suffix(')').unwrap_or(key).to_string()
}

/// Resource key to row mapping of one table, read once per experiment.
#[derive(Debug, Default, Clone)]
pub struct RecordIdentity {
    by_location: HashMap<String, DataRow>,
    by_key: HashMap<String, DataRow>,
}

impl RecordIdentity {
    /// Read the physical locations of every row and, when `key_index` is
    /// given, their key hashes in that index.
    pub fn load(database: &dyn Database, table: &str, key_index: Option<&str>) -> Result<Self> {
        let mut conn = database.connect()?;
        in_transaction(conn.as_mut(), |c| {
            let by_location = c.record_identities(table, &IdentityStrategy::PhysicalLocation)?;
            let by_key = match key_index {
                Some(index) => {
                    c.record_identities(table, &IdentityStrategy::KeyIndex(index.to_string()))?
                }
                None => Vec::new(),
            };
            Ok(Self::from_pairs(by_location, by_key))
        })
    }

    pub fn from_pairs(
        by_location: impl IntoIterator<Item = (String, DataRow)>,
        by_key: impl IntoIterator<Item = (String, DataRow)>,
    ) -> Self {
        let normalize = |(key, row): (String, DataRow)| (normalize_resource_key(&key), row);
        Self {
            by_location: by_location.into_iter().map(normalize).collect(),
            by_key: by_key.into_iter().map(normalize).collect(),
        }
    }

    /// Row identified by a normalized resource key; a key match wins over a location match.
    pub fn lookup(&self, key: &str) -> Option<&DataRow> {
        self.by_key.get(key).or_else(|| self.by_location.get(key))
    }

    pub(crate) fn len(&self) -> usize {
        self.by_location.len() + self.by_key.len()
    }
}

/// A lock record with a normalized key and, when known, the row it locks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedLock {
    pub resource_type: ResourceType,
    pub owner: String,
    pub request_mode: LockMode,
    pub request_status: RequestStatus,
    #[serde(rename = "resource_associated_entity_id")]
    pub resource_entity_id: u64,
    #[serde(rename = "request_session_id")]
    pub session_id: SessionId,
    #[serde(rename = "resource_description")]
    pub resource_key: String,
    #[serde(flatten)]
    pub row: Option<DataRow>,
}

impl AnnotatedLock {
    pub fn new(record: LockSnapshotRow, identity: &RecordIdentity) -> Self {
        let resource_key = normalize_resource_key(&record.resource_key);
        let row = identity.lookup(&resource_key).cloned();
        Self {
            resource_type: record.resource_type,
            owner: record.owner,
            request_mode: record.request_mode,
            request_status: record.request_status,
            resource_entity_id: record.resource_entity_id,
            session_id: record.session_id,
            resource_key,
            row,
        }
    }

    /// Logical row id, 0 when the lock is not on a known row.
    pub fn row_id(&self) -> RowId {
        self.row.as_ref().map_or(0, |row| row.id)
    }

    fn sort_key(&self) -> (&'static str, RowId, SessionId, &str, &'static str) {
        (
            self.resource_type.as_str(),
            self.row_id(),
            self.session_id,
            &self.resource_key,
            self.request_mode.as_str(),
        )
    }
}

/// Normalize and join `records`, sorted by resource type then row id, descending.
pub fn annotate(records: Vec<LockSnapshotRow>, identity: &RecordIdentity) -> Vec<AnnotatedLock> {
    let mut locks: Vec<AnnotatedLock> = records
        .into_iter()
        .map(|record| AnnotatedLock::new(record, identity))
        .collect();
    locks.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
    locks
}
