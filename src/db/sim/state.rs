//! Tables, row versions and lock bookkeeping of the simulated engine.

use super::locking::{Conflict, LockTable, Resource, TxId};
use crate::config::{EngineConfig, EscalationMode};
use crate::db::{
    DataRow, LockMode, LockSnapshotRow, RowFilter, RowId, SessionId, TableLayout,
};
use crate::error::{LockscopeError, Result};
use std::collections::{BTreeMap, HashMap};

/// First data page handed out to a table.
const FIRST_DATA_PAGE: u32 = 264;

/// Heap-or-btree ids are the object id offset into the allocation-unit space.
const HOBT_BASE: u64 = 72_057_594_037_927_936;

const FIRST_OBJECT_ID: u64 = 581_577_110;
const OBJECT_ID_STRIDE: u64 = 16_003;

pub(super) const FIRST_SESSION_ID: SessionId = 51;

/// Physical address of a stored row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct RowLocation {
    pub page: u32,
    pub slot: u32,
}

/// A row with its last committed version and at most one uncommitted one.
#[derive(Debug, Clone)]
pub(super) struct StoredRow {
    pub location: RowLocation,
    pub committed: Option<DataRow>,
    pub pending: Option<(TxId, DataRow)>,
}

/// How a reader resolves uncommitted versions of other transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum ReadMode {
    /// See whatever was written last.
    Dirty,
    /// See the last committed version.
    Committed,
}

impl StoredRow {
    /// The version `tx` sees; its own pending write always wins.
    pub fn version(&self, tx: TxId, mode: ReadMode) -> Option<&DataRow> {
        if let Some((owner, data)) = &self.pending
            && (*owner == tx || mode == ReadMode::Dirty)
        {
            return Some(data);
        }
        self.committed.as_ref()
    }
}

#[derive(Debug)]
pub(super) struct Table {
    pub name: String,
    pub object_id: u64,
    pub layout: TableLayout,
    pub rows: BTreeMap<RowId, StoredRow>,
    next_identity: RowId,
    next_slot: u64,
}

impl Table {
    fn new(name: &str, object_id: u64, layout: TableLayout) -> Self {
        Self {
            name: name.to_string(),
            object_id,
            layout,
            rows: BTreeMap::new(),
            next_identity: 1,
            next_slot: 0,
        }
    }

    pub fn hobt_id(&self) -> u64 {
        HOBT_BASE + self.object_id
    }

    /// Table name without its schema prefix, as lock records name it.
    pub fn short_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    pub fn object_resource(&self) -> Resource {
        Resource::Object {
            object_id: self.object_id,
        }
    }

    pub fn page_resource(&self, location: RowLocation) -> Resource {
        Resource::Page {
            object_id: self.object_id,
            page: location.page,
        }
    }

    /// RID resource on heaps, KEY resource on clustered tables.
    pub fn row_resource(&self, id: RowId, location: RowLocation) -> Resource {
        match self.layout {
            TableLayout::Heap => Resource::Rid {
                object_id: self.object_id,
                page: location.page,
                slot: location.slot,
            },
            TableLayout::Clustered { .. } => Resource::Key {
                object_id: self.object_id,
                hash: key_hash(self.object_id, id),
            },
        }
    }

    /// Ids a statement with `filter` visits: a seek for id ranges, a scan otherwise.
    pub fn candidate_ids(&self, filter: Option<&RowFilter>) -> Vec<RowId> {
        match filter {
            Some(RowFilter::UpTo(max)) => self.rows.range(..=*max).map(|(id, _)| *id).collect(),
            Some(RowFilter::Above(min)) => self
                .rows
                .range(min.saturating_add(1)..)
                .map(|(id, _)| *id)
                .collect(),
            _ => self.rows.keys().copied().collect(),
        }
    }

    /// Take the next identity value, skipping past explicitly inserted ids.
    pub fn assign_id(&mut self, explicit: Option<RowId>) -> RowId {
        let id = explicit.unwrap_or(self.next_identity);
        self.next_identity = self.next_identity.max(id.saturating_add(1));
        id
    }

    pub fn allocate(&mut self, rows_per_page: u32) -> RowLocation {
        let per_page = u64::from(rows_per_page.max(1));
        let seq = self.next_slot;
        self.next_slot += 1;
        RowLocation {
            page: FIRST_DATA_PAGE + (seq / per_page) as u32,
            slot: (seq % per_page) as u32,
        }
    }

    pub fn reset(&mut self) {
        self.rows.clear();
        self.next_identity = 1;
        self.next_slot = 0;
    }
}

/// Deterministic 48-bit hash standing in for the engine's key hash.
pub(super) fn key_hash(object_id: u64, id: RowId) -> u64 {
    let mut z = (id as u64) ^ object_id.rotate_left(32);
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    (z ^ (z >> 31)) & 0xFFFF_FFFF_FFFF
}

/// Per-statement row lock accounting that drives escalation.
#[derive(Debug, Default)]
pub(super) struct StatementLocks {
    pub row_locks: usize,
    pub escalation_attempted: bool,
}

#[derive(Debug)]
pub(super) struct EngineState {
    pub config: EngineConfig,
    pub tables: BTreeMap<String, Table>,
    pub locks: LockTable,
    /// Rows carrying a pending version, per transaction.
    writes: HashMap<TxId, Vec<(String, RowId)>>,
    next_session: SessionId,
    next_tx: TxId,
    next_object_id: u64,
}

impl EngineState {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            tables: BTreeMap::new(),
            locks: LockTable::default(),
            writes: HashMap::new(),
            next_session: FIRST_SESSION_ID,
            next_tx: 1,
            next_object_id: FIRST_OBJECT_ID,
        }
    }

    pub fn open_session(&mut self) -> SessionId {
        let id = self.next_session;
        self.next_session += 1;
        id
    }

    pub fn begin_tx(&mut self) -> TxId {
        let id = self.next_tx;
        self.next_tx += 1;
        id
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables.get(name).ok_or_else(|| invalid_object(name))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables.get_mut(name).ok_or_else(|| invalid_object(name))
    }

    pub fn create_table(&mut self, name: &str, layout: TableLayout) -> Result<()> {
        if self.tables.contains_key(name) {
            return Err(LockscopeError::Database(format!(
                "there is already an object named '{}' in the database",
                name
            )));
        }
        let object_id = self.next_object_id;
        self.next_object_id += OBJECT_ID_STRIDE;
        self.tables
            .insert(name.to_string(), Table::new(name, object_id, layout));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> bool {
        self.tables.remove(name).is_some()
    }

    /// Record that `tx` left a pending version on `id`.
    pub fn track_write(&mut self, tx: TxId, table: &str, id: RowId) {
        self.writes
            .entry(tx)
            .or_default()
            .push((table.to_string(), id));
    }

    /// First lock that keeps `tx` from writing row `id`.
    pub fn write_blocker(&self, table: &str, id: RowId, tx: TxId) -> Result<Option<Conflict>> {
        self.blocker(table, id, tx, LockMode::IntentExclusive, LockMode::Exclusive)
    }

    /// First lock that keeps a locking read of row `id` by `tx` waiting.
    pub fn read_blocker(&self, table: &str, id: RowId, tx: TxId) -> Result<Option<Conflict>> {
        self.blocker(table, id, tx, LockMode::IntentShared, LockMode::Shared)
    }

    fn blocker(
        &self,
        table: &str,
        id: RowId,
        tx: TxId,
        intent: LockMode,
        row_mode: LockMode,
    ) -> Result<Option<Conflict>> {
        let t = self.table(table)?;
        let Some(row) = t.rows.get(&id) else {
            return Ok(None);
        };
        let object = t.object_resource();
        if self.locks.holds(object, tx, LockMode::Exclusive) {
            return Ok(None);
        }
        let wanted = [
            (object, intent),
            (t.page_resource(row.location), intent),
            (t.row_resource(id, row.location), row_mode),
        ];
        Ok(wanted.into_iter().find_map(|(resource, requested)| {
            self.locks
                .conflict(resource, tx, requested)
                .map(|holder| Conflict {
                    resource,
                    requested,
                    holder,
                })
        }))
    }

    /// Take the intent and row locks a write of `id` needs, escalating once
    /// the statement reaches the configured threshold.
    pub fn lock_for_write(
        &mut self,
        table: &str,
        id: RowId,
        tx: TxId,
        session: SessionId,
        statement: &mut StatementLocks,
    ) -> Result<()> {
        let (object, page, row) = {
            let t = self.table(table)?;
            let stored = t
                .rows
                .get(&id)
                .ok_or_else(|| LockscopeError::Database(format!("row {} vanished", id)))?;
            (
                t.object_resource(),
                t.page_resource(stored.location),
                t.row_resource(id, stored.location),
            )
        };
        if self.locks.holds(object, tx, LockMode::Exclusive) {
            return Ok(());
        }

        for (resource, mode) in [
            (object, LockMode::IntentExclusive),
            (page, LockMode::IntentExclusive),
            (row, LockMode::Exclusive),
        ] {
            self.locks
                .acquire(resource, tx, session, mode)
                .map_err(|holder| {
                    LockscopeError::Database(format!(
                        "{} lock on {:?} unexpectedly held by session {}",
                        mode, resource, holder
                    ))
                })?;
        }

        statement.row_locks += 1;
        if !statement.escalation_attempted
            && statement.row_locks >= self.config.escalation_threshold
        {
            statement.escalation_attempted = true;
            self.escalate(object, tx, session);
        }
        Ok(())
    }

    fn escalate(&mut self, object: Resource, tx: TxId, session: SessionId) -> bool {
        if self.locks.held_by_others(object, tx) {
            tracing::debug!(session, "lock escalation blocked by another session");
            return false;
        }
        if self
            .locks
            .acquire(object, tx, session, LockMode::Exclusive)
            .is_err()
        {
            return false;
        }
        if self.config.escalation == EscalationMode::Full {
            let object_id = object.object_id();
            self.locks
                .release_matching(tx, |r| r.object_id() == object_id && !r.is_object());
        }
        tracing::debug!(
            session,
            mode = ?self.config.escalation,
            "row locks escalated to table lock"
        );
        true
    }

    /// End `tx`: publish or discard its pending versions and release its locks.
    pub fn finish(&mut self, tx: TxId, commit: bool) {
        if let Some(written) = self.writes.remove(&tx) {
            for (table, id) in written {
                let Some(t) = self.tables.get_mut(&table) else {
                    continue;
                };
                let Some(row) = t.rows.get_mut(&id) else {
                    continue;
                };
                match row.pending.take() {
                    Some((owner, data)) if owner == tx => {
                        if commit {
                            row.committed = Some(data);
                        }
                    }
                    other => row.pending = other,
                }
                if row.committed.is_none() && row.pending.is_none() {
                    t.rows.remove(&id);
                }
            }
        }
        self.locks.release_all(tx);
    }

    /// Every lock request, formatted the way the engine's lock view reports it.
    pub fn lock_records(&self) -> Vec<LockSnapshotRow> {
        let by_object: HashMap<u64, &Table> =
            self.tables.values().map(|t| (t.object_id, t)).collect();

        self.locks
            .iter()
            .filter_map(|(resource, request)| {
                let table = by_object.get(&resource.object_id())?;
                let (owner, entity, key) = match *resource {
                    Resource::Object { object_id } => (
                        format!("{} : U: USER_TABLE", table.short_name()),
                        object_id,
                        String::new(),
                    ),
                    Resource::Page { page, .. } => {
                        ("<n/a>".to_string(), table.hobt_id(), format!("1:{}", page))
                    }
                    Resource::Rid { page, slot, .. } => (
                        table.short_name().to_string(),
                        table.hobt_id(),
                        format!("1:{}:{}", page, slot),
                    ),
                    Resource::Key { hash, .. } => (
                        table.short_name().to_string(),
                        table.hobt_id(),
                        format!("({:012x})", hash),
                    ),
                };
                Some(LockSnapshotRow {
                    resource_type: resource.resource_type(),
                    owner,
                    request_mode: request.mode,
                    request_status: request.status,
                    resource_entity_id: entity,
                    session_id: request.session,
                    resource_key: key,
                })
            })
            .collect()
    }
}

fn invalid_object(name: &str) -> LockscopeError {
    LockscopeError::Database(format!("invalid object name '{}'", name))
}
