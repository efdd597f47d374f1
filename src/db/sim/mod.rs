//! In-process engine with a lock manager.
//!
//! The simulated engine reproduces the lock behavior the experiments
//! observe on a real server:
//!
//! - writes take `IX` on the table and page and `X` on the row (RID on
//!   heaps, KEY on clustered tables), held until commit or rollback;
//! - once one statement holds `escalation_threshold` row locks it tries to
//!   take `X` on the table. Escalation is skipped while another session
//!   holds any lock on the table. With [`EscalationMode::Full`] the row and
//!   page locks are released, with [`EscalationMode::Residual`] they stay;
//! - locking read-committed reads wait for conflicting `X` locks, versioned
//!   reads (`read_committed_snapshot` or snapshot isolation) return the last
//!   committed version, and `NOLOCK` reads see uncommitted data.
//!
//! Inserts and truncation take no locks.
//!
//! [`EscalationMode::Full`]: crate::config::EscalationMode::Full
//! [`EscalationMode::Residual`]: crate::config::EscalationMode::Residual

mod locking;
mod state;


use self::locking::{Conflict, TxId};
use self::state::{EngineState, ReadMode, StatementLocks, StoredRow, key_hash};
use super::{
    Connection, DataRow, Database, IdentityStrategy, IsolationLevel, LockSnapshotRow, NewRow,
    ReadHint, RowFilter, SessionId, TableLayout,
};
use crate::config::EngineConfig;
use crate::error::{LockscopeError, Result};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct Shared {
    state: Mutex<EngineState>,
    /// Signalled whenever locks are released.
    released: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Handle to a simulated engine instance. Cloning shares the instance.
#[derive(Clone)]
pub struct SimDatabase {
    shared: Arc<Shared>,
}

impl SimDatabase {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(EngineState::new(config)),
                released: Condvar::new(),
            }),
        }
    }

    /// Open a session running at `isolation`.
    pub fn connect_at(&self, isolation: IsolationLevel) -> SimConnection {
        let (session_id, lock_wait_timeout) = {
            let mut state = self.shared.lock();
            let timeout = state.config.lock_wait_timeout();
            (state.open_session(), timeout)
        };
        tracing::trace!(session = session_id, %isolation, "session opened");
        SimConnection {
            shared: Arc::clone(&self.shared),
            session_id,
            isolation,
            lock_wait_timeout,
            tx: None,
        }
    }
}

impl Database for SimDatabase {
    fn connect(&self) -> Result<Box<dyn Connection>> {
        Ok(Box::new(self.connect_at(IsolationLevel::ReadCommitted)))
    }

    fn create_table(&self, name: &str, layout: TableLayout) -> Result<()> {
        self.shared.lock().create_table(name, layout)
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        if self.shared.lock().drop_table(name) {
            tracing::debug!(table = name, "table dropped");
        }
        Ok(())
    }
}

/// One session on a [`SimDatabase`].
pub struct SimConnection {
    shared: Arc<Shared>,
    session_id: SessionId,
    isolation: IsolationLevel,
    lock_wait_timeout: Duration,
    tx: Option<TxId>,
}

impl SimConnection {
    /// Transaction a statement runs in; `true` when it was started implicitly.
    fn statement_tx(&self) -> (TxId, bool) {
        match self.tx {
            Some(tx) => (tx, false),
            None => (self.shared.lock().begin_tx(), true),
        }
    }

    fn finish(&self, tx: TxId, commit: bool) {
        self.shared.lock().finish(tx, commit);
        self.shared.released.notify_all();
    }

    /// Run one statement, autocommitting it when no transaction is open.
    fn statement<T>(&self, run: impl FnOnce(&Self, TxId) -> Result<T>) -> Result<T> {
        let (tx, implicit) = self.statement_tx();
        let result = run(self, tx);
        if implicit {
            self.finish(tx, result.is_ok());
        }
        result
    }

    /// Block until `blocker` reports no conflict or the lock wait times out.
    fn wait_for<'a>(
        &self,
        mut state: MutexGuard<'a, EngineState>,
        deadline: Instant,
        tx: TxId,
        blocker: impl Fn(&EngineState) -> Result<Option<Conflict>>,
    ) -> Result<MutexGuard<'a, EngineState>> {
        loop {
            let conflict = match blocker(&state) {
                Ok(Some(conflict)) => conflict,
                Ok(None) => {
                    state.locks.clear_waiting(tx);
                    return Ok(state);
                }
                Err(e) => {
                    state.locks.clear_waiting(tx);
                    return Err(e);
                }
            };
            state.locks.mark_waiting(&conflict, tx, self.session_id);

            let now = Instant::now();
            if now >= deadline {
                state.locks.clear_waiting(tx);
                return Err(LockscopeError::Database(format!(
                    "lock request time out period exceeded: session {} waited {:?} for {} lock held by session {}",
                    self.session_id, self.lock_wait_timeout, conflict.requested, conflict.holder
                )));
            }
            tracing::trace!(
                session = self.session_id,
                blocked_by = conflict.holder,
                "waiting for lock"
            );
            state = match self.shared.released.wait_timeout(state, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    fn update_in(&self, tx: TxId, table: &str, filter: &RowFilter, status: &str) -> Result<usize> {
        let deadline = Instant::now() + self.lock_wait_timeout;
        let mut state = self.shared.lock();
        let candidates = state.table(table)?.candidate_ids(Some(filter));
        let mut statement = StatementLocks::default();
        let mut updated = 0;

        for id in candidates {
            state = self.wait_for(state, deadline, tx, |s| s.write_blocker(table, id, tx))?;

            let current = state
                .table(table)?
                .rows
                .get(&id)
                .and_then(|row| row.version(tx, ReadMode::Committed))
                .filter(|row| filter.matches(row))
                .cloned();
            let Some(mut next) = current else {
                continue;
            };

            state.lock_for_write(table, id, tx, self.session_id, &mut statement)?;
            next.status = status.to_string();
            if let Some(row) = state.table_mut(table)?.rows.get_mut(&id) {
                row.pending = Some((tx, next));
            }
            state.track_write(tx, table, id);
            updated += 1;
        }

        tracing::trace!(
            session = self.session_id,
            table,
            %filter,
            updated,
            row_locks = statement.row_locks,
            "update finished"
        );
        Ok(updated)
    }

    fn select_in(
        &self,
        tx: TxId,
        table: &str,
        filter: Option<&RowFilter>,
        hint: ReadHint,
    ) -> Result<Vec<DataRow>> {
        let deadline = Instant::now() + self.lock_wait_timeout;
        let mut state = self.shared.lock();
        let dirty = hint == ReadHint::NoLock || self.isolation == IsolationLevel::ReadUncommitted;
        let versioned =
            state.config.read_committed_snapshot || self.isolation == IsolationLevel::Snapshot;
        let mode = if dirty {
            ReadMode::Dirty
        } else {
            ReadMode::Committed
        };

        let candidates = state.table(table)?.candidate_ids(filter);
        let mut rows = Vec::with_capacity(candidates.len());
        for id in candidates {
            if !dirty && !versioned {
                state = self.wait_for(state, deadline, tx, |s| s.read_blocker(table, id, tx))?;
            }
            let visible = state
                .table(table)?
                .rows
                .get(&id)
                .and_then(|row| row.version(tx, mode))
                .filter(|row| filter.is_none_or(|f| f.matches(row)))
                .cloned();
            rows.extend(visible);
        }
        Ok(rows)
    }

    fn insert_in(&self, tx: TxId, table: &str, rows: &[NewRow]) -> Result<usize> {
        let mut state = self.shared.lock();
        let rows_per_page = state.config.rows_per_page;
        let t = state.table_mut(table)?;

        if let Some(id) = rows
            .iter()
            .filter_map(|new| new.id)
            .find(|id| t.rows.contains_key(id))
        {
            return Err(LockscopeError::Database(format!(
                "duplicate key {} in '{}'",
                id, table
            )));
        }

        let mut inserted = Vec::with_capacity(rows.len());
        for new in rows {
            let id = t.assign_id(new.id);
            let location = t.allocate(rows_per_page);
            let data = DataRow {
                id,
                status: new.status.clone(),
                execution_start: new.execution_start,
                execution_end: new.execution_end,
            };
            t.rows.insert(
                id,
                StoredRow {
                    location,
                    committed: None,
                    pending: Some((tx, data)),
                },
            );
            inserted.push(id);
        }

        for id in &inserted {
            state.track_write(tx, table, *id);
        }
        Ok(inserted.len())
    }
}

impl Connection for SimConnection {
    fn session_id(&self) -> SessionId {
        self.session_id
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }

    fn begin(&mut self) -> Result<()> {
        if self.tx.is_some() {
            return Err(LockscopeError::TransactionState(format!(
                "session {} already has an open transaction",
                self.session_id
            )));
        }
        self.tx = Some(self.shared.lock().begin_tx());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            LockscopeError::TransactionState(format!(
                "commit without an open transaction on session {}",
                self.session_id
            ))
        })?;
        self.finish(tx, true);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        let tx = self.tx.take().ok_or_else(|| {
            LockscopeError::TransactionState(format!(
                "rollback without an open transaction on session {}",
                self.session_id
            ))
        })?;
        self.finish(tx, false);
        Ok(())
    }

    fn update_status(&mut self, table: &str, filter: &RowFilter, status: &str) -> Result<usize> {
        self.statement(|conn, tx| conn.update_in(tx, table, filter, status))
    }

    fn insert_rows(&mut self, table: &str, rows: &[NewRow]) -> Result<usize> {
        self.statement(|conn, tx| conn.insert_in(tx, table, rows))
    }

    fn truncate(&mut self, table: &str) -> Result<()> {
        self.shared.lock().table_mut(table)?.reset();
        Ok(())
    }

    fn select_rows(
        &mut self,
        table: &str,
        filter: Option<&RowFilter>,
        hint: ReadHint,
    ) -> Result<Vec<DataRow>> {
        self.statement(|conn, tx| conn.select_in(tx, table, filter, hint))
    }

    fn lock_records(&mut self) -> Result<Vec<LockSnapshotRow>> {
        Ok(self.shared.lock().lock_records())
    }

    fn record_identities(
        &mut self,
        table: &str,
        strategy: &IdentityStrategy,
    ) -> Result<Vec<(String, DataRow)>> {
        let state = self.shared.lock();
        let t = state.table(table)?;
        let tx = self.tx.unwrap_or_default();

        if let IdentityStrategy::KeyIndex(index) = strategy {
            let indexed = matches!(
                &t.layout,
                TableLayout::Clustered { index_name } if index_name.eq_ignore_ascii_case(index)
            );
            if !indexed {
                return Err(LockscopeError::Database(format!(
                    "index '{}' does not exist on table '{}'",
                    index, table
                )));
            }
        }

        Ok(t.rows
            .iter()
            .filter_map(|(id, row)| {
                let data = row.version(tx, ReadMode::Dirty)?.clone();
                let key = match strategy {
                    IdentityStrategy::PhysicalLocation => {
                        format!("(1:{}:{})", row.location.page, row.location.slot)
                    }
                    IdentityStrategy::KeyIndex(_) => {
                        format!("({:012x})", key_hash(t.object_id, *id))
                    }
                };
                Some((key, data))
            })
            .collect())
    }
}

impl Drop for SimConnection {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            tracing::debug!(
                session = self.session_id,
                "rolling back transaction of closed session"
            );
            self.finish(tx, false);
        }
    }
}
