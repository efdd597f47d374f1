//! Lock observation from a separate session.
//!
//! Every observation runs on a pool thread, on its own connection and in its
//! own transaction, so it never queues behind the locks of the experiment it
//! watches. The caller waits for the answer with a fixed budget.

use crate::db::{
    Connection, Database, IsolationLevel, LockMode, LockSnapshotRow, RequestStatus, ResourceType,
    SessionId, in_transaction,
};
use crate::error::{LockscopeError, Result};
use crate::pool::WorkerPool;
use std::sync::Arc;
use std::time::Duration;

/// Lock granularity a count is taken for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Row,
    Table,
}

impl LockKind {
    fn resource_type(self) -> ResourceType {
        match self {
            LockKind::Row => ResourceType::Row,
            LockKind::Table => ResourceType::Table,
        }
    }
}

/// Which sessions' locks an observation covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionScope {
    /// Locks of the given (caller's) session only.
    ThisSession(SessionId),
    AllSessions,
}

impl SessionScope {
    fn includes(&self, session: SessionId) -> bool {
        match self {
            SessionScope::ThisSession(id) => *id == session,
            SessionScope::AllSessions => true,
        }
    }
}

pub trait LockObserver: Send + Sync {
    /// Number of exclusive, granted locks of `kind` within `scope`.
    fn probe_lock_counts(&self, kind: LockKind, scope: SessionScope) -> Result<usize>;

    /// Every lock record within `scope`.
    fn snapshot_locks(&self, scope: SessionScope) -> Result<Vec<LockSnapshotRow>>;

    fn current_session_id(&self, conn: &dyn Connection) -> SessionId {
        conn.session_id()
    }

    fn current_isolation_level(&self, conn: &dyn Connection) -> IsolationLevel {
        conn.isolation_level()
    }
}

/// Counts exclusive granted locks of `kind` within `scope`.
pub fn count_locks(records: &[LockSnapshotRow], kind: LockKind, scope: SessionScope) -> usize {
    records
        .iter()
        .filter(|r| {
            r.resource_type == kind.resource_type()
                && r.request_mode == LockMode::Exclusive
                && r.request_status == RequestStatus::Granted
                && scope.includes(r.session_id)
        })
        .count()
}

/// [`LockObserver`] that queries the engine's lock view from a worker pool.
pub struct PooledLockObserver {
    database: Arc<dyn Database>,
    pool: Arc<WorkerPool>,
    timeout: Duration,
}

impl PooledLockObserver {
    pub fn new(database: Arc<dyn Database>, pool: Arc<WorkerPool>, timeout: Duration) -> Self {
        Self {
            database,
            pool,
            timeout,
        }
    }

    /// Read every lock record through a fresh session and transaction.
    fn observe<T, F>(&self, select: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(Vec<LockSnapshotRow>) -> T + Send + 'static,
    {
        let database = Arc::clone(&self.database);
        let handle = self.pool.submit(move || {
            let mut conn = database.connect()?;
            let records = in_transaction(conn.as_mut(), |c| c.lock_records())?;
            Ok(select(records))
        })?;

        handle.wait(self.timeout).map_err(|e| match e {
            LockscopeError::TimeoutExceeded { .. } => LockscopeError::ObserverTimeout(self.timeout),
            LockscopeError::Interrupted(_) => e,
            other => LockscopeError::ObserverExecution(other.to_string()),
        })
    }
}

impl LockObserver for PooledLockObserver {
    fn probe_lock_counts(&self, kind: LockKind, scope: SessionScope) -> Result<usize> {
        let count = self.observe(move |records| count_locks(&records, kind, scope))?;
        tracing::debug!(?kind, ?scope, count, "lock count observed");
        Ok(count)
    }

    fn snapshot_locks(&self, scope: SessionScope) -> Result<Vec<LockSnapshotRow>> {
        self.observe(move |records| {
            records
                .into_iter()
                .filter(|r| scope.includes(r.session_id))
                .collect()
        })
    }
}
