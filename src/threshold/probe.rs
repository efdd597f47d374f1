use super::{LockCounts, Probe};
use crate::db::{Connection, RowFilter, RowId, Transaction};
use crate::error::Result;
use crate::observer::{LockKind, LockObserver, SessionScope};
use crate::provision::SEED_STATUS;
use std::sync::Arc;

/// Probes by updating rows on a dedicated connection and asking the
/// [`LockObserver`] what the update left behind.
pub struct UpdateProbe {
    conn: Box<dyn Connection>,
    observer: Arc<dyn LockObserver>,
    table: String,
}

impl UpdateProbe {
    pub fn new(conn: Box<dyn Connection>, observer: Arc<dyn LockObserver>, table: &str) -> Self {
        Self {
            conn,
            observer,
            table: table.to_string(),
        }
    }
}

impl Probe for UpdateProbe {
    fn lock_counts_at(&mut self, id: RowId) -> Result<LockCounts> {
        let mut tx = Transaction::begin(self.conn.as_mut())?;
        let updated = tx
            .conn()
            .update_status(&self.table, &RowFilter::UpTo(id), SEED_STATUS)?;

        let counts = LockCounts {
            row_lock_count: self
                .observer
                .probe_lock_counts(LockKind::Row, SessionScope::AllSessions)?,
            table_lock_count: self
                .observer
                .probe_lock_counts(LockKind::Table, SessionScope::AllSessions)?,
        };
        // Release the probe's locks so the next probe starts clean.
        tx.rollback()?;

        tracing::debug!(probe_id = id, updated, %counts, "probe finished");
        Ok(counts)
    }
}
