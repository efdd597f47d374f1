//! RAII transaction guard.

use super::Connection;
use crate::error::Result;

/// RAII guard for an open transaction.
///
/// When dropped without [`commit`](Self::commit) or
/// [`rollback`](Self::rollback), the transaction is rolled back. If the
/// rollback fails, a warning is logged but no panic occurs.
pub struct Transaction<'c> {
    conn: &'c mut dyn Connection,

    /// Whether the transaction has been finished explicitly.
    finished: bool,
}

impl<'c> Transaction<'c> {
    /// Begin a transaction on the connection.
    pub fn begin(conn: &'c mut dyn Connection) -> Result<Self> {
        conn.begin()?;
        Ok(Self {
            conn,
            finished: false,
        })
    }

    /// The connection the transaction runs on.
    pub fn conn(&mut self) -> &mut dyn Connection {
        &mut *self.conn
    }

    pub fn commit(mut self) -> Result<()> {
        self.finished = true;
        self.conn.commit()
    }

    pub fn rollback(mut self) -> Result<()> {
        self.finished = true;
        self.conn.rollback()
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished
            && let Err(e) = self.conn.rollback()
        {
            tracing::warn!(
                session = self.conn.session_id(),
                "failed to roll back abandoned transaction: {}",
                e
            );
        }
    }
}

/// Run `work` in its own transaction: commit on `Ok`, roll back on `Err`.
pub fn in_transaction<T>(
    conn: &mut dyn Connection,
    work: impl FnOnce(&mut dyn Connection) -> Result<T>,
) -> Result<T> {
    let mut tx = Transaction::begin(conn)?;
    let value = work(tx.conn())?;
    tx.commit()?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, ReadHint, RowFilter};
    use crate::error::LockscopeError;
    use crate::test_support::seeded_heap;

    #[test]
    fn test_in_transaction_commits_on_success() {
        let (db, table) = seeded_heap(5);
        let mut conn = db.connect().unwrap();

        let updated = in_transaction(conn.as_mut(), |c| {
            c.update_status(&table, &RowFilter::UpTo(2), "AAA")
        })
        .unwrap();
        assert_eq!(updated, 2);
        assert!(!conn.in_transaction());

        let mut reader = db.connect().unwrap();
        let rows = reader.select_rows(&table, None, ReadHint::Committed).unwrap();
        let changed = rows.iter().filter(|r| r.status == "AAA").count();
        assert_eq!(changed, 2);
    }

    #[test]
    fn test_in_transaction_rolls_back_on_error() {
        let (db, table) = seeded_heap(5);
        let mut conn = db.connect().unwrap();

        let result: Result<()> = in_transaction(conn.as_mut(), |c| {
            c.update_status(&table, &RowFilter::UpTo(5), "AAA")?;
            Err(LockscopeError::UserError("abort".to_string()))
        });
        assert!(result.is_err());
        assert!(!conn.in_transaction());

        let rows = conn.select_rows(&table, None, ReadHint::Committed).unwrap();
        assert!(rows.iter().all(|r| r.status == "XXX"));
        assert!(conn.lock_records().unwrap().is_empty());
    }

    #[test]
    fn test_dropped_guard_rolls_back() {
        let (db, table) = seeded_heap(3);
        let mut conn = db.connect().unwrap();
        {
            let mut tx = Transaction::begin(conn.as_mut()).unwrap();
            tx.conn()
                .update_status(&table, &RowFilter::UpTo(3), "BBB")
                .unwrap();
        }
        assert!(!conn.in_transaction());
        let rows = conn.select_rows(&table, None, ReadHint::Committed).unwrap();
        assert!(rows.iter().all(|r| r.status == "XXX"));
    }

    #[test]
    fn test_nested_begin_is_rejected() {
        let (db, _table) = seeded_heap(1);
        let mut conn = db.connect().unwrap();
        let mut tx = Transaction::begin(conn.as_mut()).unwrap();
        let err = tx.conn().begin().unwrap_err();
        assert!(matches!(err, LockscopeError::TransactionState(_)));
        tx.rollback().unwrap();
    }
}
