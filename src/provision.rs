//! Test data provisioning.

use crate::db::{Database, NewRow, RowId, TableLayout, in_transaction};
use crate::error::Result;
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;

/// Status every seeded row starts with.
pub const SEED_STATUS: &str = "XXX";

/// Prepares the fixed-shape test tables the experiments run against.
pub trait DatasetProvisioner: Send + Sync {
    fn truncate(&self, table: &str) -> Result<()>;

    /// Insert `row_count` rows with status [`SEED_STATUS`]; ids are assigned by the engine.
    fn seed(&self, table: &str, row_count: usize) -> Result<usize>;

    /// Drop `table` if present and create it empty with `layout`.
    fn recreate(&self, table: &str, layout: TableLayout) -> Result<()>;

    /// Insert rows with explicit ids and statuses.
    fn fill(&self, table: &str, rows: &[(RowId, &str)]) -> Result<usize>;
}

/// [`DatasetProvisioner`] issuing plain statements through a [`Database`].
pub struct EngineProvisioner {
    database: Arc<dyn Database>,
}

impl EngineProvisioner {
    pub fn new(database: Arc<dyn Database>) -> Self {
        Self { database }
    }

    fn insert(&self, table: &str, rows: Vec<NewRow>) -> Result<usize> {
        let mut conn = self.database.connect()?;
        in_transaction(conn.as_mut(), |c| c.insert_rows(table, &rows))
    }
}

impl DatasetProvisioner for EngineProvisioner {
    fn truncate(&self, table: &str) -> Result<()> {
        let mut conn = self.database.connect()?;
        in_transaction(conn.as_mut(), |c| c.truncate(table))
    }

    fn seed(&self, table: &str, row_count: usize) -> Result<usize> {
        tracing::info!(table, row_count, "seeding rows");
        let mut rng = rand::thread_rng();
        let rows = (0..row_count)
            .map(|_| {
                let now = Utc::now();
                NewRow {
                    id: None,
                    status: SEED_STATUS.to_string(),
                    execution_start: now,
                    execution_end: rng.gen_bool(0.5).then_some(now),
                }
            })
            .collect();
        let inserted = self.insert(table, rows)?;
        tracing::debug!(table, inserted, "seeding finished");
        Ok(inserted)
    }

    fn recreate(&self, table: &str, layout: TableLayout) -> Result<()> {
        self.database.drop_table(table)?;
        self.database.create_table(table, layout)
    }

    fn fill(&self, table: &str, rows: &[(RowId, &str)]) -> Result<usize> {
        let now = Utc::now();
        let rows = rows
            .iter()
            .map(|(id, status)| NewRow {
                id: Some(*id),
                status: status.to_string(),
                execution_start: now,
                execution_end: None,
            })
            .collect();
        self.insert(table, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{ReadHint, RowFilter};
    use crate::test_support::seeded_heap;

    #[test]
    fn test_truncate_then_seed_yields_sequential_ids() {
        let (db, table) = seeded_heap(3);
        let db: Arc<dyn Database> = Arc::new(db);
        let provisioner = EngineProvisioner::new(Arc::clone(&db));

        provisioner.truncate(&table).unwrap();
        assert_eq!(provisioner.seed(&table, 25).unwrap(), 25);

        let mut conn = db.connect().unwrap();
        let rows = conn.select_rows(&table, None, ReadHint::Committed).unwrap();
        let ids: Vec<RowId> = rows.iter().map(|r| r.id).collect();
        assert_eq!(ids, (1..=25).collect::<Vec<_>>());
        assert!(rows.iter().all(|r| r.status == SEED_STATUS));
        assert!(
            rows.iter()
                .all(|r| r.execution_end.is_none_or(|end| end == r.execution_start))
        );
    }

    #[test]
    fn test_recreate_and_fill_builds_a_fresh_table() {
        let (db, _) = seeded_heap(1);
        let db: Arc<dyn Database> = Arc::new(db);
        let provisioner = EngineProvisioner::new(Arc::clone(&db));

        provisioner.recreate("TestTable", TableLayout::Heap).unwrap();
        provisioner
            .fill("TestTable", &[(1, "A"), (2, "B"), (3, "C")])
            .unwrap();
        // Recreating again discards the previous rows.
        provisioner.recreate("TestTable", TableLayout::Heap).unwrap();
        provisioner.fill("TestTable", &[(1, "A")]).unwrap();

        let mut conn = db.connect().unwrap();
        let rows = conn
            .select_rows(
                "TestTable",
                Some(&RowFilter::StatusEquals("A".to_string())),
                ReadHint::Committed,
            )
            .unwrap();
        assert_eq!(rows.len(), 1);
    }
}
