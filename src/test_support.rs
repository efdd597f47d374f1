use crate::config::{Config, EngineConfig, EscalationMode};
use crate::db::sim::SimDatabase;
use crate::db::{Connection, Database, NewRow, RowId, TableLayout};
use chrono::Utc;

pub(crate) const HEAP_TABLE: &str = "foo.FOO_LOCK_TABLE_NO_PK";

/// Engine settings with the given escalation behavior and a short lock wait.
pub(crate) fn engine_config(threshold: usize, escalation: EscalationMode) -> EngineConfig {
    EngineConfig {
        escalation_threshold: threshold,
        escalation,
        rows_per_page: 100,
        lock_wait_timeout_ms: 5_000,
        read_committed_snapshot: false,
    }
}

/// A fresh engine with one table holding `rows` committed rows (ids `1..=rows`).
pub(crate) fn engine_with_rows(
    config: EngineConfig,
    table: &str,
    layout: TableLayout,
    rows: usize,
) -> SimDatabase {
    let db = SimDatabase::new(config);
    db.create_table(table, layout).unwrap();
    let mut conn = db.connect().unwrap();
    insert_statuses(conn.as_mut(), table, (1..=rows as RowId).map(|id| (id, "XXX")));
    db
}

/// A heap table of `rows` rows with status `XXX` on an engine that never escalates.
pub(crate) fn seeded_heap(rows: usize) -> (SimDatabase, String) {
    let config = engine_config(usize::MAX, EscalationMode::Full);
    let db = engine_with_rows(config, HEAP_TABLE, TableLayout::Heap, rows);
    (db, HEAP_TABLE.to_string())
}

pub(crate) fn insert_statuses<'a>(
    conn: &mut dyn Connection,
    table: &str,
    rows: impl IntoIterator<Item = (RowId, &'a str)>,
) {
    let rows: Vec<NewRow> = rows
        .into_iter()
        .map(|(id, status)| NewRow {
            id: Some(id),
            status: status.to_string(),
            execution_start: Utc::now(),
            execution_end: None,
        })
        .collect();
    conn.insert_rows(table, &rows).unwrap();
}

/// Configuration with every dwell and timeout shrunk to test scale.
pub(crate) fn fast_config() -> Config {
    let mut config = Config::default();
    config.engine.lock_wait_timeout_ms = 5_000;
    config.observer.probe_timeout_ms = 2_000;
    config.threshold.row_count = 500;
    config.threshold.pool_size = 2;
    config.harness.barrier_timeout_ms = 5_000;
    config.harness.completion_timeout_ms = 5_000;
    config.harness.first_dwell_ms = 400;
    config.harness.dump_settle_ms = 100;
    config.harness.second_dwell_ms = 100;
    config.tx_wait.writer_hold_ms = 300;
    config.tx_wait.reader_delay_ms = 50;
    config.tx_wait.completion_timeout_ms = 5_000;
    config
}
