//! Tests for the threshold search.

use super::*;
use crate::config::EscalationMode;
use crate::db::{Database, TableLayout};
use crate::observer::PooledLockObserver;
use crate::pool::WorkerPool;
use crate::test_support::{HEAP_TABLE, engine_config, engine_with_rows};
use std::sync::Arc;
use std::time::Duration;

/// Escalation model of an engine with threshold `threshold`.
struct ModelProbe {
    threshold: RowId,
    residual: bool,
    probed: Vec<RowId>,
}

impl ModelProbe {
    fn new(threshold: RowId, residual: bool) -> Self {
        Self {
            threshold,
            residual,
            probed: Vec::new(),
        }
    }
}

impl Probe for ModelProbe {
    fn lock_counts_at(&mut self, id: RowId) -> Result<LockCounts> {
        self.probed.push(id);
        let rows = id.max(0) as usize;
        let counts = if id >= self.threshold {
            LockCounts {
                row_lock_count: if self.residual {
                    self.threshold as usize
                } else {
                    0
                },
                table_lock_count: 1,
            }
        } else {
            LockCounts {
                row_lock_count: rows,
                table_lock_count: 0,
            }
        };
        Ok(counts)
    }
}

fn find(total: RowId, threshold: RowId, residual: bool) -> Result<RowId> {
    let mut finder =
        ThresholdFinder::new(ModelProbe::new(threshold, residual), Transcript::captured());
    finder.find_escalation_threshold(total)
}

fn row(count: usize) -> LockCounts {
    LockCounts {
        row_lock_count: count,
        table_lock_count: 0,
    }
}

fn table(rows: usize) -> LockCounts {
    LockCounts {
        row_lock_count: rows,
        table_lock_count: 1,
    }
}

#[test]
fn test_range_rejects_inverted_bounds() {
    assert!(Range::new(5, 5).is_ok());
    let err = Range::new(6, 5).unwrap_err();
    assert!(matches!(err, LockscopeError::InvariantViolated(_)));
    assert_eq!(Range::new(1, 10).unwrap().to_string(), "[1, 10]");
}

#[test]
fn test_granularity_follows_table_lock_count() {
    assert_eq!(row(7).granularity(), Granularity::RowLocked);
    assert_eq!(table(0).granularity(), Granularity::TableLocked);
}

#[test]
fn test_row_then_table_moves_left_bound_up() {
    let range = Range::new(1, 10_000).unwrap();
    let step = decide(range, row(1), table(0)).unwrap();
    assert_eq!(step, Step::Narrow(Range::new(5_000, 10_000).unwrap()));
}

#[test]
fn test_table_then_table_moves_window_down() {
    let range = Range::new(5_000, 10_000).unwrap();
    let step = decide(range, table(0), table(0)).unwrap();
    assert_eq!(step, Step::Narrow(Range::new(2_500, 5_000).unwrap()));
}

#[test]
fn test_row_then_row_means_no_escalation() {
    let range = Range::new(1, 100).unwrap();
    let err = decide(range, row(1), row(100)).unwrap_err();
    assert!(matches!(err, LockscopeError::NoEscalationObserved(_)));
    assert!(err.to_string().contains("seed more rows"));

    // Also at minimum width.
    let narrow = Range::new(99, 100).unwrap();
    assert!(decide(narrow, row(99), row(100)).is_err());
}

#[test]
fn test_table_then_row_is_impossible() {
    for range in [Range::new(1, 100).unwrap(), Range::new(10, 11).unwrap()] {
        let err = decide(range, table(0), row(11)).unwrap_err();
        assert!(matches!(err, LockscopeError::InvariantViolated(_)));
        assert_eq!(err.exit_code(), crate::exit_codes::SEARCH_FAILURE);
    }
}

#[test]
fn test_termination_without_residual_rows_reports_window() {
    let range = Range::new(4_999, 5_000).unwrap();
    assert_eq!(decide(range, row(4_999), table(0)).unwrap(), Step::Done(5_000));

    let range = Range::new(5_000, 5_001).unwrap();
    assert_eq!(decide(range, table(0), table(0)).unwrap(), Step::Done(5_001));
}

#[test]
fn test_termination_with_residual_rows_reports_row_count() {
    let range = Range::new(5_003, 5_004).unwrap();
    assert_eq!(
        decide(range, table(5_000), table(5_000)).unwrap(),
        Step::Done(5_000)
    );

    let range = Range::new(4_999, 5_000).unwrap();
    assert_eq!(
        decide(range, row(4_999), table(5_000)).unwrap(),
        Step::Done(5_000)
    );
}

#[test]
fn test_default_scale_finds_5000_for_both_engine_behaviors() {
    assert_eq!(find(10_000, 5_000, true).unwrap(), 5_000);
    assert_eq!(find(10_000, 5_000, false).unwrap(), 5_000);
}

#[test]
fn test_newer_engine_threshold_is_exact_for_every_position() {
    for total in 1..=64 {
        for threshold in 1..=total {
            assert_eq!(
                find(total, threshold, true).unwrap(),
                threshold,
                "total={} threshold={}",
                total,
                threshold
            );
        }
    }
}

#[test]
fn test_older_engine_threshold_is_close_above() {
    for total in 1..=64 {
        for threshold in 1..=total {
            let found = find(total, threshold, false).unwrap();
            assert!(
                (threshold..=threshold + 9).contains(&found),
                "total={} threshold={} found={}",
                total,
                threshold,
                found
            );
        }
    }
}

#[test]
fn test_window_too_small_is_reported() {
    let err = find(100, 500, true).unwrap_err();
    assert!(matches!(err, LockscopeError::NoEscalationObserved(_)));
}

#[test]
fn test_single_row_table_fails_fast() {
    let mut finder = ThresholdFinder::new(ModelProbe::new(500, true), Transcript::captured());
    let err = finder.find_escalation_threshold(1).unwrap_err();
    assert!(matches!(err, LockscopeError::NoEscalationObserved(_)));
    assert_eq!(finder.probe.probed, vec![1, 1]);
}

#[test]
fn test_window_width_strictly_decreases() {
    let mut finder = ThresholdFinder::new(ModelProbe::new(3_217, true), Transcript::captured());
    finder.find_escalation_threshold(10_000).unwrap();

    let probed = &finder.probe.probed;
    assert_eq!(probed.len() % 2, 0);
    let widths: Vec<RowId> = probed.chunks(2).map(|pair| pair[1] - pair[0]).collect();
    assert!(widths.windows(2).all(|w| w[1] < w[0]), "{:?}", widths);
    // One left and one right probe per iteration, bounded by log2 of the window.
    assert!(widths.len() <= 16);
}

#[test]
fn test_every_iteration_is_written_to_the_transcript() {
    let transcript = Transcript::captured();
    let mut finder = ThresholdFinder::new(ModelProbe::new(5_000, true), transcript.clone());
    finder.find_escalation_threshold(10_000).unwrap();

    let lines = transcript.lines();
    assert!(lines[0].contains("[1, 10000] => locks"));
    assert!(lines[0].ends_with("(ROW_LOCK, TABLE_LOCK)"));
    assert_eq!(lines.len(), finder.probe.probed.len() / 2);
}

struct FailingProbe;

impl Probe for FailingProbe {
    fn lock_counts_at(&mut self, _id: RowId) -> Result<LockCounts> {
        Err(LockscopeError::ObserverTimeout(Duration::from_secs(5)))
    }
}

#[test]
fn test_probe_failure_propagates() {
    let mut finder = ThresholdFinder::new(FailingProbe, Transcript::captured());
    let err = finder.find_escalation_threshold(100).unwrap_err();
    assert!(err.is_timeout());
}

fn engine_search(escalation: EscalationMode, rows: usize, threshold: usize) -> RowId {
    let db = engine_with_rows(
        engine_config(threshold, escalation),
        HEAP_TABLE,
        TableLayout::Heap,
        rows,
    );
    let db: Arc<dyn Database> = Arc::new(db);
    let pool = Arc::new(WorkerPool::new("observer", 2).unwrap());
    let observer = Arc::new(PooledLockObserver::new(
        Arc::clone(&db),
        pool,
        Duration::from_secs(5),
    ));
    let probe = UpdateProbe::new(db.connect().unwrap(), observer, HEAP_TABLE);
    let mut finder = ThresholdFinder::new(probe, Transcript::captured());
    finder.find_escalation_threshold(rows as RowId).unwrap()
}

#[test]
fn test_engine_with_full_escalation() {
    assert_eq!(engine_search(EscalationMode::Full, 1_000, 500), 500);
}

#[test]
fn test_engine_with_residual_row_locks() {
    assert_eq!(engine_search(EscalationMode::Residual, 1_000, 500), 500);
}

#[test]
fn test_probes_leave_no_locks_behind() {
    let db = engine_with_rows(
        engine_config(50, EscalationMode::Full),
        HEAP_TABLE,
        TableLayout::Heap,
        100,
    );
    let db: Arc<dyn Database> = Arc::new(db);
    let pool = Arc::new(WorkerPool::new("observer", 1).unwrap());
    let observer = Arc::new(PooledLockObserver::new(
        Arc::clone(&db),
        pool,
        Duration::from_secs(5),
    ));
    let mut probe = UpdateProbe::new(db.connect().unwrap(), observer, HEAP_TABLE);

    assert_eq!(probe.lock_counts_at(80).unwrap(), table(0));
    assert_eq!(probe.lock_counts_at(10).unwrap(), row(10));
    assert_eq!(probe.lock_counts_at(0).unwrap(), row(0));

    let mut conn = db.connect().unwrap();
    assert!(conn.lock_records().unwrap().is_empty());
}
