//! Lock escalation threshold search.
//!
//! The search bisects a window of row counts. For each window end it updates
//! that many rows in a probe transaction, counts the row and table locks the
//! update left behind, and releases them again. A probe point is
//! *row-locked* while no table lock shows up and *table-locked* once the
//! engine escalated.
//!
//! Engines disagree on what is visible after escalation. Older ones replace
//! the row locks entirely, so the window position is the answer. Newer ones
//! keep the row locks taken before escalation, so the row lock count is the
//! answer. The search accepts both without knowing the engine version.

mod probe;

#[cfg(test)]
mod tests;

pub use probe::UpdateProbe;

use crate::db::RowId;
use crate::error::{LockscopeError, Result};
use crate::transcript::Transcript;
use std::fmt;

/// Current bisection window. `left <= right` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    left: RowId,
    right: RowId,
}

impl Range {
    pub fn new(left: RowId, right: RowId) -> Result<Self> {
        if left > right {
            return Err(LockscopeError::InvariantViolated(format!(
                "search window [{}, {}] is inverted",
                left, right
            )));
        }
        Ok(Self { left, right })
    }

    pub fn width(&self) -> RowId {
        self.right - self.left
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.left, self.right)
    }
}

/// Exclusive granted locks observed after one probe update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockCounts {
    pub row_lock_count: usize,
    pub table_lock_count: usize,
}

impl LockCounts {
    pub fn granularity(&self) -> Granularity {
        if self.table_lock_count > 0 {
            Granularity::TableLocked
        } else {
            Granularity::RowLocked
        }
    }
}

impl fmt::Display for LockCounts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "rows={} tables={}",
            self.row_lock_count, self.table_lock_count
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    RowLocked,
    TableLocked,
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Granularity::RowLocked => "ROW_LOCK",
            Granularity::TableLocked => "TABLE_LOCK",
        })
    }
}

/// Lock counts left behind by updating every row with `id <= probe point`.
///
/// Each call must start from a clean state: locks of an earlier probe are
/// released before it returns.
pub trait Probe {
    fn lock_counts_at(&mut self, id: RowId) -> Result<LockCounts>;
}

/// Outcome of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Narrow(Range),
    Done(RowId),
}

/// Decide the next window, or the threshold, from the lock counts at both ends.
pub(crate) fn decide(range: Range, left: LockCounts, right: LockCounts) -> Result<Step> {
    use Granularity::{RowLocked, TableLocked};

    match (left.granularity(), right.granularity()) {
        (RowLocked, RowLocked) => {
            return Err(LockscopeError::NoEscalationObserved(format!(
                "updating {} rows took only row locks; seed more rows and retry",
                range.right
            )));
        }
        (TableLocked, RowLocked) => {
            return Err(LockscopeError::InvariantViolated(format!(
                "{} rows escalated ({}) but {} rows did not ({}) in window {}",
                range.left, left, range.right, right, range
            )));
        }
        _ => {}
    }

    if range.width() <= 1 {
        let no_residual_rows = [left, right]
            .iter()
            .filter(|c| c.granularity() == TableLocked)
            .all(|c| c.row_lock_count == 0);
        let threshold = if no_residual_rows {
            // Escalation replaced the row locks: the window itself is the answer.
            range.left.max(range.right)
        } else {
            left.row_lock_count.max(right.row_lock_count) as RowId
        };
        return Ok(Step::Done(threshold));
    }

    let half = range.width() / 2;
    let next = match left.granularity() {
        RowLocked => Range::new(range.left + half, range.right)?,
        TableLocked => Range::new(range.left - half, range.left)?,
    };
    Ok(Step::Narrow(next))
}

/// Bisects for the row count at which the engine escalates to a table lock.
pub struct ThresholdFinder<P> {
    probe: P,
    transcript: Transcript,
}

impl<P: Probe> ThresholdFinder<P> {
    pub fn new(probe: P, transcript: Transcript) -> Self {
        Self { probe, transcript }
    }

    /// Search `[1, total_row_count]` for the escalation threshold.
    ///
    /// Probes run strictly one after another. Fails with
    /// [`LockscopeError::SearchExhausted`] after `total_row_count` iterations.
    pub fn find_escalation_threshold(&mut self, total_row_count: RowId) -> Result<RowId> {
        let mut range = Range::new(1, total_row_count)?;
        let mut iteration: RowId = 0;

        loop {
            iteration += 1;
            if iteration > total_row_count {
                return Err(LockscopeError::SearchExhausted(format!(
                    "{} iterations over {} rows, window {}",
                    iteration - 1,
                    total_row_count,
                    range
                )));
            }

            let left = self.probe.lock_counts_at(range.left)?;
            let right = self.probe.lock_counts_at(range.right)?;
            tracing::info!(
                iteration,
                %range,
                left = %left,
                right = %right,
                "probed search window"
            );
            self.transcript.say(format!(
                "{} => locks ({}; {}) ({}, {})",
                range,
                left,
                right,
                left.granularity(),
                right.granularity()
            ));

            match decide(range, left, right)? {
                Step::Narrow(next) => range = next,
                Step::Done(threshold) => {
                    let residual = [left, right].iter().any(|c| {
                        c.granularity() == Granularity::TableLocked && c.row_lock_count > 0
                    });
                    tracing::info!(
                        threshold,
                        iterations = iteration,
                        residual_row_locks = residual,
                        "escalation threshold found"
                    );
                    return Ok(threshold);
                }
            }
        }
    }
}
