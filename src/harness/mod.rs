//! Multi-session lock visibility harness.
//!
//! Three workers share one worker pool:
//!
//! - **First** updates the low id range and keeps its transaction open.
//! - **Second** updates the high id range while First still holds its locks.
//! - **Dump all locks** snapshots every session's locks once both updates
//!   hold theirs.
//!
//! Latches are the only ordering between them. Every lock snapshot is joined
//! back to the rows it locks through a [`RecordIdentity`] read before the run.

mod snapshot;
mod workers;


pub use snapshot::{AnnotatedLock, RecordIdentity, annotate, normalize_resource_key};
pub use workers::{DumpOutcome, FirstOutcome, SecondOutcome};

use crate::config::HarnessConfig;
use crate::db::{DataRow, Database, ReadHint, RowId, in_transaction};
use crate::error::{LockscopeError, Result};
use crate::observer::PooledLockObserver;
use crate::pool::{TaskHandle, WorkerPool};
use crate::provision::DatasetProvisioner;
use crate::sync::Cancellation;
use crate::transcript::Transcript;
use std::sync::Arc;
use std::time::{Duration, Instant};
use workers::{LatchSet, WorkerContext, render, run_worker};

/// How long a cancelled straggler gets to roll back.
const STRAGGLER_GRACE: Duration = Duration::from_secs(1);

/// Everything one run observed.
#[derive(Debug, Clone)]
pub struct ExperimentReport {
    pub table: String,
    /// First updates `id <= threshold`.
    pub threshold: RowId,
    /// Second updates `id > upper_bound`.
    pub upper_bound: RowId,
    pub first: Option<FirstOutcome>,
    pub dump: Option<DumpOutcome>,
    pub second: Option<SecondOutcome>,
    pub final_rows: Vec<DataRow>,
    /// False when the workers did not all finish within the completion budget.
    pub completed: bool,
}

pub struct ConcurrencyHarness {
    database: Arc<dyn Database>,
    provisioner: Arc<dyn DatasetProvisioner>,
    config: HarnessConfig,
    probe_timeout: Duration,
    transcript: Transcript,
}

impl ConcurrencyHarness {
    pub fn new(
        database: Arc<dyn Database>,
        provisioner: Arc<dyn DatasetProvisioner>,
        config: HarnessConfig,
        probe_timeout: Duration,
        transcript: Transcript,
    ) -> Self {
        Self {
            database,
            provisioner,
            config,
            probe_timeout,
            transcript,
        }
    }

    /// Reseed `table` and run the three workers against it.
    ///
    /// `key_index` names the clustered index whose key hashes identify rows;
    /// without it rows are identified by physical location only.
    pub fn run_experiment(&self, table: &str, key_index: Option<&str>) -> Result<ExperimentReport> {
        let started = Instant::now();
        let row_count = self.config.row_count;
        let threshold = (row_count as f64 * 0.6) as RowId;
        let upper_bound = threshold + (row_count as f64 * 0.1) as RowId;
        self.transcript.say(format!("count={}", row_count));
        self.transcript.say(format!("thresholdId={}", threshold));
        tracing::info!(table, row_count, threshold, upper_bound, "starting experiment");

        self.provisioner.truncate(table)?;
        self.provisioner.seed(table, row_count)?;
        let identity = RecordIdentity::load(self.database.as_ref(), table, key_index)?;
        tracing::debug!(table, identities = identity.len(), "record identities loaded");

        let pool = Arc::new(WorkerPool::new("harness", self.config.pool_size)?);
        let observer = Arc::new(PooledLockObserver::new(
            Arc::clone(&self.database),
            Arc::clone(&pool),
            self.probe_timeout,
        ));
        let ctx = Arc::new(WorkerContext {
            database: Arc::clone(&self.database),
            observer,
            identity,
            latches: LatchSet::new(),
            cancel: Cancellation::new(),
            transcript: self.transcript.clone(),
            config: self.config.clone(),
            table: table.to_string(),
            threshold,
            upper_bound,
        });

        let first = spawn(&pool, &ctx, "First", workers::first)?;
        let dump = spawn(&pool, &ctx, "Dump all locks", workers::dump_all)?;
        let second = spawn(&pool, &ctx, "Second", workers::second)?;

        let completion_timeout = self.config.completion_timeout();
        let completed = ctx
            .latches
            .all_done
            .wait_timeout(completion_timeout, &ctx.cancel)?;
        if !completed {
            tracing::warn!(
                table,
                ?completion_timeout,
                pending = ctx.latches.all_done.count(),
                "workers did not finish in time"
            );
            self.transcript
                .say("Wait all threads finishes work: ERROR not all actions finished");
        }

        // Collect before reading the table so no worker still holds its locks.
        let join_budget = if completed {
            completion_timeout
        } else {
            self.config.worker_budget()
        };
        let deadline = Instant::now() + join_budget;
        let first = join(&first, "First", deadline, &ctx.cancel);
        let dump = join(&dump, "Dump all locks", deadline, &ctx.cancel);
        let second = join(&second, "Second", deadline, &ctx.cancel);

        let final_rows = self.final_rows(table)?;
        self.transcript.say("final records");
        for row in &final_rows {
            self.transcript.raw(render(row));
        }
        self.transcript.say(format!(
            "All threads finished work at {:.3}",
            started.elapsed().as_secs_f64()
        ));

        Ok(ExperimentReport {
            table: table.to_string(),
            threshold,
            upper_bound,
            first: first?,
            dump: dump?,
            second: second?,
            final_rows,
            completed,
        })
    }

    fn final_rows(&self, table: &str) -> Result<Vec<DataRow>> {
        let mut conn = self.database.connect()?;
        in_transaction(conn.as_mut(), |c| {
            c.select_rows(table, None, ReadHint::Committed)
        })
    }
}

fn spawn<T, F>(
    pool: &WorkerPool,
    ctx: &Arc<WorkerContext>,
    name: &'static str,
    body: F,
) -> Result<TaskHandle<T>>
where
    T: Send + 'static,
    F: FnOnce(&WorkerContext) -> Result<T> + Send + 'static,
{
    let ctx = Arc::clone(ctx);
    pool.submit(move || run_worker(&ctx, name, body))
}

/// A worker's result, awaited until `deadline`.
///
/// A worker still running at the deadline is cancelled; workers cut short by
/// cancellation yield `None`.
fn join<T>(
    handle: &TaskHandle<T>,
    name: &str,
    deadline: Instant,
    cancel: &Cancellation,
) -> Result<Option<T>> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let outcome = match handle.poll(remaining) {
        Some(outcome) => outcome,
        None => {
            tracing::warn!(worker = name, "cancelling straggler");
            cancel.cancel();
            match handle.poll(STRAGGLER_GRACE) {
                Some(outcome) => outcome,
                None => return Ok(None),
            }
        }
    };
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(LockscopeError::Interrupted(_)) if cancel.is_cancelled() => Ok(None),
        Err(e) => Err(e),
    }
}
