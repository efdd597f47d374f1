//! The three workers of the concurrency experiment.

use super::snapshot::{AnnotatedLock, RecordIdentity, annotate};
use crate::config::HarnessConfig;
use crate::db::{Connection, Database, RowFilter, RowId, SessionId, Transaction, in_transaction};
use crate::error::{LockscopeError, Result};
use crate::observer::{LockKind, LockObserver, SessionScope};
use crate::sync::{Cancellation, Latch};
use crate::transcript::Transcript;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub(super) const FIRST_STATUS: &str = "AAA";
pub(super) const SECOND_STATUS: &str = "BBB";

/// Synchronization points of one run.
pub(super) struct LatchSet {
    /// B1: First holds its locks, Second may start.
    pub second_may_start: Latch,
    /// B2: the global lock dump is taken.
    pub both_dumped: Latch,
    /// B3: Second is about to update.
    pub before_second_update: Latch,
    pub all_done: Latch,
}

impl LatchSet {
    pub fn new() -> Self {
        Self {
            second_may_start: Latch::new("second may start", 1),
            both_dumped: Latch::new("both dumped", 1),
            before_second_update: Latch::new("before second update", 1),
            all_done: Latch::new("all done", 3),
        }
    }
}

/// Everything a worker needs, shared by all three.
pub(super) struct WorkerContext {
    pub database: Arc<dyn Database>,
    pub observer: Arc<dyn LockObserver>,
    pub identity: RecordIdentity,
    pub latches: LatchSet,
    pub cancel: Cancellation,
    pub transcript: Transcript,
    pub config: HarnessConfig,
    pub table: String,
    pub threshold: RowId,
    pub upper_bound: RowId,
}

/// What the First worker saw while holding its low id range.
#[derive(Debug, Clone)]
pub struct FirstOutcome {
    pub session: SessionId,
    pub updated: usize,
    pub row_locks: usize,
    pub before_sleep: Vec<AnnotatedLock>,
    pub after_sleep: Vec<AnnotatedLock>,
}

/// The global lock dump.
#[derive(Debug, Clone)]
pub struct DumpOutcome {
    pub session: SessionId,
    pub locks: Vec<AnnotatedLock>,
}

/// What the Second worker saw while holding its high id range.
#[derive(Debug, Clone)]
pub struct SecondOutcome {
    pub session: SessionId,
    pub updated: usize,
    pub row_locks: usize,
    pub before_commit: Vec<AnnotatedLock>,
}

impl WorkerContext {
    fn say(&self, message: impl AsRef<str>) {
        self.transcript.say(message);
    }

    /// Wait on a mid-experiment latch; a timeout is reported and fails this worker only.
    fn await_latch(&self, why: &str, latch: &Latch) -> Result<()> {
        self.say(format!("{} latch.await", why));
        let timeout = self.config.barrier_timeout();
        if latch.wait_timeout(timeout, &self.cancel)? {
            return Ok(());
        }
        self.say(format!("{}: ERROR not all actions finished", why));
        tracing::warn!(latch = latch.name(), ?timeout, "latch wait timed out");
        Err(LockscopeError::TimeoutExceeded {
            what: format!("latch '{}'", latch.name()),
            timeout,
        })
    }

    fn dwell(&self, why: &str, duration: Duration) -> Result<()> {
        self.say(format!("{} Sleep for {:?}", why, duration));
        self.cancel.sleep(duration, why)
    }

    fn isolation(&self, conn: &dyn Connection) -> String {
        self.observer.current_isolation_level(conn).to_string()
    }

    /// Print and return the locks held by `session`.
    fn dump_session_locks(&self, message: &str, session: SessionId) -> Result<Vec<AnnotatedLock>> {
        self.say(message);
        self.say(format!("{} session={}", message, session));
        let locks = annotate(
            self.observer
                .snapshot_locks(SessionScope::ThisSession(session))?,
            &self.identity,
        );
        if locks.is_empty() {
            self.say(format!("{} no locks", message));
        } else {
            self.print_locks(message, &locks);
        }
        Ok(locks)
    }

    /// Print and return the locks of every session.
    fn dump_all_locks(&self, message: &str) -> Result<Vec<AnnotatedLock>> {
        self.say(message);
        let locks = annotate(
            self.observer.snapshot_locks(SessionScope::AllSessions)?,
            &self.identity,
        );
        self.print_locks(message, &locks);
        Ok(locks)
    }

    fn print_locks(&self, message: &str, locks: &[AnnotatedLock]) {
        self.say(format!("{} count={}", message, locks.len()));
        for lock in locks {
            self.transcript.raw(render(lock));
        }
    }
}

pub(super) fn render<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| format!("<unrenderable: {}>", e))
}

fn elapsed_secs(started: Instant) -> f64 {
    started.elapsed().as_secs_f64()
}

/// Run a worker body and count down `all_done` whatever its outcome.
pub(super) fn run_worker<T>(
    ctx: &WorkerContext,
    name: &str,
    body: impl FnOnce(&WorkerContext) -> Result<T>,
) -> Result<T> {
    let result = body(ctx);
    if let Err(e) = &result {
        ctx.say(format!("{}) failed: {}", name, e));
        tracing::warn!(worker = name, error = %e, "worker failed");
    }
    ctx.latches.all_done.count_down();
    result
}

/// Holds row locks on `id <= threshold` across a dwell, snapshotting them before and after.
pub(super) fn first(ctx: &WorkerContext) -> Result<FirstOutcome> {
    ctx.say("First) start");
    let started = Instant::now();
    let mut conn = ctx.database.connect()?;
    let session = ctx.observer.current_session_id(conn.as_ref());

    let mut tx = Transaction::begin(conn.as_mut())?;
    ctx.say(format!("First) tx isolation = {}", ctx.isolation(tx.conn())));
    ctx.say(format!("First) Update IDs <= {}", ctx.threshold));
    let updated = tx.conn().update_status(
        &ctx.table,
        &RowFilter::UpTo(ctx.threshold),
        FIRST_STATUS,
    )?;
    ctx.say(format!("First) update-count = {}", updated));

    let row_locks = ctx
        .observer
        .probe_lock_counts(LockKind::Row, SessionScope::ThisSession(session))?;
    ctx.say(format!("First) row-locks = {}", row_locks));
    let before_sleep = ctx.dump_session_locks("First) locks before countDown & sleep", session)?;

    ctx.latches.second_may_start.count_down();

    ctx.dwell("First)", ctx.config.first_dwell())?;
    ctx.say("First) sleep ends");
    let after_sleep = ctx.dump_session_locks("First) locks after sleep", session)?;
    tx.commit()?;

    ctx.say(format!("First) End, total seconds {:.3}", elapsed_secs(started)));
    Ok(FirstOutcome {
        session,
        updated,
        row_locks,
        before_sleep,
        after_sleep,
    })
}

/// Takes one read-only snapshot of every session's locks while both updates hold theirs.
pub(super) fn dump_all(ctx: &WorkerContext) -> Result<DumpOutcome> {
    ctx.say("Dump all locks) start");
    let started = Instant::now();

    ctx.await_latch(
        "Dump all locks) Wait until second may start",
        &ctx.latches.second_may_start,
    )?;
    ctx.await_latch(
        "Dump all locks) Wait until we are before second UPDATE",
        &ctx.latches.before_second_update,
    )?;
    ctx.dwell("Dump all locks) Let the engine take locks", ctx.config.dump_settle())?;

    let mut conn = ctx.database.connect()?;
    let session = ctx.observer.current_session_id(conn.as_ref());
    let locks = in_transaction(conn.as_mut(), |c| {
        ctx.say(format!("Dump all locks) tx isolation = {}", ctx.isolation(c)));
        ctx.dump_all_locks("Dump all locks)")
    })?;

    ctx.latches.both_dumped.count_down();
    ctx.say("Dump all locks) end");
    ctx.say(format!(
        "Dump all locks) total seconds {:.3}",
        elapsed_secs(started)
    ));
    Ok(DumpOutcome { session, locks })
}

/// Updates `id > upper_bound` while First still holds its range, then snapshots its own locks.
pub(super) fn second(ctx: &WorkerContext) -> Result<SecondOutcome> {
    ctx.say("Second) start");
    ctx.await_latch("Second)", &ctx.latches.second_may_start)?;
    let started = Instant::now();

    let mut conn = ctx.database.connect()?;
    let session = ctx.observer.current_session_id(conn.as_ref());

    let mut tx = Transaction::begin(conn.as_mut())?;
    ctx.say(format!("Second) tx isolation = {}", ctx.isolation(tx.conn())));
    ctx.say(format!("Second) Update IDs > {}", ctx.upper_bound));

    ctx.latches.before_second_update.count_down();
    let updated = tx.conn().update_status(
        &ctx.table,
        &RowFilter::Above(ctx.upper_bound),
        SECOND_STATUS,
    )?;
    ctx.say(format!("Second) update-count = {}", updated));

    ctx.await_latch("Second) after dumped all locks", &ctx.latches.both_dumped)?;

    let row_locks = ctx
        .observer
        .probe_lock_counts(LockKind::Row, SessionScope::ThisSession(session))?;
    ctx.say(format!("Second) row-locks = {}", row_locks));
    let before_commit =
        ctx.dump_session_locks("Second) locks after UPDATE before commit", session)?;
    tx.commit()?;

    ctx.dwell("Second)", ctx.config.second_dwell())?;
    ctx.say("Second) sleep ends");
    ctx.say(format!("Second) End, total seconds {:.3}", elapsed_secs(started)));
    Ok(SecondOutcome {
        session,
        updated,
        row_locks,
        before_commit,
    })
}
