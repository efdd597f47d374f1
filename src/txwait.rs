//! How long a reader waits behind an uncommitted writer.
//!
//! Tx1 updates one row and keeps its transaction open. Tx2 starts a little
//! later and reads the whole table. Under locking read committed Tx2 queues
//! behind Tx1's exclusive lock; with read-committed snapshot it reads the
//! last committed version right away.

use crate::config::TxWaitConfig;
use crate::db::{Database, ReadHint, RowFilter, RowId, TableLayout, Transaction, in_transaction};
use crate::error::{LockscopeError, Result};
use crate::pool::WorkerPool;
use crate::provision::DatasetProvisioner;
use crate::sync::{Cancellation, Latch};
use crate::transcript::Transcript;
use std::sync::Arc;
use std::time::{Duration, Instant};

const INITIAL_ROWS: [(RowId, &str); 3] = [(1, "A"), (2, "B"), (3, "C")];

/// Durations measured by one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TxWaitReport {
    /// Tx1 from begin to commit.
    pub writer: Duration,
    /// Tx2 from begin to commit.
    pub reader: Duration,
    /// Rows Tx2 read.
    pub rows_read: usize,
    pub reader_finished_after_writer: bool,
}

struct Shared {
    database: Arc<dyn Database>,
    config: TxWaitConfig,
    transcript: Transcript,
    cancel: Cancellation,
    done: Latch,
}

pub struct TxWaitExperiment {
    database: Arc<dyn Database>,
    provisioner: Arc<dyn DatasetProvisioner>,
    config: TxWaitConfig,
    transcript: Transcript,
}

impl TxWaitExperiment {
    pub fn new(
        database: Arc<dyn Database>,
        provisioner: Arc<dyn DatasetProvisioner>,
        config: TxWaitConfig,
        transcript: Transcript,
    ) -> Self {
        Self {
            database,
            provisioner,
            config,
            transcript,
        }
    }

    pub fn run(&self) -> Result<TxWaitReport> {
        for table in [&self.config.table, &self.config.companion_table] {
            self.transcript.say(format!("Recreate table: {}", table));
            self.provisioner.recreate(table, TableLayout::Heap)?;
            self.transcript.say(format!("Fill table with data: {}", table));
            self.provisioner.fill(table, &INITIAL_ROWS)?;
        }

        let pool = WorkerPool::new("tx-wait", self.config.pool_size)?;
        let shared = Arc::new(Shared {
            database: Arc::clone(&self.database),
            config: self.config.clone(),
            transcript: self.transcript.clone(),
            cancel: Cancellation::new(),
            done: Latch::new("tx-wait done", 2),
        });

        let writer = {
            let shared = Arc::clone(&shared);
            pool.submit(move || {
                let outcome = write(&shared);
                shared.done.count_down();
                outcome
            })?
        };
        let reader = {
            let shared = Arc::clone(&shared);
            pool.submit(move || {
                let outcome = read(&shared);
                shared.done.count_down();
                outcome
            })?
        };

        let timeout = self.config.completion_timeout();
        if !shared.done.wait_timeout(timeout, &shared.cancel)? {
            shared.cancel.cancel();
            return Err(LockscopeError::TimeoutExceeded {
                what: "both transactions to finish".to_string(),
                timeout,
            });
        }

        let (writer, writer_end) = writer.wait(timeout)?;
        let (reader, reader_end, rows_read) = reader.wait(timeout)?;
        self.transcript
            .say(format!("Tx1 time={:.3}", writer.as_secs_f64()));
        self.transcript
            .say(format!("Tx2 time={:.3}", reader.as_secs_f64()));
        tracing::info!(?writer, ?reader, rows_read, "transaction wait measured");

        Ok(TxWaitReport {
            writer,
            reader,
            rows_read,
            reader_finished_after_writer: reader_end >= writer_end,
        })
    }
}

/// Tx1: update `A` to `X` and hold the transaction open.
fn write(shared: &Shared) -> Result<(Duration, Instant)> {
    shared.transcript.say("Begin Tx1");
    let started = Instant::now();
    let mut conn = shared.database.connect()?;
    let mut tx = Transaction::begin(conn.as_mut())?;
    let updated = tx.conn().update_status(
        &shared.config.table,
        &RowFilter::StatusEquals("A".to_string()),
        "X",
    )?;
    tracing::debug!(updated, "writer holds its update");
    shared.cancel.sleep(shared.config.writer_hold(), "holding the writer open")?;
    shared.transcript.say("Commit Tx1");
    let committing = Instant::now();
    tx.commit()?;
    shared.transcript.say("End Tx1");
    Ok((started.elapsed(), committing))
}

/// Tx2: wait, then read every row.
fn read(shared: &Shared) -> Result<(Duration, Instant, usize)> {
    shared.transcript.say("Sleep Tx2");
    shared.cancel.sleep(shared.config.reader_delay(), "delaying the reader")?;

    shared.transcript.say("Begin Tx2");
    let started = Instant::now();
    let mut conn = shared.database.connect()?;
    let rows = in_transaction(conn.as_mut(), |c| {
        c.select_rows(&shared.config.table, None, ReadHint::Committed)
    })?;
    let finished = Instant::now();
    shared.transcript.say("End Tx2");
    Ok((finished - started, finished, rows.len()))
}
