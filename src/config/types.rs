//! Configuration sections and defaults for lockscope.
//!
//! Every section is `#[serde(default)]`, so a partial YAML file only needs
//! the values it overrides. Durations are stored as milliseconds.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How the engine treats row locks once a statement escalates to a table lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EscalationMode {
    /// The table lock replaces the row locks; none remain visible (older engines).
    #[default]
    Full,
    /// Row locks taken before escalation stay visible beside the table lock (newer engines).
    Residual,
}

/// Lock manager settings of the simulated engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Row locks a single statement may take before escalating.
    pub escalation_threshold: usize,

    /// What happens to row locks when escalation succeeds.
    pub escalation: EscalationMode,

    /// Rows stored per data page (drives RID and PAGE lock resources).
    pub rows_per_page: u32,

    /// How long a blocked statement waits for a conflicting lock.
    pub lock_wait_timeout_ms: u64,

    /// Serve read-committed reads from the last committed row version.
    pub read_committed_snapshot: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escalation_threshold: default_escalation_threshold(),
            escalation: EscalationMode::default(),
            rows_per_page: default_rows_per_page(),
            lock_wait_timeout_ms: default_lock_wait_timeout_ms(),
            read_committed_snapshot: false,
        }
    }
}

impl EngineConfig {
    pub fn lock_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_wait_timeout_ms)
    }
}

/// Lock observer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObserverConfig {
    /// Budget for one lock-inspection query.
    pub probe_timeout_ms: u64,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
        }
    }
}

impl ObserverConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}

/// Settings of the escalation threshold search.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// Rows seeded before the search; also the upper end of the search window.
    pub row_count: usize,

    /// Worker threads available to the lock observer.
    pub pool_size: usize,

    /// Heap table probed by the search.
    pub table: String,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            row_count: default_threshold_row_count(),
            pool_size: default_threshold_pool_size(),
            table: default_heap_table(),
        }
    }
}

/// Settings of the concurrency harness.
///
/// The dwell and settle durations only need to be long enough for the engine
/// to settle; they carry no semantic contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Rows seeded before each run.
    pub row_count: usize,

    /// Worker threads shared by the three workers and the lock observer.
    pub pool_size: usize,

    /// Budget for mid-experiment latch waits.
    pub barrier_timeout_ms: u64,

    /// Budget for the final "all done" latch.
    pub completion_timeout_ms: u64,

    /// How long the first worker keeps its transaction open.
    pub first_dwell_ms: u64,

    /// Pause before the global lock dump, so the second update can take its locks.
    pub dump_settle_ms: u64,

    /// Pause after the second worker commits.
    pub second_dwell_ms: u64,

    /// Table without a primary key (RID locks).
    pub heap_table: String,

    /// Table with a clustered primary key (KEY locks).
    pub keyed_table: String,

    /// Name of the clustered primary key index of `keyed_table`.
    pub keyed_index: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            row_count: default_harness_row_count(),
            pool_size: default_harness_pool_size(),
            barrier_timeout_ms: default_barrier_timeout_ms(),
            completion_timeout_ms: default_completion_timeout_ms(),
            first_dwell_ms: default_dwell_ms(),
            dump_settle_ms: default_dump_settle_ms(),
            second_dwell_ms: default_dwell_ms(),
            heap_table: default_heap_table(),
            keyed_table: default_keyed_table(),
            keyed_index: default_keyed_index(),
        }
    }
}

impl HarnessConfig {
    pub fn barrier_timeout(&self) -> Duration {
        Duration::from_millis(self.barrier_timeout_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }

    pub fn first_dwell(&self) -> Duration {
        Duration::from_millis(self.first_dwell_ms)
    }

    pub fn dump_settle(&self) -> Duration {
        Duration::from_millis(self.dump_settle_ms)
    }

    pub fn second_dwell(&self) -> Duration {
        Duration::from_millis(self.second_dwell_ms)
    }

    /// Longest a started worker can still take: one latch wait plus every dwell.
    pub fn worker_budget(&self) -> Duration {
        self.barrier_timeout() + self.first_dwell() + self.dump_settle() + self.second_dwell()
    }
}

/// Settings of the transaction-wait experiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TxWaitConfig {
    /// Worker threads for the writer and the reader.
    pub pool_size: usize,

    /// How long the writer keeps its update uncommitted.
    pub writer_hold_ms: u64,

    /// How long the reader waits before starting its read.
    pub reader_delay_ms: u64,

    /// Budget for both transactions to finish.
    pub completion_timeout_ms: u64,

    /// Table written by Tx1 and read by Tx2.
    pub table: String,

    /// Second table created alongside, never touched by the transactions.
    pub companion_table: String,
}

impl Default for TxWaitConfig {
    fn default() -> Self {
        Self {
            pool_size: default_threshold_pool_size(),
            writer_hold_ms: 15_000,
            reader_delay_ms: 5_000,
            completion_timeout_ms: default_completion_timeout_ms(),
            table: "TestTable".to_string(),
            companion_table: "TestTable2".to_string(),
        }
    }
}

impl TxWaitConfig {
    pub fn writer_hold(&self) -> Duration {
        Duration::from_millis(self.writer_hold_ms)
    }

    pub fn reader_delay(&self) -> Duration {
        Duration::from_millis(self.reader_delay_ms)
    }

    pub fn completion_timeout(&self) -> Duration {
        Duration::from_millis(self.completion_timeout_ms)
    }
}

// Default value functions for serde
pub(crate) fn default_escalation_threshold() -> usize {
    5_000
}
pub(crate) fn default_rows_per_page() -> u32 {
    100
}
pub(crate) fn default_lock_wait_timeout_ms() -> u64 {
    30_000
}
pub(crate) fn default_probe_timeout_ms() -> u64 {
    5_000
}
pub(crate) fn default_threshold_row_count() -> usize {
    10_000
}
pub(crate) fn default_threshold_pool_size() -> usize {
    5
}
pub(crate) fn default_harness_row_count() -> usize {
    10
}
pub(crate) fn default_harness_pool_size() -> usize {
    20
}
pub(crate) fn default_barrier_timeout_ms() -> u64 {
    60_000
}
pub(crate) fn default_completion_timeout_ms() -> u64 {
    20_000
}
pub(crate) fn default_dwell_ms() -> u64 {
    10_000
}
pub(crate) fn default_dump_settle_ms() -> u64 {
    2_000
}
pub(crate) fn default_heap_table() -> String {
    "foo.FOO_LOCK_TABLE_NO_PK".to_string()
}
pub(crate) fn default_keyed_table() -> String {
    "foo.FOO_LOCK_TABLE_PK".to_string()
}
pub(crate) fn default_keyed_index() -> String {
    "PK_FOO_LOCK_TABLE_PK".to_string()
}
