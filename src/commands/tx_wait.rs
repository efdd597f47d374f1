//! Implementation of the `lockscope tx-wait` and `tx-wait-mvcc` commands.

use super::Engine;
use crate::config::Config;
use crate::error::Result;
use crate::transcript::Transcript;
use crate::txwait::{TxWaitExperiment, TxWaitReport};

/// How the reader's committed read is served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxWaitMode {
    /// Locking read committed: the reader queues behind the writer.
    Locking,
    /// Read-committed snapshot: the reader sees the last committed version.
    Snapshot,
}

pub fn cmd_tx_wait(
    config: &Config,
    mode: TxWaitMode,
    transcript: &Transcript,
) -> Result<TxWaitReport> {
    let mut engine_config = config.engine.clone();
    engine_config.read_committed_snapshot = mode == TxWaitMode::Snapshot;
    let engine = Engine::start(engine_config);

    tracing::info!(?mode, "measuring reader wait");
    TxWaitExperiment::new(
        engine.database,
        engine.provisioner,
        config.tx_wait.clone(),
        transcript.clone(),
    )
    .run()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fast_config;

    #[test]
    fn test_snapshot_mode_overrides_engine_setting() {
        let mut config = fast_config();
        config.engine.read_committed_snapshot = true;

        let locking = cmd_tx_wait(&config, TxWaitMode::Locking, &Transcript::captured()).unwrap();
        assert!(locking.reader_finished_after_writer);

        config.engine.read_committed_snapshot = false;
        let snapshot = cmd_tx_wait(&config, TxWaitMode::Snapshot, &Transcript::captured()).unwrap();
        assert!(!snapshot.reader_finished_after_writer);
    }
}
