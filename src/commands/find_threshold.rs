//! Implementation of the `lockscope find-threshold` command.

use super::Engine;
use crate::config::Config;
use crate::db::{RowId, TableLayout};
use crate::error::Result;
use crate::observer::PooledLockObserver;
use crate::pool::WorkerPool;
use crate::provision::DatasetProvisioner;
use crate::threshold::{ThresholdFinder, UpdateProbe};
use crate::transcript::Transcript;
use std::sync::Arc;

/// Seed the threshold table and bisect for the escalation threshold.
pub fn cmd_find_threshold(config: &Config, transcript: &Transcript) -> Result<RowId> {
    let engine = Engine::start(config.engine.clone());
    let table = &config.threshold.table;

    engine.provisioner.recreate(table, TableLayout::Heap)?;
    let seeded = engine.provisioner.seed(table, config.threshold.row_count)?;
    transcript.say(format!("count={}", seeded));

    let pool = Arc::new(WorkerPool::new("observer", config.threshold.pool_size)?);
    let observer = Arc::new(PooledLockObserver::new(
        Arc::clone(&engine.database),
        pool,
        config.observer.probe_timeout(),
    ));
    let probe = UpdateProbe::new(engine.database.connect()?, observer, table);

    let threshold =
        ThresholdFinder::new(probe, transcript.clone()).find_escalation_threshold(seeded as RowId)?;
    transcript.say(format!("lock escalation threshold = {}", threshold));
    Ok(threshold)
}
