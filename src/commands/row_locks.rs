//! Implementation of the `lockscope row-locks` command.

use super::Engine;
use crate::config::Config;
use crate::db::TableLayout;
use crate::error::Result;
use crate::harness::{ConcurrencyHarness, ExperimentReport};
use crate::provision::DatasetProvisioner;
use crate::transcript::Transcript;
use std::sync::Arc;

const RULE: &str = "=====================================================================";

/// Run the harness against the heap table, then against the keyed table.
pub fn cmd_row_locks(config: &Config, transcript: &Transcript) -> Result<[ExperimentReport; 2]> {
    let engine = Engine::start(config.engine.clone());
    let harness_config = &config.harness;

    engine
        .provisioner
        .recreate(&harness_config.heap_table, TableLayout::Heap)?;
    engine.provisioner.recreate(
        &harness_config.keyed_table,
        TableLayout::Clustered {
            index_name: harness_config.keyed_index.clone(),
        },
    )?;

    let harness = ConcurrencyHarness::new(
        Arc::clone(&engine.database),
        engine.provisioner.clone(),
        harness_config.clone(),
        config.observer.probe_timeout(),
        transcript.clone(),
    );

    let heap = harness.run_experiment(&harness_config.heap_table, None)?;
    transcript.raw(RULE);
    let keyed = harness.run_experiment(
        &harness_config.keyed_table,
        Some(harness_config.keyed_index.as_str()),
    )?;
    Ok([heap, keyed])
}
