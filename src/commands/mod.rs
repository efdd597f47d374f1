//! Command implementations for lockscope.
//!
//! This module provides the dispatcher that routes CLI modes to their
//! implementations. Every experiment runs against a fresh engine built from
//! the `engine` section of the configuration.

mod find_threshold;
mod row_locks;
mod show_config;
mod tx_wait;

use crate::cli::Command;
use crate::config::{Config, EngineConfig};
use crate::db::Database;
use crate::db::sim::SimDatabase;
use crate::error::Result;
use crate::provision::EngineProvisioner;
use crate::transcript::Transcript;
use std::sync::Arc;

pub use find_threshold::cmd_find_threshold;
pub use row_locks::cmd_row_locks;
pub use show_config::cmd_show_config;
pub use tx_wait::{TxWaitMode, cmd_tx_wait};

/// Dispatch a mode to its implementation, writing observations to stdout.
pub fn dispatch(command: Command, config: &Config) -> Result<()> {
    let transcript = Transcript::stdout();
    match command {
        Command::FindThreshold => cmd_find_threshold(config, &transcript).map(drop),
        Command::RowLocks => cmd_row_locks(config, &transcript).map(drop),
        Command::TxWait => cmd_tx_wait(config, TxWaitMode::Locking, &transcript).map(drop),
        Command::TxWaitMvcc => cmd_tx_wait(config, TxWaitMode::Snapshot, &transcript).map(drop),
        Command::ShowConfig => cmd_show_config(config),
    }
}

/// Engine and provisioner shared by one command run.
struct Engine {
    database: Arc<dyn Database>,
    provisioner: Arc<EngineProvisioner>,
}

impl Engine {
    fn start(config: EngineConfig) -> Self {
        tracing::debug!(?config, "starting engine");
        let database: Arc<dyn Database> = Arc::new(SimDatabase::new(config));
        let provisioner = Arc::new(EngineProvisioner::new(Arc::clone(&database)));
        Self {
            database,
            provisioner,
        }
    }
}
