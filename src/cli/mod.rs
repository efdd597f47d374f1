//! CLI argument parsing for lockscope.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Lockscope: measure how a database engine escalates row locks and what
/// concurrent sessions see of each other's locks.
///
/// Each mode runs one experiment and prints its observations to stdout,
/// one line per event, tagged with the thread that made it.
#[derive(Parser, Debug)]
#[command(name = "lockscope")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file (default: $LOCKSCOPE_CONFIG, then ./lockscope.yaml).
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Show debug diagnostics on stderr.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show errors on stderr.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored diagnostics.
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available modes.
#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Find the row count at which an update escalates to a table lock.
    ///
    /// Seeds the threshold table and bisects over the number of updated
    /// rows, rolling back after every probe.
    #[command(alias = "find-lock-escalation-threshold")]
    FindThreshold,

    /// Show the row locks of two concurrent updates on disjoint id ranges.
    ///
    /// Runs against a heap table (RID locks) and then against a table with
    /// a clustered primary key (KEY locks).
    #[command(alias = "row-lock-with-and-without-update-on-key")]
    RowLocks,

    /// Measure how long a reader waits behind an uncommitted writer.
    TxWait,

    /// Like `tx-wait`, with read-committed snapshot enabled on the engine.
    TxWaitMvcc,

    /// Print the effective configuration as YAML.
    ShowConfig,
}

impl Cli {
    /// Parse command line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
