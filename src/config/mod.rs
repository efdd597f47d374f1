//! Configuration model for lockscope.
//!
//! This module defines the Config struct that represents `lockscope.yaml`.
//! It supports forward-compatible YAML parsing (unknown fields are ignored),
//! sensible defaults for every field, and validation of config values.

mod model;
mod operations;
pub mod types;

#[cfg(test)]
mod tests;

// Re-export public API
pub use model::Config;
pub use operations::{CONFIG_ENV, DEFAULT_CONFIG_FILE};
pub use types::{
    EngineConfig, EscalationMode, HarnessConfig, ObserverConfig, ThresholdConfig, TxWaitConfig,
};
