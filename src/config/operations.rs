//! Config loading, resolution and validation.

use super::model::Config;
use crate::error::{LockscopeError, Result};
use std::path::{Path, PathBuf};

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "LOCKSCOPE_CONFIG";

/// Config file picked up from the working directory when nothing else is given.
pub const DEFAULT_CONFIG_FILE: &str = "lockscope.yaml";

impl Config {
    /// Load config from a YAML file.
    ///
    /// Unknown fields in the YAML are silently ignored for forward compatibility.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path).map_err(|e| {
            LockscopeError::Config(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Self::from_yaml(&content)
    }

    /// Resolve the effective configuration.
    ///
    /// Order: explicit `--config` path, then `LOCKSCOPE_CONFIG`, then
    /// `lockscope.yaml` in the working directory, then built-in defaults.
    /// An explicitly named file that does not exist is an error.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        if let Ok(path) = std::env::var(CONFIG_ENV)
            && !path.trim().is_empty()
        {
            return Self::load(PathBuf::from(path));
        }

        let local = PathBuf::from(DEFAULT_CONFIG_FILE);
        if local.is_file() {
            return Self::load(local);
        }

        Ok(Self::default())
    }

    /// Parse config from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        // An empty document deserializes to unit, not to a mapping.
        let config: Config = if yaml.trim().is_empty() {
            Config::default()
        } else {
            serde_yaml::from_str(yaml)
                .map_err(|e| LockscopeError::Config(format!("failed to parse config YAML: {}", e)))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Serialize config to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| {
            LockscopeError::Config(format!("failed to serialize config to YAML: {}", e))
        })
    }

    /// Validate config values and return error on invalid values.
    ///
    /// Validation rules:
    /// - counts, page sizes and every timeout must be positive
    /// - the harness needs at least 2 rows (its 60 % threshold must select a row)
    /// - the harness pool must fit its three workers plus one observer query
    /// - the transaction-wait pool must fit both transactions
    /// - table and index names must be non-empty
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("engine.escalation_threshold", self.engine.escalation_threshold as u64),
            ("engine.rows_per_page", u64::from(self.engine.rows_per_page)),
            ("engine.lock_wait_timeout_ms", self.engine.lock_wait_timeout_ms),
            ("observer.probe_timeout_ms", self.observer.probe_timeout_ms),
            ("threshold.row_count", self.threshold.row_count as u64),
            ("threshold.pool_size", self.threshold.pool_size as u64),
            ("harness.barrier_timeout_ms", self.harness.barrier_timeout_ms),
            ("harness.completion_timeout_ms", self.harness.completion_timeout_ms),
            ("tx_wait.completion_timeout_ms", self.tx_wait.completion_timeout_ms),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(LockscopeError::Config(format!(
                    "{} must be greater than 0",
                    name
                )));
            }
        }

        if self.harness.row_count < 2 {
            return Err(LockscopeError::Config(format!(
                "harness.row_count must be at least 2 (found {})",
                self.harness.row_count
            )));
        }

        if self.harness.pool_size < 4 {
            return Err(LockscopeError::Config(format!(
                "harness.pool_size must be at least 4 to run three workers and the lock observer (found {})",
                self.harness.pool_size
            )));
        }

        if self.tx_wait.pool_size < 2 {
            return Err(LockscopeError::Config(format!(
                "tx_wait.pool_size must be at least 2 (found {})",
                self.tx_wait.pool_size
            )));
        }

        let names = [
            ("threshold.table", &self.threshold.table),
            ("harness.heap_table", &self.harness.heap_table),
            ("harness.keyed_table", &self.harness.keyed_table),
            ("harness.keyed_index", &self.harness.keyed_index),
            ("tx_wait.table", &self.tx_wait.table),
            ("tx_wait.companion_table", &self.tx_wait.companion_table),
        ];
        for (name, value) in names {
            if value.trim().is_empty() {
                return Err(LockscopeError::Config(format!("{} must not be empty", name)));
            }
        }

        if self.harness.heap_table == self.harness.keyed_table {
            return Err(LockscopeError::Config(
                "harness.heap_table and harness.keyed_table must name different tables"
                    .to_string(),
            ));
        }

        Ok(())
    }
}
