//! Config struct definition.

use super::types::*;
use serde::{Deserialize, Serialize};

/// Configuration for lockscope.
///
/// This struct represents the contents of `lockscope.yaml`.
/// Unknown fields in the YAML are ignored for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // =========================================================================
    // Engine settings
    // =========================================================================
    /// Lock manager behavior of the engine under test.
    pub engine: EngineConfig,

    /// Lock-inspection budget.
    pub observer: ObserverConfig,

    // =========================================================================
    // Experiment settings
    // =========================================================================
    /// Escalation threshold search.
    pub threshold: ThresholdConfig,

    /// Three-worker lock visibility harness.
    pub harness: HarnessConfig,

    /// Reader-behind-writer wait measurement.
    pub tx_wait: TxWaitConfig,
}
