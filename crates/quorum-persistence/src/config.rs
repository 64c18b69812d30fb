//! Commit sink configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Durable target for commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitBackend {
    /// Append-only JSON lines, one file per UTC day.
    #[default]
    Jsonl,
    /// Structured log line only.
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitConfig {
    #[serde(default)]
    pub backend: CommitBackend,

    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Minimum move (bps) since the last commit before committing again.
    #[serde(default = "default_min_delta_bps")]
    pub min_delta_bps: Decimal,
}

fn default_data_dir() -> String {
    "data/commits".to_string()
}
fn default_interval_ms() -> u64 {
    5000
}
fn default_min_delta_bps() -> Decimal {
    Decimal::ONE
}

impl Default for CommitConfig {
    fn default() -> Self {
        Self {
            backend: CommitBackend::default(),
            data_dir: default_data_dir(),
            interval_ms: default_interval_ms(),
            min_delta_bps: default_min_delta_bps(),
        }
    }
}
