use serde::Deserialize;

use crate::types::VmKind;

fn default_dag_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

fn default_lru_max_capacity() -> usize {
    256 * 1024 * 1024
}

fn default_lru_poll_interval_ms() -> u64 {
    200
}

/// Executor tuning knobs. Loadable from JSON; every field has a default
/// so an empty object is a valid config.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub vm_kind: VmKind,
    #[serde(default = "default_dag_workers")]
    pub dag_workers: usize,
    #[serde(default = "default_lru_max_capacity")]
    pub lru_max_capacity: usize,
    #[serde(default = "default_lru_poll_interval_ms")]
    pub lru_poll_interval_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            vm_kind: VmKind::default(),
            dag_workers: default_dag_workers(),
            lru_max_capacity: default_lru_max_capacity(),
            lru_poll_interval_ms: default_lru_poll_interval_ms(),
        }
    }
}

impl ExecutorConfig {
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
