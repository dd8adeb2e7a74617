use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifetime policy for cached engine instances.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Instances untouched for this long are destroyed by the sweep.
    pub idle_ttl_ms: u64,
    /// Period of the background sweeper.
    pub sweep_interval_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_ttl_ms: 30 * 60 * 1000,
            sweep_interval_ms: 5 * 60 * 1000,
        }
    }
}

impl EngineConfig {
    pub fn idle_ttl(&self) -> Duration {
        Duration::from_millis(self.idle_ttl_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"idle_ttl_ms":1000}"#).unwrap();
        assert_eq!(cfg.idle_ttl_ms, 1000);
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(300));
    }
}
