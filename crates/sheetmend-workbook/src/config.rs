//! Tunables for the mutation pipeline, loadable from JSON.

use serde::{Deserialize, Serialize};
use sheetmend_common::WorkbookTier;
use std::time::Duration;

pub use sheetmend_engine::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Batches longer than this are rejected outright.
    pub max_batch_size: usize,
    /// Batches longer than this draw a soft warning.
    pub batch_warning_threshold: usize,
    /// Range actions above this many cells are flagged as slow.
    pub async_range_threshold: u64,
    /// FORMAT_CELLS materializes every cell of its range; larger ranges are
    /// rejected.
    pub max_range_cells: u64,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 500,
            batch_warning_threshold: 100,
            async_range_threshold: 10_000,
            max_range_cells: 1_000_000,
        }
    }
}

impl ValidatorConfig {
    pub fn max_batch_size_for(&self, tier: WorkbookTier) -> usize {
        match tier {
            WorkbookTier::Standard => self.max_batch_size,
            WorkbookTier::Large => (self.max_batch_size / 2).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardConfig {
    pub timeout_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 2 * 60 * 1000,
        }
    }
}

impl GuardConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub max_local_passes: usize,
    /// Findings beyond this are summarized by count in escalation prompts.
    pub max_findings_in_prompt: usize,
    /// Cells scanned when the touched set cannot be resolved.
    pub whole_sheet_scan_limit: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_local_passes: 3,
            max_findings_in_prompt: 25,
            whole_sheet_scan_limit: 20_000,
        }
    }
}

impl AuditConfig {
    pub fn scan_limit_for(&self, tier: WorkbookTier) -> usize {
        match tier {
            WorkbookTier::Standard => self.whole_sheet_scan_limit,
            WorkbookTier::Large => (self.whole_sheet_scan_limit / 4).max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RevisionConfig {
    /// Version 0 and every N-th version carry a full snapshot. Zero
    /// disables snapshots after the first.
    pub snapshot_interval: u64,
}

impl Default for RevisionConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: 10,
        }
    }
}

impl RevisionConfig {
    pub fn snapshot_due(&self, version: u64) -> bool {
        version == 0 || (self.snapshot_interval > 0 && version % self.snapshot_interval == 0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SheetMendConfig {
    pub validator: ValidatorConfig,
    pub engine: EngineConfig,
    pub guard: GuardConfig,
    pub audit: AuditConfig,
    pub revisions: RevisionConfig,
}

impl SheetMendConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_tier_scales_limits() {
        let cfg = SheetMendConfig::default();
        assert_eq!(cfg.validator.max_batch_size_for(WorkbookTier::Large), 250);
        assert_eq!(cfg.audit.scan_limit_for(WorkbookTier::Large), 5_000);
        assert_eq!(cfg.audit.scan_limit_for(WorkbookTier::Standard), 20_000);
    }

    #[test]
    fn json_overrides_merge_with_defaults() {
        let cfg = SheetMendConfig::from_json_str(
            r#"{"guard":{"timeout_ms":500},"revisions":{"snapshot_interval":3}}"#,
        )
        .unwrap();
        assert_eq!(cfg.guard.timeout(), Duration::from_millis(500));
        assert_eq!(cfg.validator, ValidatorConfig::default());
        assert!(cfg.revisions.snapshot_due(0));
        assert!(!cfg.revisions.snapshot_due(2));
        assert!(cfg.revisions.snapshot_due(6));
    }
}
