//! Append-only revision log with optimistic-concurrency lookups.

use crate::config::RevisionConfig;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use sheetmend_common::{Action, ActionBatch, BatchSource, Sheet};
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Revision {
    pub id: String,
    pub workbook_id: String,
    pub version: u64,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot: Option<Vec<Sheet>>,
    pub source: BatchSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Revision {
    pub fn summary(&self) -> RevisionSummary {
        RevisionSummary {
            id: self.id.clone(),
            version: self.version,
            source: self.source,
            description: self.description.clone(),
            action_count: self.actions.len(),
            created_at: self.created_at,
            has_snapshot: self.snapshot.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionSummary {
    pub id: String,
    pub version: u64,
    pub source: BatchSource,
    pub description: Option<String>,
    pub action_count: usize,
    pub created_at: DateTime<Utc>,
    pub has_snapshot: bool,
}

/// Identity of a freshly committed revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRef {
    pub id: String,
    pub version: u64,
}

pub fn revision_id(workbook_id: &str, version: u64) -> String {
    format!("rev-{workbook_id}-{version}")
}

/// Storage behind the revision manager. `append_next` must pick the version
/// and store the record atomically so concurrent commits never share one.
pub trait RevisionStore: Send + Sync {
    fn append_next(&self, workbook_id: &str, build: &mut dyn FnMut(u64) -> Revision) -> Revision;

    fn latest(&self, workbook_id: &str) -> Option<Revision>;

    fn by_version(&self, workbook_id: &str, version: u64) -> Option<Revision>;

    fn by_id(&self, workbook_id: &str, id: &str) -> Option<Revision>;

    /// All revisions, oldest first.
    fn list(&self, workbook_id: &str) -> Vec<Revision>;

    fn delete_workbook(&self, workbook_id: &str) -> usize;
}

#[derive(Default)]
pub struct MemoryRevisionStore {
    logs: RwLock<FxHashMap<String, Vec<Revision>>>,
}

impl MemoryRevisionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RevisionStore for MemoryRevisionStore {
    fn append_next(&self, workbook_id: &str, build: &mut dyn FnMut(u64) -> Revision) -> Revision {
        let mut logs = self.logs.write();
        let log = logs.entry(workbook_id.to_string()).or_default();
        let version = log.last().map(|r| r.version + 1).unwrap_or(0);
        let revision = build(version);
        log.push(revision.clone());
        revision
    }

    fn latest(&self, workbook_id: &str) -> Option<Revision> {
        self.logs.read().get(workbook_id)?.last().cloned()
    }

    fn by_version(&self, workbook_id: &str, version: u64) -> Option<Revision> {
        let logs = self.logs.read();
        let log = logs.get(workbook_id)?;
        // Versions are dense from zero.
        log.get(usize::try_from(version).ok()?)
            .filter(|r| r.version == version)
            .cloned()
    }

    fn by_id(&self, workbook_id: &str, id: &str) -> Option<Revision> {
        self.logs
            .read()
            .get(workbook_id)?
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn list(&self, workbook_id: &str) -> Vec<Revision> {
        self.logs
            .read()
            .get(workbook_id)
            .cloned()
            .unwrap_or_default()
    }

    fn delete_workbook(&self, workbook_id: &str) -> usize {
        self.logs
            .write()
            .remove(workbook_id)
            .map(|log| log.len())
            .unwrap_or(0)
    }
}

#[derive(Clone)]
pub struct RevisionManager {
    config: RevisionConfig,
    store: Arc<dyn RevisionStore>,
}

impl Default for RevisionManager {
    fn default() -> Self {
        Self::new(RevisionConfig::default(), Arc::new(MemoryRevisionStore::new()))
    }
}

impl RevisionManager {
    pub fn new(config: RevisionConfig, store: Arc<dyn RevisionStore>) -> Self {
        Self { config, store }
    }

    /// Record one applied batch. The snapshot is kept on version 0 and at
    /// the configured interval.
    pub fn create_revision(&self, batch: &ActionBatch, sheets: &[Sheet]) -> RevisionRef {
        let config = self.config;
        let revision = self.store.append_next(&batch.workbook_id, &mut |version| Revision {
            id: revision_id(&batch.workbook_id, version),
            workbook_id: batch.workbook_id.clone(),
            version,
            actions: batch.actions.clone(),
            snapshot: config.snapshot_due(version).then(|| sheets.to_vec()),
            source: batch.source,
            description: batch.description.clone(),
            created_at: Utc::now(),
        });
        info!(
            workbook = %revision.workbook_id,
            revision = %revision.id,
            version = revision.version,
            actions = revision.actions.len(),
            "revision committed"
        );
        RevisionRef {
            id: revision.id,
            version: revision.version,
        }
    }

    pub fn get_latest(&self, workbook_id: &str) -> Option<Revision> {
        self.store.latest(workbook_id)
    }

    pub fn get_by_version(&self, workbook_id: &str, version: u64) -> Option<Revision> {
        self.store.by_version(workbook_id, version)
    }

    pub fn get_by_id(&self, workbook_id: &str, id: &str) -> Option<Revision> {
        self.store.by_id(workbook_id, id)
    }

    pub fn list_all(&self, workbook_id: &str) -> Vec<RevisionSummary> {
        self.store
            .list(workbook_id)
            .iter()
            .map(Revision::summary)
            .collect()
    }

    /// Most recent snapshot at or before `version`, for external revert.
    pub fn snapshot_at_or_before(&self, workbook_id: &str, version: u64) -> Option<(u64, Vec<Sheet>)> {
        self.store
            .list(workbook_id)
            .into_iter()
            .rev()
            .filter(|r| r.version <= version)
            .find_map(|r| r.snapshot.map(|s| (r.version, s)))
    }

    pub fn delete_workbook(&self, workbook_id: &str) -> usize {
        self.store.delete_workbook(workbook_id)
    }
}
