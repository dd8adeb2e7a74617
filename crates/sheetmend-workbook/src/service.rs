//! `SheetService`: the entry point collaborators call. It owns the
//! validator, engine cache, revision log, guard and audit loop for every
//! workbook in the process.

use crate::applicator::{ApplyResult, Applicator, diff_changes, refresh_computed};
use crate::audit::{AuditLoop, AuditReport, AuditTarget};
use crate::collaborators::{
    BlankWorkbookSource, CorrectionCallback, MemoryWorkbookCache, SheetSource, WorkbookCache,
};
use crate::config::SheetMendConfig;
use crate::error::{Result, SheetMendError, ValidationIssue};
use crate::guard::ConcurrencyGuard;
use crate::revisions::{Revision, RevisionManager, RevisionStore, RevisionSummary};
use crate::validator::{ValidationReport, Validator};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use sheetmend_common::{
    Action, ActionBatch, BatchSource, Sheet, TargetRevision, WorkbookTier, resolve_sheet,
};
use sheetmend_engine::{EngineHandle, EngineManager, SweeperHandle};
use std::sync::Arc;
use tracing::{debug, info, info_span, warn};

/// Result of `run_automated_edit`: the applied batch plus one audit per
/// touched sheet that holds formulas.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomatedEditOutcome {
    pub apply: ApplyResult,
    pub audits: Vec<AuditReport>,
}

pub struct SheetService {
    config: SheetMendConfig,
    validator: Validator,
    engines: Arc<EngineManager>,
    revisions: RevisionManager,
    guard: ConcurrencyGuard,
    audit: AuditLoop,
    cache: Arc<dyn WorkbookCache>,
    source: Arc<dyn SheetSource>,
    tiers: RwLock<FxHashMap<String, WorkbookTier>>,
}

impl Default for SheetService {
    fn default() -> Self {
        Self::new(SheetMendConfig::default())
    }
}

impl SheetService {
    /// In-memory cache and revision log; unknown workbooks start blank.
    pub fn new(config: SheetMendConfig) -> Self {
        Self {
            config,
            validator: Validator::new(config.validator),
            engines: Arc::new(EngineManager::new(config.engine)),
            revisions: RevisionManager::new(
                config.revisions,
                Arc::new(crate::revisions::MemoryRevisionStore::new()),
            ),
            guard: ConcurrencyGuard::new(config.guard),
            audit: AuditLoop::new(config.audit),
            cache: Arc::new(MemoryWorkbookCache::new()),
            source: Arc::new(BlankWorkbookSource),
            tiers: RwLock::new(FxHashMap::default()),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn SheetSource>) -> Self {
        self.source = source;
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn WorkbookCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_revision_store(mut self, store: Arc<dyn RevisionStore>) -> Self {
        self.revisions = RevisionManager::new(self.config.revisions, store);
        self
    }

    pub fn with_engine_manager(mut self, engines: Arc<EngineManager>) -> Self {
        self.engines = engines;
        self
    }

    /// Enables the escalation phase of the audit loop.
    pub fn with_callback(mut self, callback: Arc<dyn CorrectionCallback>) -> Self {
        self.audit = self.audit.with_callback(callback);
        self
    }

    pub fn config(&self) -> &SheetMendConfig {
        &self.config
    }

    pub fn engines(&self) -> &Arc<EngineManager> {
        &self.engines
    }

    pub fn revisions(&self) -> &RevisionManager {
        &self.revisions
    }

    pub fn guard(&self) -> &ConcurrencyGuard {
        &self.guard
    }

    pub fn spawn_sweeper(&self) -> SweeperHandle {
        self.engines.spawn_sweeper()
    }

    pub fn workbook_tier(&self, workbook_id: &str) -> WorkbookTier {
        self.tiers
            .read()
            .get(workbook_id)
            .copied()
            .unwrap_or_default()
    }

    /// Current model for the workbook, loaded from the sheet source on a
    /// cache miss.
    pub fn sheets(&self, workbook_id: &str) -> Result<Vec<Sheet>> {
        if let Some(sheets) = self.cache.get_sheets(workbook_id) {
            return Ok(sheets);
        }
        let workbook = self
            .source
            .load(workbook_id)
            .ok_or_else(|| SheetMendError::not_found(format!("workbook `{workbook_id}`")))?;
        debug!(workbook = workbook_id, sheets = workbook.sheets.len(), "workbook loaded from source");
        self.tiers.write().insert(workbook_id.to_string(), workbook.tier);
        self.cache.update_cached_sheets(workbook_id, workbook.sheets.clone());
        Ok(workbook.sheets)
    }

    /// Validate without applying.
    pub fn validate(&self, batch: &ActionBatch) -> Result<ValidationReport> {
        let sheets = self.sheets(&batch.workbook_id)?;
        let mut actions = batch.actions.clone();
        Ok(self
            .validator
            .validate(&mut actions, &sheets, self.workbook_tier(&batch.workbook_id)))
    }

    fn check_target_revision(&self, batch: &ActionBatch) -> Result<()> {
        if batch.source != BatchSource::Ai {
            return Ok(());
        }
        let TargetRevision::Id(requested) = &batch.target_revision else {
            return Ok(());
        };
        match self.revisions.get_latest(&batch.workbook_id) {
            Some(latest) if latest.id != *requested => Err(SheetMendError::RevisionConflict {
                current: latest.id,
                requested: requested.clone(),
            }),
            // No revision yet is a first edit.
            _ => Ok(()),
        }
    }

    /// Validate and apply one batch, recalculate, persist the model and
    /// append a revision. Rejected batches leave no trace.
    pub fn apply_batch(&self, mut batch: ActionBatch) -> Result<ApplyResult> {
        let span = info_span!(
            "apply_batch",
            workbook = %batch.workbook_id,
            source = %batch.source,
            actions = batch.actions.len()
        );
        let _enter = span.enter();
        let workbook_id = batch.workbook_id.clone();
        let tier = self.workbook_tier(&workbook_id);

        let sheets = self.sheets(&workbook_id)?;
        let report = self.validator.validate(&mut batch.actions, &sheets, tier);
        if !report.valid {
            debug!(errors = report.errors.len(), "batch rejected by validator");
            return Err(SheetMendError::Validation {
                errors: report.errors,
            });
        }
        let mut warnings = report.warnings;
        loop {
            let handle = self.engines.get_or_create(&workbook_id, &sheets);
            if let Some(applied) =
                self.apply_locked(&handle, &mut batch, &sheets, tier, &mut warnings)?
            {
                return Ok(applied);
            }
            debug!("engine instance retired while waiting for it; retrying");
        }
    }

    /// The part of `apply_batch` that runs under the engine lock. `Ok(None)`
    /// when the instance was destroyed before the lock was obtained.
    fn apply_locked(
        &self,
        handle: &EngineHandle,
        batch: &mut ActionBatch,
        validated: &[Sheet],
        tier: WorkbookTier,
        warnings: &mut Vec<ValidationIssue>,
    ) -> Result<Option<ApplyResult>> {
        let Some(mut engine) = handle.lock_live() else {
            return Ok(None);
        };
        let workbook_id = batch.workbook_id.clone();

        // Another batch may have committed while we waited on the engine.
        let before = self.sheets(&workbook_id)?;
        if before != validated {
            let report = self.validator.validate(&mut batch.actions, &before, tier);
            if !report.valid {
                return Err(SheetMendError::Validation {
                    errors: report.errors,
                });
            }
            *warnings = report.warnings;
            // The instance may have been built from the older model.
            for sheet in &before {
                engine.rebuild_sheet(sheet);
            }
        }
        self.check_target_revision(batch)?;

        let mut working = before.clone();
        engine.suspend_evaluation();
        let dispatched = Applicator::new(&mut working, &mut engine).apply_all(&batch.actions);
        engine.resume_evaluation();
        if let Err(err) = dispatched {
            // The projection may be half-updated; rebuild it on next use.
            drop(engine);
            self.engines.destroy(&workbook_id);
            return Err(err);
        }

        let resync = engine.resync_formulas(&working);
        let failures = engine.take_sync_failures();
        for failure in &failures {
            engine.clear(&failure.sheet, failure.addr);
        }
        if !resync.converged() {
            warn!(unresolved = failures.len(), "formulas the engine could not accept after resync");
        }
        engine.take_sync_failures();
        if let Err(err) = engine.recalculate() {
            warn!(error = %err, "recalculation failed");
        }
        refresh_computed(&mut working, &engine, &failures);
        let changed_cells = diff_changes(&before, &working);

        self.cache.update_cached_sheets(&workbook_id, working.clone());
        let revision = self.revisions.create_revision(batch, &working);
        drop(engine);

        info!(
            revision = %revision.id,
            changed = changed_cells.len(),
            warnings = warnings.len(),
            "batch applied"
        );
        Ok(Some(ApplyResult {
            revision_id: revision.id,
            version: revision.version,
            changed_cells,
            warnings: std::mem::take(warnings),
        }))
    }

    /// Run the audit loop on one sheet after an automated edit. Corrections
    /// are committed as system revisions. Never fails.
    pub fn audit_sheet(
        &self,
        workbook_id: &str,
        sheet_id: &str,
        original_actions: &[Action],
        latest_revision_id: Option<&str>,
    ) -> AuditReport {
        let target = CorrectionTarget {
            service: self,
            basis: latest_revision_id,
        };
        self.audit
            .run(&target, workbook_id, sheet_id, original_actions)
    }

    /// Guarded apply-then-audit for automated batches. CREATE_SHEET actions
    /// run first so later actions may target the new sheets.
    pub fn run_automated_edit(&self, mut batch: ActionBatch) -> Result<AutomatedEditOutcome> {
        let workbook_id = batch.workbook_id.clone();
        let mut lock = self.guard.acquire(&workbook_id);

        let (creates, rest): (Vec<Action>, Vec<Action>) = std::mem::take(&mut batch.actions)
            .into_iter()
            .partition(|a| matches!(a, Action::CreateSheet { .. }));
        batch.actions = creates.into_iter().chain(rest).collect();
        let original = batch.actions.clone();

        let apply = self.apply_batch(batch)?;

        let sheets = self.sheets(&workbook_id)?;
        let mut audited: Vec<String> = Vec::new();
        for action in &original {
            let target = match action {
                Action::CreateSheet { name, .. } => Some(name.as_str()),
                other => other.sheet_target(),
            };
            let Some(sheet) = target.and_then(|t| resolve_sheet(&sheets, t)) else {
                continue;
            };
            if sheet.has_formulas() && !audited.contains(&sheet.id) {
                audited.push(sheet.id.clone());
            }
        }
        let audits = audited
            .iter()
            .map(|sheet_id| {
                self.audit_sheet(&workbook_id, sheet_id, &original, Some(&apply.revision_id))
            })
            .collect();

        lock.release();
        Ok(AutomatedEditOutcome { apply, audits })
    }

    /// Drop every trace of a workbook: cache entry, engine instance and
    /// revision log.
    pub fn delete_workbook(&self, workbook_id: &str) {
        self.cache.evict_cache(workbook_id);
        let engine = self.engines.destroy(workbook_id);
        let revisions = self.revisions.delete_workbook(workbook_id);
        self.tiers.write().remove(workbook_id);
        info!(workbook = workbook_id, engine, revisions, "workbook deleted");
    }

    pub fn get_latest_revision(&self, workbook_id: &str) -> Option<Revision> {
        self.revisions.get_latest(workbook_id)
    }

    pub fn get_revision_by_version(&self, workbook_id: &str, version: u64) -> Option<Revision> {
        self.revisions.get_by_version(workbook_id, version)
    }

    pub fn get_revision_by_id(&self, workbook_id: &str, id: &str) -> Option<Revision> {
        self.revisions.get_by_id(workbook_id, id)
    }

    pub fn list_revisions(&self, workbook_id: &str) -> Vec<RevisionSummary> {
        self.revisions.list_all(workbook_id)
    }
}

struct CorrectionTarget<'a> {
    service: &'a SheetService,
    basis: Option<&'a str>,
}

impl AuditTarget for CorrectionTarget<'_> {
    fn current_sheets(&self, workbook_id: &str) -> Result<Vec<Sheet>> {
        self.service.sheets(workbook_id)
    }

    fn workbook_tier(&self, workbook_id: &str) -> WorkbookTier {
        self.service.workbook_tier(workbook_id)
    }

    fn apply_corrections(&self, workbook_id: &str, actions: Vec<Action>) -> Result<ApplyResult> {
        let description = match self.basis {
            Some(revision) => format!("audit corrections after {revision}"),
            None => "audit corrections".to_string(),
        };
        let batch = ActionBatch::new(workbook_id, BatchSource::System, actions)
            .with_description(description);
        self.service.apply_batch(batch)
    }
}
