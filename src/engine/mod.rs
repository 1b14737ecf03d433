//! Progression engine: owns every write to creator milestone status.
//!
//! Each mutation runs under the creator's lock: read the current rows,
//! decide with the planners in [`progression`], write one change set, then
//! publish events. The store's compare-and-set on row versions backs the
//! lock up when another process touches the same creator.

pub mod events;
pub mod locks;
pub mod progression;
pub mod repair;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::catalog::{CatalogCache, GlobalOrder, Milestone, OrderedMilestone, Phase, validate_catalog};
use crate::config::PipelineConfig;
use crate::error::{CatalogError, DatabaseError, ProgressionError};
use crate::progress::{
    Creator, CreatorMilestone, MilestoneProgress, MilestoneStatus, Optionality, ProgressBreakdown,
    applicable_milestones, compute_breakdown,
};
use crate::store::{ActivityEntry, Database, ProgressChangeSet};

pub use events::{EventBus, ProgressEvent};
pub use locks::CreatorLocks;
pub use progression::{RepairDecision, StatusMap};
pub use repair::{RepairFailure, RepairOutcome, RepairReport, RepairStatus, spawn_repair_ticker};

/// Actor recorded for completions the engine makes on its own.
pub const SYSTEM_ACTOR: &str = "system";

/// The milestone a completion unlocked, for notification callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnlockedMilestone {
    pub milestone_id: String,
    pub title: String,
    pub phase_id: String,
    pub phase_name: String,
    pub requires_team_action: bool,
}

impl From<&OrderedMilestone> for UnlockedMilestone {
    fn from(entry: &OrderedMilestone) -> Self {
        Self {
            milestone_id: entry.milestone.id.clone(),
            title: entry.milestone.title.clone(),
            phase_id: entry.milestone.phase_id.clone(),
            phase_name: entry.phase_name.clone(),
            requires_team_action: entry.milestone.requires_team_action,
        }
    }
}

/// Result of `complete_milestone`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionOutcome {
    pub milestone_id: String,
    /// `None` when the creator reached the end of their applicable sequence.
    pub next_milestone: Option<UnlockedMilestone>,
}

/// The catalog as clients see it: phases plus milestones in global order.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogView {
    pub version: i64,
    pub phases: Vec<Phase>,
    pub milestones: Vec<Milestone>,
}

/// A creator's rows plus the catalog order they were read against.
struct CreatorState {
    creator: Creator,
    order: Arc<GlobalOrder>,
    rows: Vec<CreatorMilestone>,
}

impl CreatorState {
    fn statuses(&self) -> StatusMap<'_> {
        self.rows
            .iter()
            .map(|r| (r.milestone_id.as_str(), r.status))
            .collect()
    }

    fn row(&self, milestone_id: &str) -> Option<&CreatorMilestone> {
        self.rows.iter().find(|r| r.milestone_id == milestone_id)
    }

    /// The catalog entry and the creator's row, or `UnknownMilestone`.
    fn target(
        &self,
        milestone_id: &str,
    ) -> Result<(&OrderedMilestone, &CreatorMilestone), ProgressionError> {
        match (self.order.get(milestone_id), self.row(milestone_id)) {
            (Some(entry), Some(row)) => Ok((entry, row)),
            _ => Err(ProgressionError::UnknownMilestone {
                creator_id: self.creator.id.clone(),
                milestone_id: milestone_id.to_string(),
            }),
        }
    }
}

fn invalid(row: &CreatorMilestone, action: &str) -> ProgressionError {
    ProgressionError::InvalidTransition {
        milestone_id: row.milestone_id.clone(),
        status: row.status.to_string(),
        action: action.to_string(),
    }
}

/// Store errors carry no creator context; attach it.
fn with_creator(creator_id: &str, err: DatabaseError) -> ProgressionError {
    match ProgressionError::from(err) {
        ProgressionError::ConcurrentModification { reason, .. } => {
            ProgressionError::ConcurrentModification {
                creator_id: creator_id.to_string(),
                reason,
            }
        }
        other => other,
    }
}

/// Copy of `row` moved to `status`, stamped now. Keeps the read version so
/// the store can compare-and-set.
fn transitioned(row: &CreatorMilestone, status: MilestoneStatus) -> CreatorMilestone {
    let mut next = row.clone();
    next.status = status;
    next.updated_at = Utc::now();
    next
}

pub struct ProgressionEngine {
    db: Arc<dyn Database>,
    catalog: CatalogCache,
    locks: CreatorLocks,
    /// Serializes catalog validation with the write it guards.
    catalog_gate: tokio::sync::Mutex<()>,
    events: EventBus,
    lock_timeout: Duration,
    repair_concurrency: usize,
}

impl ProgressionEngine {
    pub fn new(db: Arc<dyn Database>) -> Self {
        let defaults = PipelineConfig::default();
        Self {
            db,
            catalog: CatalogCache::new(),
            locks: CreatorLocks::new(),
            catalog_gate: tokio::sync::Mutex::new(()),
            events: EventBus::default(),
            lock_timeout: defaults.lock_timeout,
            repair_concurrency: defaults.repair_concurrency,
        }
    }

    /// Engine tuned from the service configuration.
    pub fn from_config(db: Arc<dyn Database>, config: &PipelineConfig) -> Self {
        Self::new(db)
            .with_lock_timeout(config.lock_timeout)
            .with_repair_concurrency(config.repair_concurrency)
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn with_repair_concurrency(mut self, concurrency: usize) -> Self {
        self.repair_concurrency = concurrency.max(1);
        self
    }

    /// Subscribe to committed progress events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<ProgressEvent> {
        self.events.subscribe()
    }

    pub fn db(&self) -> &Arc<dyn Database> {
        &self.db
    }

    // ── Internals ───────────────────────────────────────────────────

    async fn load_state(
        &self,
        creator_id: &str,
        require_rows: bool,
    ) -> Result<CreatorState, ProgressionError> {
        let creator = self.db.get_creator(creator_id).await?.ok_or_else(|| {
            ProgressionError::UnknownCreator {
                creator_id: creator_id.to_string(),
            }
        })?;
        let order = self.catalog.load(self.db.as_ref()).await?;
        let rows = self.db.list_creator_milestones(creator_id).await?;
        if require_rows && rows.is_empty() {
            return Err(ProgressionError::NotInitialized {
                creator_id: creator_id.to_string(),
            });
        }
        Ok(CreatorState {
            creator,
            order,
            rows,
        })
    }

    async fn commit(
        &self,
        changes: ProgressChangeSet,
        events: Vec<ProgressEvent>,
    ) -> Result<(), ProgressionError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.db
            .apply_progress_changes(&changes)
            .await
            .map_err(|e| with_creator(&changes.creator_id, e))?;
        self.events.publish_all(events);
        Ok(())
    }

    // ── Creators ────────────────────────────────────────────────────

    /// Register or update a creator. Applicability is re-evaluated on every
    /// read, so changing `content_path` never rewrites rows.
    pub async fn register_creator(&self, creator: &Creator) -> Result<(), ProgressionError> {
        self.db.upsert_creator(creator).await?;
        Ok(())
    }

    pub async fn get_creator(&self, creator_id: &str) -> Result<Creator, ProgressionError> {
        self.db
            .get_creator(creator_id)
            .await?
            .ok_or_else(|| ProgressionError::UnknownCreator {
                creator_id: creator_id.to_string(),
            })
    }

    /// Create one row per catalog milestone for a new creator.
    ///
    /// Returns `false` without writing when the creator already has rows.
    pub async fn initialize_creator(&self, creator_id: &str) -> Result<bool, ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, false).await?;
        if !state.rows.is_empty() {
            debug!(creator_id, "Creator already initialized");
            return Ok(false);
        }

        let initial = progression::initial_statuses(&state.order, state.creator.content_path);
        if initial.is_empty() {
            warn!(creator_id, "Catalog is empty, nothing to initialize");
            return Ok(false);
        }

        let mut changes = ProgressChangeSet::new(creator_id);
        for (milestone_id, status) in &initial {
            let row = match status {
                MilestoneStatus::Completed => {
                    CreatorMilestone::new(creator_id, milestone_id, MilestoneStatus::Locked)
                        .completed_by(SYSTEM_ACTOR)
                }
                other => CreatorMilestone::new(creator_id, milestone_id, *other),
            };
            changes.inserts.push(row);
        }

        let available = initial
            .iter()
            .find(|(_, s)| *s == MilestoneStatus::Available)
            .map(|(id, _)| id.clone());
        changes.activity.push(
            ActivityEntry::new(creator_id, None, "initialized", SYSTEM_ACTOR).with_detail(
                serde_json::json!({
                    "rows": initial.len(),
                    "catalog_version": state.order.version(),
                    "available": available,
                }),
            ),
        );

        let rows = changes.inserts.len();
        let events = vec![ProgressEvent::CreatorInitialized {
            creator_id: creator_id.to_string(),
            rows,
            available: available.clone(),
        }];
        self.commit(changes, events).await?;

        info!(
            creator_id,
            rows,
            available = available.as_deref().unwrap_or("-"),
            "Creator initialized"
        );
        Ok(true)
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Complete a milestone and unlock the next applicable one.
    ///
    /// `submission` replaces the row's submission data when given.
    pub async fn complete_milestone(
        &self,
        creator_id: &str,
        milestone_id: &str,
        actor: &str,
        submission: Option<serde_json::Value>,
    ) -> Result<CompletionOutcome, ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, true).await?;
        let (entry, row) = state.target(milestone_id)?;
        if !row.status.can_complete() {
            return Err(invalid(row, "complete"));
        }

        let mut done = transitioned(row, MilestoneStatus::Completed);
        done.completed_at = Some(done.updated_at);
        done.completed_by = Some(actor.to_string());
        if submission.is_some() {
            done.submission_data = submission;
        }

        let mut changes = ProgressChangeSet::new(creator_id);
        let mut events = Vec::new();
        changes.updates.push(done);
        changes.activity.push(ActivityEntry::new(
            creator_id,
            Some(milestone_id),
            "completed",
            actor,
        ));
        events.push(ProgressEvent::MilestoneCompleted {
            creator_id: creator_id.to_string(),
            milestone_id: milestone_id.to_string(),
            actor: actor.to_string(),
        });

        // Advance sees the completion it follows
        let mut statuses = state.statuses();
        statuses.insert(milestone_id, MilestoneStatus::Completed);
        let next = progression::next_unlock(
            &state.order,
            &statuses,
            state.creator.content_path,
            entry.position,
        );

        if let Some(next) = next {
            if let Some(next_row) = state.row(&next.milestone.id) {
                changes
                    .updates
                    .push(transitioned(next_row, MilestoneStatus::Available));
                changes.activity.push(
                    ActivityEntry::new(creator_id, Some(&next.milestone.id), "unlocked", actor)
                        .with_detail(serde_json::json!({ "after": milestone_id })),
                );
                events.push(ProgressEvent::MilestoneUnlocked {
                    creator_id: creator_id.to_string(),
                    milestone_id: next.milestone.id.clone(),
                    title: next.milestone.title.clone(),
                    phase_id: next.milestone.phase_id.clone(),
                    requires_team_action: next.milestone.requires_team_action,
                });
            }
        }

        let next_milestone = next.map(UnlockedMilestone::from);
        self.commit(changes, events).await?;

        info!(
            creator_id,
            milestone_id,
            actor,
            next = next_milestone
                .as_ref()
                .map(|n| n.milestone_id.as_str())
                .unwrap_or("-"),
            "Milestone completed"
        );
        Ok(CompletionOutcome {
            milestone_id: milestone_id.to_string(),
            next_milestone,
        })
    }

    /// `available → in_progress`.
    pub async fn start_milestone(
        &self,
        creator_id: &str,
        milestone_id: &str,
        actor: &str,
    ) -> Result<(), ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, true).await?;
        let (_, row) = state.target(milestone_id)?;
        if row.status != MilestoneStatus::Available {
            return Err(invalid(row, "start"));
        }

        let mut changes = ProgressChangeSet::new(creator_id);
        changes
            .updates
            .push(transitioned(row, MilestoneStatus::InProgress));
        changes.activity.push(ActivityEntry::new(
            creator_id,
            Some(milestone_id),
            "started",
            actor,
        ));
        let events = vec![ProgressEvent::MilestoneStarted {
            creator_id: creator_id.to_string(),
            milestone_id: milestone_id.to_string(),
            actor: actor.to_string(),
        }];
        self.commit(changes, events).await?;

        info!(creator_id, milestone_id, actor, "Milestone started");
        Ok(())
    }

    /// Hand a team-gated milestone to staff:
    /// `available | in_progress → waiting_approval`.
    pub async fn submit_for_approval(
        &self,
        creator_id: &str,
        milestone_id: &str,
        actor: &str,
        submission: Option<serde_json::Value>,
    ) -> Result<(), ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, true).await?;
        let (entry, row) = state.target(milestone_id)?;
        if !entry.milestone.requires_team_action || !row.status.is_open() {
            return Err(invalid(row, "submit for approval"));
        }

        let mut submitted = transitioned(row, MilestoneStatus::WaitingApproval);
        if submission.is_some() {
            submitted.submission_data = submission;
        }

        let mut changes = ProgressChangeSet::new(creator_id);
        changes.updates.push(submitted);
        changes.activity.push(ActivityEntry::new(
            creator_id,
            Some(milestone_id),
            "submitted",
            actor,
        ));
        let events = vec![ProgressEvent::MilestoneSubmitted {
            creator_id: creator_id.to_string(),
            milestone_id: milestone_id.to_string(),
            actor: actor.to_string(),
        }];
        self.commit(changes, events).await?;

        info!(creator_id, milestone_id, actor, "Milestone submitted for approval");
        Ok(())
    }

    /// Admin correction: `completed → available`. Later milestones are left
    /// as they are.
    pub async fn reopen_milestone(
        &self,
        creator_id: &str,
        milestone_id: &str,
        actor: &str,
    ) -> Result<(), ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, true).await?;
        let (_, row) = state.target(milestone_id)?;
        if row.status != MilestoneStatus::Completed {
            return Err(invalid(row, "reopen"));
        }

        let mut reopened = transitioned(row, MilestoneStatus::Available);
        reopened.completed_at = None;
        reopened.completed_by = None;

        let mut changes = ProgressChangeSet::new(creator_id);
        changes.updates.push(reopened);
        changes.activity.push(
            ActivityEntry::new(creator_id, Some(milestone_id), "reopened", actor).with_detail(
                serde_json::json!({
                    "previously_completed_by": row.completed_by,
                    "previously_completed_at": row.completed_at,
                }),
            ),
        );
        let events = vec![ProgressEvent::MilestoneReopened {
            creator_id: creator_id.to_string(),
            milestone_id: milestone_id.to_string(),
            actor: actor.to_string(),
        }];
        self.commit(changes, events).await?;

        info!(creator_id, milestone_id, actor, "Milestone reopened");
        Ok(())
    }

    /// Mark milestones bonus (`is_optional = true`) or core for one creator.
    ///
    /// Status is never touched. Every named milestone must have a row; the
    /// batch is applied as a unit. Returns the number of rows written.
    pub async fn set_optional(
        &self,
        creator_id: &str,
        milestone_ids: &[String],
        is_optional: bool,
        reason: Option<String>,
        actor: &str,
    ) -> Result<usize, ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, true).await?;

        let mut seen = HashSet::new();
        let mut changes = ProgressChangeSet::new(creator_id);
        let now = Utc::now();
        for milestone_id in milestone_ids {
            if !seen.insert(milestone_id.as_str()) {
                continue;
            }
            let row = state
                .row(milestone_id)
                .ok_or_else(|| ProgressionError::UnknownMilestone {
                    creator_id: creator_id.to_string(),
                    milestone_id: milestone_id.clone(),
                })?;
            let mut updated = row.clone();
            updated.optionality = Optionality {
                is_optional,
                optional_reason: reason.clone(),
                optional_set_by: Some(actor.to_string()),
                optional_set_at: Some(now),
            };
            updated.updated_at = now;
            changes.updates.push(updated);
            changes.activity.push(
                ActivityEntry::new(
                    creator_id,
                    Some(milestone_id),
                    if is_optional { "marked_optional" } else { "marked_required" },
                    actor,
                )
                .with_detail(serde_json::json!({ "reason": reason })),
            );
        }

        let written = changes.updates.len();
        let events = vec![ProgressEvent::OptionalityChanged {
            creator_id: creator_id.to_string(),
            milestone_ids: changes
                .updates
                .iter()
                .map(|r| r.milestone_id.clone())
                .collect(),
            is_optional,
            actor: actor.to_string(),
        }];
        self.commit(changes, events).await?;

        if written > 0 {
            info!(creator_id, written, is_optional, actor, "Optionality updated");
        }
        Ok(written)
    }

    // ── Read side ───────────────────────────────────────────────────

    /// The creator's applicable milestones with status, in global order.
    pub async fn list_applicable_milestones(
        &self,
        creator_id: &str,
    ) -> Result<Vec<MilestoneProgress>, ProgressionError> {
        let state = self.load_state(creator_id, true).await?;
        Ok(applicable_milestones(
            &state.order,
            &state.rows,
            state.creator.content_path,
        ))
    }

    /// Core/bonus completion numbers for the creator.
    pub async fn compute_progress(
        &self,
        creator_id: &str,
    ) -> Result<ProgressBreakdown, ProgressionError> {
        let milestones = self.list_applicable_milestones(creator_id).await?;
        Ok(compute_breakdown(&milestones))
    }

    /// Recent transitions for a creator, newest first.
    pub async fn list_activity(
        &self,
        creator_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, ProgressionError> {
        self.get_creator(creator_id).await?;
        Ok(self.db.list_activity(creator_id, limit).await?)
    }

    // ── Catalog administration ──────────────────────────────────────

    /// Phases and milestones in global order.
    pub async fn catalog(&self) -> Result<CatalogView, CatalogError> {
        let order = self.catalog.load(self.db.as_ref()).await?;
        let phases = self.db.list_phases().await?;
        Ok(CatalogView {
            version: order.version(),
            phases,
            milestones: order
                .entries()
                .iter()
                .map(|e| e.milestone.clone())
                .collect(),
        })
    }

    /// Validate and write a phase.
    pub async fn upsert_phase(&self, phase: Phase) -> Result<(), CatalogError> {
        let _gate = self.catalog_gate.lock().await;
        let mut phases = self.db.list_phases().await?;
        let milestones = self.db.list_milestones().await?;
        phases.retain(|p| p.id != phase.id);
        phases.push(phase.clone());
        validate_catalog(&phases, &milestones)?;

        self.db.upsert_phase(&phase).await?;
        self.catalog.invalidate().await;
        info!(phase_id = %phase.id, sort_order = phase.sort_order, "Phase saved");
        Ok(())
    }

    /// Validate and write a milestone. Existing creators get a row for a new
    /// milestone on their next repair.
    pub async fn upsert_milestone(&self, milestone: Milestone) -> Result<(), CatalogError> {
        let _gate = self.catalog_gate.lock().await;
        let phases = self.db.list_phases().await?;
        let mut milestones = self.db.list_milestones().await?;
        milestones.retain(|m| m.id != milestone.id);
        milestones.push(milestone.clone());
        validate_catalog(&phases, &milestones)?;

        self.db.upsert_milestone(&milestone).await?;
        self.catalog.invalidate().await;
        info!(
            milestone_id = %milestone.id,
            phase_id = %milestone.phase_id,
            sort_order = milestone.sort_order,
            "Milestone saved"
        );
        Ok(())
    }

    /// Remove a milestone and every creator's row for it.
    pub async fn retire_milestone(&self, milestone_id: &str) -> Result<bool, CatalogError> {
        let _gate = self.catalog_gate.lock().await;
        let retired = self.db.retire_milestone(milestone_id).await?;
        if retired {
            self.catalog.invalidate().await;
            info!(milestone_id, "Milestone retired; run repair to unstick affected creators");
        }
        Ok(retired)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::ContentPath;
    use crate::store::LibSqlBackend;

    /// Scenario catalog: onboarding [m1 (all), m2 (course, blog)],
    /// agreement [m3 (all), m4 (course only, team action)], launch [m5 (all)].
    pub(crate) async fn test_engine() -> ProgressionEngine {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let engine = ProgressionEngine::new(db).with_lock_timeout(Duration::from_millis(500));
        for phase in [
            Phase::new("onboarding", "Onboarding", 1),
            Phase::new("agreement", "Agreement", 2),
            Phase::new("launch", "Launch", 3),
        ] {
            engine.upsert_phase(phase).await.unwrap();
        }
        for milestone in [
            Milestone::new("m1", "onboarding", 1, "Intake"),
            Milestone::new("m2", "onboarding", 2, "Pick topic")
                .applies_to([ContentPath::Course, ContentPath::Blog]),
            Milestone::new("m3", "agreement", 1, "Sign agreement"),
            Milestone::new("m4", "agreement", 2, "Outline review")
                .applies_to([ContentPath::Course])
                .team_action(),
            Milestone::new("m5", "launch", 1, "Go live"),
        ] {
            engine.upsert_milestone(milestone).await.unwrap();
        }
        engine
    }

    pub(crate) async fn onboard(
        engine: &ProgressionEngine,
        id: &str,
        path: Option<ContentPath>,
    ) {
        engine
            .register_creator(&Creator::new(id, path))
            .await
            .unwrap();
        assert!(engine.initialize_creator(id).await.unwrap());
    }

    pub(crate) async fn status_of(engine: &ProgressionEngine, creator: &str, id: &str) -> MilestoneStatus {
        engine
            .db()
            .list_creator_milestones(creator)
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.milestone_id == id)
            .unwrap()
            .status
    }

    #[tokio::test]
    async fn scenario_course_creator() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;

        assert_eq!(status_of(&engine, "c1", "m1").await, MilestoneStatus::Completed);
        assert_eq!(status_of(&engine, "c1", "m2").await, MilestoneStatus::Available);
        assert_eq!(status_of(&engine, "c1", "m3").await, MilestoneStatus::Locked);

        let outcome = engine
            .complete_milestone("c1", "m2", "c1", None)
            .await
            .unwrap();
        let next = outcome.next_milestone.unwrap();
        assert_eq!(next.milestone_id, "m3");
        assert_eq!(next.phase_id, "agreement");
        assert_eq!(status_of(&engine, "c1", "m2").await, MilestoneStatus::Completed);
        assert_eq!(status_of(&engine, "c1", "m3").await, MilestoneStatus::Available);
        assert_eq!(status_of(&engine, "c1", "m4").await, MilestoneStatus::Locked);
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Blog)).await;
        let before = engine.db().list_creator_milestones("c1").await.unwrap();

        assert!(!engine.initialize_creator("c1").await.unwrap());
        let after = engine.db().list_creator_milestones("c1").await.unwrap();
        assert_eq!(before, after);
        assert_eq!(after.len(), 5);
    }

    #[tokio::test]
    async fn initialize_unknown_creator() {
        let engine = test_engine().await;
        let err = engine.initialize_creator("ghost").await.unwrap_err();
        assert!(matches!(err, ProgressionError::UnknownCreator { .. }));
    }

    #[tokio::test]
    async fn operations_require_initialization() {
        let engine = test_engine().await;
        engine
            .register_creator(&Creator::new("c1", None))
            .await
            .unwrap();

        let err = engine
            .complete_milestone("c1", "m2", "c1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::NotInitialized { .. }));
        let err = engine.compute_progress("c1").await.unwrap_err();
        assert_eq!(err.code(), "not_initialized");
    }

    #[tokio::test]
    async fn completing_locked_is_invalid() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;

        let err = engine
            .complete_milestone("c1", "m5", "c1", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::InvalidTransition { ref status, .. } if status == "locked"
        ));
        assert_eq!(status_of(&engine, "c1", "m5").await, MilestoneStatus::Locked);
    }

    #[tokio::test]
    async fn completing_unknown_milestone() {
        let engine = test_engine().await;
        onboard(&engine, "c1", None).await;
        let err = engine
            .complete_milestone("c1", "nope", "c1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::UnknownMilestone { .. }));
    }

    #[tokio::test]
    async fn advance_skips_inapplicable_across_phases() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Download)).await;
        // m2 is not for downloads, so m3 opened at initialization
        assert_eq!(status_of(&engine, "c1", "m2").await, MilestoneStatus::Locked);
        assert_eq!(status_of(&engine, "c1", "m3").await, MilestoneStatus::Available);

        let outcome = engine
            .complete_milestone("c1", "m3", "c1", None)
            .await
            .unwrap();
        // m4 is course-only; m5 is in the next phase
        assert_eq!(outcome.next_milestone.unwrap().milestone_id, "m5");

        let outcome = engine
            .complete_milestone("c1", "m5", "c1", None)
            .await
            .unwrap();
        assert!(outcome.next_milestone.is_none());
        assert!(engine.compute_progress("c1").await.unwrap().is_complete);
    }

    #[tokio::test]
    async fn completion_records_actor_and_submission() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        engine
            .complete_milestone("c1", "m2", "coach@team", Some(serde_json::json!({"topic": "Rust"})))
            .await
            .unwrap();

        let row = engine
            .db()
            .list_creator_milestones("c1")
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.milestone_id == "m2")
            .unwrap();
        assert_eq!(row.completed_by.as_deref(), Some("coach@team"));
        assert!(row.completed_at.is_some());
        assert_eq!(row.submission_data, Some(serde_json::json!({"topic": "Rust"})));
    }

    #[tokio::test]
    async fn team_milestone_flow() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        engine.complete_milestone("c1", "m2", "c1", None).await.unwrap();

        // m3 is creator work, not team-gated
        let err = engine
            .submit_for_approval("c1", "m3", "c1", None)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "invalid_transition");

        engine.complete_milestone("c1", "m3", "c1", None).await.unwrap();
        engine.start_milestone("c1", "m4", "c1").await.unwrap();
        assert_eq!(status_of(&engine, "c1", "m4").await, MilestoneStatus::InProgress);
        engine
            .submit_for_approval("c1", "m4", "c1", Some(serde_json::json!({"doc": "outline.pdf"})))
            .await
            .unwrap();
        assert_eq!(
            status_of(&engine, "c1", "m4").await,
            MilestoneStatus::WaitingApproval
        );
        // Nothing unlocks while waiting
        assert_eq!(status_of(&engine, "c1", "m5").await, MilestoneStatus::Locked);

        let outcome = engine
            .complete_milestone("c1", "m4", "admin@team", None)
            .await
            .unwrap();
        assert_eq!(outcome.next_milestone.unwrap().milestone_id, "m5");
    }

    #[tokio::test]
    async fn start_requires_available() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        let err = engine.start_milestone("c1", "m3", "c1").await.unwrap_err();
        assert!(matches!(err, ProgressionError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn reopen_does_not_cascade() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        engine.complete_milestone("c1", "m2", "c1", None).await.unwrap();

        engine.reopen_milestone("c1", "m2", "admin").await.unwrap();
        let rows = engine.db().list_creator_milestones("c1").await.unwrap();
        let m2 = rows.iter().find(|r| r.milestone_id == "m2").unwrap();
        assert_eq!(m2.status, MilestoneStatus::Available);
        assert!(m2.completed_at.is_none());
        assert!(m2.completed_by.is_none());
        // m3 keeps its unlock
        assert_eq!(status_of(&engine, "c1", "m3").await, MilestoneStatus::Available);
    }

    #[tokio::test]
    async fn reopen_then_recomplete_keeps_one_open() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        engine.complete_milestone("c1", "m2", "c1", None).await.unwrap();
        engine.reopen_milestone("c1", "m2", "admin").await.unwrap();

        let outcome = engine
            .complete_milestone("c1", "m2", "c1", None)
            .await
            .unwrap();
        assert!(outcome.next_milestone.is_none());
        assert_eq!(status_of(&engine, "c1", "m3").await, MilestoneStatus::Available);
        assert_eq!(status_of(&engine, "c1", "m4").await, MilestoneStatus::Locked);

        let open: Vec<String> = engine
            .list_applicable_milestones("c1")
            .await
            .unwrap()
            .into_iter()
            .filter(|m| m.status.is_open())
            .map(|m| m.milestone_id)
            .collect();
        assert_eq!(open, vec!["m3".to_string()]);

        // The normal flow resumes from the open milestone
        let outcome = engine
            .complete_milestone("c1", "m3", "c1", None)
            .await
            .unwrap();
        assert_eq!(outcome.next_milestone.unwrap().milestone_id, "m4");
    }

    #[tokio::test]
    async fn reopen_requires_completed() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        let err = engine.reopen_milestone("c1", "m2", "admin").await.unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::InvalidTransition { ref action, .. } if action == "reopen"
        ));
    }

    #[tokio::test]
    async fn set_optional_changes_counts_not_status() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        let before = engine.compute_progress("c1").await.unwrap();
        assert_eq!(before.core_total, 5);

        let written = engine
            .set_optional(
                "c1",
                &["m5".to_string(), "m5".to_string()],
                true,
                Some("Launch handled by partner".into()),
                "admin",
            )
            .await
            .unwrap();
        assert_eq!(written, 1);
        assert_eq!(status_of(&engine, "c1", "m5").await, MilestoneStatus::Locked);

        let after = engine.compute_progress("c1").await.unwrap();
        assert_eq!(after.core_total, 4);
        assert_eq!(after.bonus_total, 1);
        assert_eq!(after.bonus_completed, 0);

        let list = engine.list_applicable_milestones("c1").await.unwrap();
        assert!(list.iter().find(|m| m.milestone_id == "m5").unwrap().is_optional);
    }

    #[tokio::test]
    async fn set_optional_is_per_creator() {
        let engine = test_engine().await;
        onboard(&engine, "c1", None).await;
        onboard(&engine, "c2", None).await;
        engine
            .set_optional("c1", &["m3".to_string()], true, None, "admin")
            .await
            .unwrap();
        assert_eq!(engine.compute_progress("c1").await.unwrap().bonus_total, 1);
        assert_eq!(engine.compute_progress("c2").await.unwrap().bonus_total, 0);
    }

    #[tokio::test]
    async fn set_optional_unknown_milestone_writes_nothing() {
        let engine = test_engine().await;
        onboard(&engine, "c1", None).await;
        let err = engine
            .set_optional("c1", &["m3".to_string(), "ghost".to_string()], true, None, "admin")
            .await
            .unwrap_err();
        assert!(matches!(err, ProgressionError::UnknownMilestone { .. }));
        assert_eq!(engine.compute_progress("c1").await.unwrap().bonus_total, 0);
    }

    #[tokio::test]
    async fn aggregator_excludes_bonus() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        engine
            .set_optional("c1", &["m5".to_string()], true, None, "admin")
            .await
            .unwrap();
        engine.complete_milestone("c1", "m2", "c1", None).await.unwrap();
        engine.complete_milestone("c1", "m3", "c1", None).await.unwrap();
        engine.complete_milestone("c1", "m4", "admin", None).await.unwrap();

        // 4 core complete, 1 bonus available
        let progress = engine.compute_progress("c1").await.unwrap();
        assert_eq!(progress.core_total, 4);
        assert_eq!(progress.core_completed, 4);
        assert_eq!(progress.core_percent, 100);
        assert!(progress.is_complete);
        assert_eq!(progress.bonus_total, 1);
        assert_eq!(progress.bonus_completed, 0);
        assert_eq!(progress.bonus_available, 1);
    }

    #[tokio::test]
    async fn list_follows_global_order_and_applicability() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Blog)).await;
        let ids: Vec<String> = engine
            .list_applicable_milestones("c1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.milestone_id)
            .collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m5"]);
    }

    #[tokio::test]
    async fn concurrent_completions_advance_once() {
        let engine = Arc::new(test_engine().await);
        onboard(&engine, "c1", Some(ContentPath::Course)).await;

        let a = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.complete_milestone("c1", "m2", "a", None).await })
        };
        let b = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.complete_milestone("c1", "m2", "b", None).await })
        };
        let results = [a.await.unwrap(), b.await.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(ProgressionError::InvalidTransition { .. })
        )));

        let list = engine.list_applicable_milestones("c1").await.unwrap();
        let open: Vec<_> = list.iter().filter(|m| m.status.is_open()).collect();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].milestone_id, "m3");
    }

    #[tokio::test]
    async fn lock_timeout_surfaces_as_concurrent_modification() {
        let engine = test_engine()
            .await
            .with_lock_timeout(Duration::from_millis(20));
        onboard(&engine, "c1", Some(ContentPath::Course)).await;

        let _held = engine
            .locks
            .acquire("c1", Duration::from_millis(100))
            .await
            .unwrap();
        let err = engine
            .complete_milestone("c1", "m2", "c1", None)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert!(matches!(
            err,
            ProgressionError::ConcurrentModification { ref creator_id, .. } if creator_id == "c1"
        ));
    }

    #[tokio::test]
    async fn stale_write_maps_to_concurrent_modification() {
        let engine = test_engine().await;
        onboard(&engine, "c1", None).await;
        let mut row = engine
            .db()
            .list_creator_milestones("c1")
            .await
            .unwrap()
            .into_iter()
            .find(|r| r.milestone_id == "m3")
            .unwrap();
        row.version -= 1;
        let mut changes = ProgressChangeSet::new("c1");
        changes.updates.push(row);

        let err = engine.commit(changes, Vec::new()).await.unwrap_err();
        assert!(matches!(
            err,
            ProgressionError::ConcurrentModification { ref creator_id, .. } if creator_id == "c1"
        ));
    }

    #[tokio::test]
    async fn events_follow_commit() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        let mut rx = engine.subscribe();

        engine.complete_milestone("c1", "m2", "c1", None).await.unwrap();
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, ProgressEvent::MilestoneCompleted { ref milestone_id, .. } if milestone_id == "m2"));
        assert!(matches!(second, ProgressEvent::MilestoneUnlocked { ref milestone_id, .. } if milestone_id == "m3"));

        // A rejected transition publishes nothing
        let _ = engine.complete_milestone("c1", "m5", "c1", None).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn activity_log_records_transitions() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Course)).await;
        engine.complete_milestone("c1", "m2", "c1", None).await.unwrap();

        let activity = engine.list_activity("c1", 10).await.unwrap();
        let actions: Vec<&str> = activity.iter().map(|a| a.action.as_str()).collect();
        assert!(actions.contains(&"initialized"));
        assert!(actions.contains(&"completed"));
        assert!(actions.contains(&"unlocked"));

        let err = engine.list_activity("ghost", 10).await.unwrap_err();
        assert!(matches!(err, ProgressionError::UnknownCreator { .. }));
    }

    #[tokio::test]
    async fn content_path_change_reevaluates_applicability() {
        let engine = test_engine().await;
        onboard(&engine, "c1", Some(ContentPath::Download)).await;
        assert_eq!(engine.list_applicable_milestones("c1").await.unwrap().len(), 3);

        engine
            .register_creator(&Creator::new("c1", Some(ContentPath::Course)))
            .await
            .unwrap();
        assert_eq!(engine.list_applicable_milestones("c1").await.unwrap().len(), 5);
    }

    // ── Catalog administration ──────────────────────────────────────

    #[tokio::test]
    async fn catalog_view_is_globally_ordered() {
        let engine = test_engine().await;
        let view = engine.catalog().await.unwrap();
        assert_eq!(view.phases.len(), 3);
        let ids: Vec<&str> = view.milestones.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4", "m5"]);
    }

    #[tokio::test]
    async fn catalog_rejects_unknown_phase_and_duplicate_slot() {
        let engine = test_engine().await;
        let err = engine
            .upsert_milestone(Milestone::new("x", "nowhere", 1, "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownPhase { .. }));

        let err = engine
            .upsert_milestone(Milestone::new("x", "onboarding", 1, "X"))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateSortOrder { .. }));

        let err = engine
            .upsert_phase(Phase::new("extra", "Extra", 2))
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::DuplicatePhaseOrder { .. }));
    }

    #[tokio::test]
    async fn concurrent_catalog_writes_cannot_share_a_slot() {
        let engine = test_engine().await;
        let (a, b) = tokio::join!(
            engine.upsert_milestone(Milestone::new("retro", "launch", 5, "Retrospective")),
            engine.upsert_milestone(Milestone::new("survey", "launch", 5, "Survey")),
        );
        let errors: Vec<CatalogError> = [a, b].into_iter().filter_map(Result::err).collect();
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0], CatalogError::DuplicateSortOrder { .. }));

        let view = engine.catalog().await.unwrap();
        let in_slot = view
            .milestones
            .iter()
            .filter(|m| m.phase_id == "launch" && m.sort_order == 5)
            .count();
        assert_eq!(in_slot, 1);
    }

    #[tokio::test]
    async fn catalog_change_invalidates_cached_order() {
        let engine = test_engine().await;
        let before = engine.catalog().await.unwrap();
        engine
            .upsert_milestone(Milestone::new("m0", "launch", 0, "Pre-launch"))
            .await
            .unwrap();
        let after = engine.catalog().await.unwrap();
        assert!(after.version > before.version);
        let ids: Vec<&str> = after.milestones.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m2", "m3", "m4", "m0", "m5"]);
    }

    #[tokio::test]
    async fn retire_milestone_removes_rows() {
        let engine = test_engine().await;
        onboard(&engine, "c1", None).await;
        assert!(engine.retire_milestone("m5").await.unwrap());
        assert!(!engine.retire_milestone("m5").await.unwrap());
        let rows = engine.db().list_creator_milestones("c1").await.unwrap();
        assert!(rows.iter().all(|r| r.milestone_id != "m5"));
        assert_eq!(engine.catalog().await.unwrap().milestones.len(), 4);
    }
}
