//! Drift repair: backfill missing rows and unlock creators whose Advance
//! was missed. Safe to run speculatively and repeatedly.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Serialize;
use tracing::{info, warn};

use super::progression::{self, RepairDecision};
use super::{ProgressEvent, ProgressionEngine, SYSTEM_ACTOR, transitioned};
use crate::error::ProgressionError;
use crate::progress::{CreatorMilestone, MilestoneStatus};
use crate::store::{ActivityEntry, ProgressChangeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStatus {
    /// Nothing to unlock.
    Healthy,
    /// A stuck creator was unlocked.
    Repaired,
    /// Stuck behind a milestone that is not locked (e.g. waiting on approval).
    Blocked,
    /// All applicable milestones completed.
    Finished,
}

/// What one `repair_progression` call did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairOutcome {
    pub creator_id: String,
    pub status: RepairStatus,
    /// Rows created for catalog milestones the creator had no row for.
    pub backfilled: usize,
    pub unlocked: Option<String>,
}

impl RepairOutcome {
    /// Whether anything was written.
    pub fn changed(&self) -> bool {
        self.backfilled > 0 || self.unlocked.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RepairFailure {
    pub creator_id: String,
    pub error: String,
}

/// Summary of a population-wide repair.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairReport {
    pub examined: usize,
    pub repaired: usize,
    pub backfilled: usize,
    pub failed: usize,
    pub failures: Vec<RepairFailure>,
}

impl ProgressionEngine {
    /// Repair one creator.
    ///
    /// Missing rows are backfilled as `locked` first. Then, if the creator
    /// has a completion but nothing available or in progress, the first
    /// locked applicable milestone with every applicable predecessor
    /// completed is unlocked. Anything else is a no-op.
    pub async fn repair_progression(
        &self,
        creator_id: &str,
    ) -> Result<RepairOutcome, ProgressionError> {
        let _guard = self.locks.acquire(creator_id, self.lock_timeout).await?;
        let state = self.load_state(creator_id, true).await?;

        let mut changes = ProgressChangeSet::new(creator_id);
        let mut statuses = state.statuses();
        for entry in state.order.entries() {
            let id = entry.milestone.id.as_str();
            if !statuses.contains_key(id) {
                statuses.insert(id, MilestoneStatus::Locked);
                changes
                    .inserts
                    .push(CreatorMilestone::new(creator_id, id, MilestoneStatus::Locked));
            }
        }
        let backfilled = changes.inserts.len();
        if backfilled > 0 {
            changes.activity.push(
                ActivityEntry::new(creator_id, None, "backfilled", SYSTEM_ACTOR).with_detail(
                    serde_json::json!({
                        "milestones": changes
                            .inserts
                            .iter()
                            .map(|r| r.milestone_id.as_str())
                            .collect::<Vec<_>>(),
                    }),
                ),
            );
        }

        let decision =
            progression::repair_decision(&state.order, &statuses, state.creator.content_path);
        let (status, unlocked) = match decision {
            RepairDecision::Healthy => (RepairStatus::Healthy, None),
            RepairDecision::Finished => (RepairStatus::Finished, None),
            RepairDecision::Blocked { at, status } => {
                info!(creator_id, milestone_id = %at, %status, "Stuck creator is blocked, nothing to unlock");
                (RepairStatus::Blocked, None)
            }
            RepairDecision::Unlock(milestone_id) => {
                warn!(creator_id, milestone_id = %milestone_id, "Progression drift detected");
                match state.row(&milestone_id) {
                    Some(row) => changes
                        .updates
                        .push(transitioned(row, MilestoneStatus::Available)),
                    None => {
                        if let Some(row) = changes
                            .inserts
                            .iter_mut()
                            .find(|r| r.milestone_id == milestone_id)
                        {
                            row.status = MilestoneStatus::Available;
                        }
                    }
                }
                changes.activity.push(ActivityEntry::new(
                    creator_id,
                    Some(&milestone_id),
                    "repaired",
                    SYSTEM_ACTOR,
                ));
                (RepairStatus::Repaired, Some(milestone_id))
            }
        };

        let mut events = Vec::new();
        if let Some(milestone_id) = &unlocked {
            if let Some(entry) = state.order.get(milestone_id) {
                events.push(ProgressEvent::MilestoneUnlocked {
                    creator_id: creator_id.to_string(),
                    milestone_id: milestone_id.clone(),
                    title: entry.milestone.title.clone(),
                    phase_id: entry.milestone.phase_id.clone(),
                    requires_team_action: entry.milestone.requires_team_action,
                });
            }
        }
        if !changes.is_empty() {
            events.push(ProgressEvent::ProgressionRepaired {
                creator_id: creator_id.to_string(),
                backfilled,
                unlocked: unlocked.clone(),
            });
        }
        self.commit(changes, events).await?;

        let outcome = RepairOutcome {
            creator_id: creator_id.to_string(),
            status,
            backfilled,
            unlocked,
        };
        if outcome.changed() {
            info!(
                creator_id,
                backfilled,
                unlocked = outcome.unlocked.as_deref().unwrap_or("-"),
                "Progression repaired"
            );
        }
        Ok(outcome)
    }

    /// Repair every initialized creator with bounded concurrency.
    ///
    /// One creator's failure is recorded and does not stop the batch.
    pub async fn repair_all(&self) -> Result<RepairReport, ProgressionError> {
        let creator_ids = self.db.list_initialized_creators().await?;
        let results: Vec<(String, Result<RepairOutcome, ProgressionError>)> =
            futures::stream::iter(creator_ids)
                .map(|creator_id| async move {
                    let result = self.repair_progression(&creator_id).await;
                    (creator_id, result)
                })
                .buffer_unordered(self.repair_concurrency)
                .collect()
                .await;

        let mut report = RepairReport {
            examined: results.len(),
            ..RepairReport::default()
        };
        for (creator_id, result) in results {
            match result {
                Ok(outcome) => {
                    if outcome.unlocked.is_some() {
                        report.repaired += 1;
                    }
                    report.backfilled += outcome.backfilled;
                }
                Err(e) => {
                    warn!(creator_id = %creator_id, error = %e, "Repair failed");
                    report.failed += 1;
                    report.failures.push(RepairFailure {
                        creator_id,
                        error: e.to_string(),
                    });
                }
            }
        }
        report.failures.sort_by(|a, b| a.creator_id.cmp(&b.creator_id));

        info!(
            examined = report.examined,
            repaired = report.repaired,
            backfilled = report.backfilled,
            failed = report.failed,
            "Repair sweep finished"
        );
        Ok(report)
    }
}

/// Spawn a background task that runs `repair_all` every `interval`.
pub fn spawn_repair_ticker(
    engine: Arc<ProgressionEngine>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip immediate first tick
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = engine.repair_all().await {
                warn!(error = %e, "Scheduled repair sweep failed");
            }
        }
    })
}
