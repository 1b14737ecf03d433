//! Progress aggregator: the read-side projection dashboards consume.
//!
//! Both functions here are pure: they take the resolved catalog order and a
//! creator's rows and never touch the store.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::model::{CreatorMilestone, MilestoneStatus};
use crate::catalog::{ActionType, ContentPath, GlobalOrder, is_applicable};

/// One applicable milestone with the creator's status, in global order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneProgress {
    pub milestone_id: String,
    pub phase_id: String,
    pub phase_name: String,
    pub title: String,
    /// Zero-based index in the catalog's global order.
    pub position: usize,
    pub requires_team_action: bool,
    pub action_type: ActionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action_config: Option<serde_json::Value>,
    pub status: MilestoneStatus,
    pub is_optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
}

/// Derived completion numbers for one creator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressBreakdown {
    pub core_total: usize,
    pub core_completed: usize,
    pub core_percent: u8,
    pub bonus_total: usize,
    pub bonus_completed: usize,
    /// Bonus milestones currently `available` or `in_progress`.
    pub bonus_available: usize,
    pub is_complete: bool,
}

/// The creator's applicable milestones, in global order.
///
/// Catalog milestones without a row (added after initialization and not yet
/// backfilled) are left out.
pub fn applicable_milestones(
    order: &GlobalOrder,
    rows: &[CreatorMilestone],
    content_path: Option<ContentPath>,
) -> Vec<MilestoneProgress> {
    let by_id: HashMap<&str, &CreatorMilestone> =
        rows.iter().map(|r| (r.milestone_id.as_str(), r)).collect();

    order
        .entries()
        .iter()
        .filter(|entry| is_applicable(&entry.milestone, content_path))
        .filter_map(|entry| {
            let row = by_id.get(entry.milestone.id.as_str())?;
            let m = &entry.milestone;
            Some(MilestoneProgress {
                milestone_id: m.id.clone(),
                phase_id: m.phase_id.clone(),
                phase_name: entry.phase_name.clone(),
                title: m.title.clone(),
                position: entry.position,
                requires_team_action: m.requires_team_action,
                action_type: m.action_type,
                action_config: m.action_config.clone(),
                status: row.status,
                is_optional: row.is_optional(),
                completed_at: row.completed_at,
                completed_by: row.completed_by.clone(),
            })
        })
        .collect()
}

/// Split applicable milestones into core and bonus and compute percentages.
pub fn compute_breakdown(milestones: &[MilestoneProgress]) -> ProgressBreakdown {
    let (bonus, core): (Vec<&MilestoneProgress>, Vec<&MilestoneProgress>) =
        milestones.iter().partition(|m| m.is_optional);

    let core_total = core.len();
    let core_completed = core
        .iter()
        .filter(|m| m.status == MilestoneStatus::Completed)
        .count();
    let core_percent = percent(core_completed, core_total);

    ProgressBreakdown {
        core_total,
        core_completed,
        core_percent,
        bonus_total: bonus.len(),
        bonus_completed: bonus
            .iter()
            .filter(|m| m.status == MilestoneStatus::Completed)
            .count(),
        bonus_available: bonus.iter().filter(|m| m.status.is_open()).count(),
        is_complete: core_percent == 100,
    }
}

/// `round(100 * done / total)`; no required work counts as done.
fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done as f64 / total as f64) * 100.0).round() as u8
}
