//! Unlock planning over the resolved global order.
//!
//! These functions decide *what* should change; the engine turns decisions
//! into row writes. Every scan for "the next milestone to unlock" lives here.

use std::collections::HashMap;

use crate::catalog::{ContentPath, GlobalOrder, OrderedMilestone, is_applicable};
use crate::progress::MilestoneStatus;

/// Current status per milestone id for one creator.
pub type StatusMap<'a> = HashMap<&'a str, MilestoneStatus>;

/// Statuses for a freshly onboarded creator, in global order.
///
/// The first milestone is completed (intake is implicitly done); the first
/// remaining applicable milestone is available; everything else is locked.
pub fn initial_statuses(
    order: &GlobalOrder,
    content_path: Option<ContentPath>,
) -> Vec<(String, MilestoneStatus)> {
    let mut unlocked = false;
    order
        .entries()
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let status = if i == 0 {
                MilestoneStatus::Completed
            } else if !unlocked && is_applicable(&entry.milestone, content_path) {
                unlocked = true;
                MilestoneStatus::Available
            } else {
                MilestoneStatus::Locked
            };
            (entry.milestone.id.clone(), status)
        })
        .collect()
}

/// Advance: the first applicable milestone strictly after `after` in global
/// order that is not completed, if it is still locked. Phase boundaries are
/// not respected.
///
/// A successor that is already open or waiting on approval stops the scan,
/// so re-completing a reopened milestone never opens a second one.
pub fn next_unlock<'a>(
    order: &'a GlobalOrder,
    statuses: &StatusMap<'_>,
    content_path: Option<ContentPath>,
    after: usize,
) -> Option<&'a OrderedMilestone> {
    order
        .entries()
        .iter()
        .skip(after + 1)
        .filter(|entry| is_applicable(&entry.milestone, content_path))
        .find_map(|entry| match statuses.get(entry.milestone.id.as_str()) {
            Some(MilestoneStatus::Completed) | None => None,
            Some(status) => Some((entry, *status)),
        })
        .and_then(|(entry, status)| (status == MilestoneStatus::Locked).then_some(entry))
}

/// Outcome of the drift check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepairDecision {
    /// Something is open, or nothing was ever completed.
    Healthy,
    /// Stuck: unlock this milestone.
    Unlock(String),
    /// Stuck, but the first unfinished milestone is not locked
    /// (e.g. waiting on approval). Nothing to unlock.
    Blocked { at: String, status: MilestoneStatus },
    /// Every applicable milestone is completed.
    Finished,
}

/// Detect drift and pick the single milestone that repair should unlock.
///
/// Drift means at least one applicable milestone is completed and none is
/// available or in progress. The candidate is the first locked applicable
/// milestone whose applicable predecessors are all completed, which is only
/// ever the first unfinished one.
pub fn repair_decision(
    order: &GlobalOrder,
    statuses: &StatusMap<'_>,
    content_path: Option<ContentPath>,
) -> RepairDecision {
    let applicable: Vec<(&OrderedMilestone, MilestoneStatus)> = order
        .entries()
        .iter()
        .filter(|entry| is_applicable(&entry.milestone, content_path))
        .filter_map(|entry| {
            statuses
                .get(entry.milestone.id.as_str())
                .map(|status| (entry, *status))
        })
        .collect();

    let any_completed = applicable
        .iter()
        .any(|(_, s)| *s == MilestoneStatus::Completed);
    let any_open = applicable.iter().any(|(_, s)| s.is_open());
    if !any_completed || any_open {
        return RepairDecision::Healthy;
    }

    match applicable
        .iter()
        .find(|(_, s)| *s != MilestoneStatus::Completed)
    {
        Some((entry, MilestoneStatus::Locked)) => {
            RepairDecision::Unlock(entry.milestone.id.clone())
        }
        Some((entry, status)) => RepairDecision::Blocked {
            at: entry.milestone.id.clone(),
            status: *status,
        },
        None => RepairDecision::Finished,
    }
}
