//! Progress data model: creators and their per-milestone records.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::ContentPath;

/// Lifecycle status of a creator's milestone.
///
/// `locked → available → (in_progress) → completed`, with `waiting_approval`
/// as a side state for team-gated milestones and `completed → available` as
/// the admin reopen path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MilestoneStatus {
    Locked,
    Available,
    InProgress,
    Completed,
    WaitingApproval,
}

impl MilestoneStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::WaitingApproval => "waiting_approval",
        }
    }

    /// Unlocked and not yet handed off: `available` or `in_progress`.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Available | Self::InProgress)
    }

    /// States from which a milestone may be completed.
    pub fn can_complete(&self) -> bool {
        matches!(
            self,
            Self::Available | Self::InProgress | Self::WaitingApproval
        )
    }
}

impl fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MilestoneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "locked" => Ok(Self::Locked),
            "available" => Ok(Self::Available),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "waiting_approval" => Ok(Self::WaitingApproval),
            other => Err(format!("unknown milestone status: {other}")),
        }
    }
}

/// Per-creator bonus/core flag and its audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Optionality {
    pub is_optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_set_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub optional_set_at: Option<DateTime<Utc>>,
}

/// A creator as far as the pipeline is concerned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Creator {
    pub id: String,
    #[serde(default)]
    pub display_name: String,
    /// Unset means unconstrained: only untagged milestones apply.
    #[serde(default)]
    pub content_path: Option<ContentPath>,
}

impl Creator {
    pub fn new(id: impl Into<String>, content_path: Option<ContentPath>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            content_path,
        }
    }

    /// Builder: set display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }
}

/// One creator's progress on one catalog milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreatorMilestone {
    pub creator_id: String,
    pub milestone_id: String,
    pub status: MilestoneStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(default)]
    pub optionality: Optionality,
    /// Payload attached at completion for downstream collaborators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submission_data: Option<serde_json::Value>,
    /// Bumped on every write; updates are compare-and-set against it.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreatorMilestone {
    /// A fresh row in the given status.
    pub fn new(
        creator_id: impl Into<String>,
        milestone_id: impl Into<String>,
        status: MilestoneStatus,
    ) -> Self {
        let now = Utc::now();
        Self {
            creator_id: creator_id.into(),
            milestone_id: milestone_id.into(),
            status,
            completed_at: None,
            completed_by: None,
            optionality: Optionality::default(),
            submission_data: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Builder: mark completed by `actor` at creation time.
    pub fn completed_by(mut self, actor: impl Into<String>) -> Self {
        self.status = MilestoneStatus::Completed;
        self.completed_at = Some(self.created_at);
        self.completed_by = Some(actor.into());
        self
    }

    pub fn is_optional(&self) -> bool {
        self.optionality.is_optional
    }
}
