//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::catalog::{Milestone, Phase};
use crate::error::DatabaseError;
use crate::progress::{Creator, CreatorMilestone};

/// One entry in a creator's progress activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityEntry {
    pub id: Uuid,
    pub creator_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub milestone_id: Option<String>,
    /// Short verb: `initialized`, `completed`, `unlocked`, ...
    pub action: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl ActivityEntry {
    pub fn new(
        creator_id: impl Into<String>,
        milestone_id: Option<&str>,
        action: impl Into<String>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            creator_id: creator_id.into(),
            milestone_id: milestone_id.map(String::from),
            action: action.into(),
            actor: actor.into(),
            detail: None,
            created_at: Utc::now(),
        }
    }

    /// Builder: attach structured detail.
    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}

/// Everything one engine operation writes for a single creator.
///
/// Applied atomically. `updates` carry the version the engine read; a row
/// whose stored version moved fails the whole set with
/// [`DatabaseError::Conflict`].
#[derive(Debug, Clone, Default)]
pub struct ProgressChangeSet {
    pub creator_id: String,
    pub inserts: Vec<CreatorMilestone>,
    pub updates: Vec<CreatorMilestone>,
    pub activity: Vec<ActivityEntry>,
}

impl ProgressChangeSet {
    pub fn new(creator_id: impl Into<String>) -> Self {
        Self {
            creator_id: creator_id.into(),
            ..Self::default()
        }
    }

    /// No row writes pending (activity alone does not count).
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty()
    }
}

/// Backend-agnostic database trait covering the catalog, creators, and
/// progress rows.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    // ── Catalog ─────────────────────────────────────────────────────

    /// Monotonic version, bumped by every catalog write.
    async fn catalog_version(&self) -> Result<i64, DatabaseError>;

    /// All phases, ordered by sort order.
    async fn list_phases(&self) -> Result<Vec<Phase>, DatabaseError>;

    /// All milestones (unordered across phases).
    async fn list_milestones(&self) -> Result<Vec<Milestone>, DatabaseError>;

    /// Insert or replace a phase.
    async fn upsert_phase(&self, phase: &Phase) -> Result<(), DatabaseError>;

    /// Insert or replace a milestone.
    async fn upsert_milestone(&self, milestone: &Milestone) -> Result<(), DatabaseError>;

    /// Remove a milestone and every creator's row for it.
    /// Returns false if the milestone did not exist.
    async fn retire_milestone(&self, milestone_id: &str) -> Result<bool, DatabaseError>;

    // ── Creators ────────────────────────────────────────────────────

    /// Insert or update a creator record.
    async fn upsert_creator(&self, creator: &Creator) -> Result<(), DatabaseError>;

    /// Get a creator by ID.
    async fn get_creator(&self, id: &str) -> Result<Option<Creator>, DatabaseError>;

    /// IDs of creators that have progress rows, ascending.
    async fn list_initialized_creators(&self) -> Result<Vec<String>, DatabaseError>;

    // ── Progress ────────────────────────────────────────────────────

    /// All progress rows for a creator.
    async fn list_creator_milestones(
        &self,
        creator_id: &str,
    ) -> Result<Vec<CreatorMilestone>, DatabaseError>;

    /// Atomically apply a change set.
    async fn apply_progress_changes(&self, changes: &ProgressChangeSet) -> Result<(), DatabaseError>;

    /// Most recent activity for a creator, newest first.
    async fn list_activity(
        &self,
        creator_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, DatabaseError>;
}
