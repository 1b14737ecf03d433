//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. Multi-statement writes run in
//! a transaction behind `write_gate`, so two writers sharing the connection
//! never interleave inside one transaction.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Transaction, params};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{ActionType, ContentPath, Milestone, Phase};
use crate::error::DatabaseError;
use crate::progress::{Creator, CreatorMilestone, MilestoneStatus, Optionality};
use crate::store::migrations;
use crate::store::traits::{ActivityEntry, Database, ProgressChangeSet};

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    write_gate: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        conn.execute("PRAGMA foreign_keys = ON", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            write_gate: Mutex::new(()),
        };
        backend.init_schema().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }

    async fn begin(&self, op: &str) -> Result<Transaction, DatabaseError> {
        self.conn
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("{op} begin: {e}")))
    }
}

/// Commit on success, roll back on failure.
async fn finish<T>(
    tx: Transaction,
    op: &str,
    result: Result<T, DatabaseError>,
) -> Result<T, DatabaseError> {
    match result {
        Ok(value) => {
            tx.commit()
                .await
                .map_err(|e| DatabaseError::Query(format!("{op} commit: {e}")))?;
            Ok(value)
        }
        Err(err) => {
            if let Err(e) = tx.rollback().await {
                warn!(op, error = %e, "Rollback failed");
            }
            Err(err)
        }
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return ndt.and_utc();
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

fn parse_json(s: Option<String>, field: &str) -> Result<Option<serde_json::Value>, DatabaseError> {
    match s {
        Some(raw) if !raw.is_empty() => serde_json::from_str(&raw)
            .map(Some)
            .map_err(|e| DatabaseError::Serialization(format!("{field}: {e}"))),
        _ => Ok(None),
    }
}

fn to_json(value: &Option<serde_json::Value>) -> Option<String> {
    value.as_ref().map(|v| v.to_string())
}

async fn bump_catalog_version(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE catalog_meta SET version = version + 1, updated_at = ?1 WHERE id = 1",
        params![Utc::now().to_rfc3339()],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("bump_catalog_version: {e}")))?;
    Ok(())
}

// ── Row mapping ─────────────────────────────────────────────────────

const PHASE_COLUMNS: &str = "id, name, sort_order, description";

const MILESTONE_COLUMNS: &str =
    "id, phase_id, sort_order, title, requires_team_action, applies_to, action_type, action_config";

const CREATOR_MILESTONE_COLUMNS: &str = "creator_id, milestone_id, status, completed_at, completed_by, is_optional, optional_reason, optional_set_by, optional_set_at, submission_data, version, created_at, updated_at";

const ACTIVITY_COLUMNS: &str = "id, creator_id, milestone_id, action, actor, detail, created_at";

fn row_to_phase(row: &libsql::Row) -> Result<Phase, DatabaseError> {
    Ok(Phase {
        id: row.get(0).map_err(|e| DatabaseError::Query(format!("phase.id: {e}")))?,
        name: row.get(1).map_err(|e| DatabaseError::Query(format!("phase.name: {e}")))?,
        sort_order: row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("phase.sort_order: {e}")))?,
        description: row.get(3).unwrap_or_default(),
    })
}

fn row_to_milestone(row: &libsql::Row) -> Result<Milestone, DatabaseError> {
    let id: String = row.get(0).map_err(|e| DatabaseError::Query(format!("milestone.id: {e}")))?;
    let applies_raw: String = row.get(5).unwrap_or_else(|_| "[]".to_string());
    let applies_to = serde_json::from_str(&applies_raw)
        .map_err(|e| DatabaseError::Serialization(format!("milestone.applies_to ({id}): {e}")))?;
    let action_str: String = row.get(6).unwrap_or_else(|_| "checkbox".to_string());
    let action_type = action_str.parse::<ActionType>().unwrap_or_else(|e| {
        warn!(milestone_id = %id, error = %e, "Falling back to checkbox action");
        ActionType::default()
    });

    Ok(Milestone {
        phase_id: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("milestone.phase_id: {e}")))?,
        sort_order: row
            .get(2)
            .map_err(|e| DatabaseError::Query(format!("milestone.sort_order: {e}")))?,
        title: row
            .get(3)
            .map_err(|e| DatabaseError::Query(format!("milestone.title: {e}")))?,
        requires_team_action: row.get::<i64>(4).unwrap_or(0) != 0,
        applies_to,
        action_type,
        action_config: parse_json(row.get(7).ok(), "milestone.action_config")?,
        id,
    })
}

fn row_to_creator(row: &libsql::Row) -> Result<Creator, DatabaseError> {
    let content_path: Option<String> = row.get(2).ok();
    let content_path = content_path
        .map(|s| s.parse::<ContentPath>())
        .transpose()
        .map_err(DatabaseError::Serialization)?;
    Ok(Creator {
        id: row.get(0).map_err(|e| DatabaseError::Query(format!("creator.id: {e}")))?,
        display_name: row.get(1).unwrap_or_default(),
        content_path,
    })
}

fn row_to_creator_milestone(row: &libsql::Row) -> Result<CreatorMilestone, DatabaseError> {
    let status_str: String = row
        .get(2)
        .map_err(|e| DatabaseError::Query(format!("creator_milestone.status: {e}")))?;
    let status = status_str
        .parse::<MilestoneStatus>()
        .map_err(DatabaseError::Serialization)?;
    let completed_at: Option<String> = row.get(3).ok();
    let optional_set_at: Option<String> = row.get(8).ok();
    let created_str: String = row.get(11).unwrap_or_default();
    let updated_str: String = row.get(12).unwrap_or_default();

    Ok(CreatorMilestone {
        creator_id: row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("creator_milestone.creator_id: {e}")))?,
        milestone_id: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("creator_milestone.milestone_id: {e}")))?,
        status,
        completed_at: parse_optional_datetime(&completed_at),
        completed_by: row.get(4).ok(),
        optionality: Optionality {
            is_optional: row.get::<i64>(5).unwrap_or(0) != 0,
            optional_reason: row.get(6).ok(),
            optional_set_by: row.get(7).ok(),
            optional_set_at: parse_optional_datetime(&optional_set_at),
        },
        submission_data: parse_json(row.get(9).ok(), "creator_milestone.submission_data")?,
        version: row
            .get(10)
            .map_err(|e| DatabaseError::Query(format!("creator_milestone.version: {e}")))?,
        created_at: parse_datetime(&created_str),
        updated_at: parse_datetime(&updated_str),
    })
}

fn row_to_activity(row: &libsql::Row) -> Result<ActivityEntry, DatabaseError> {
    let id_str: String = row.get(0).map_err(|e| DatabaseError::Query(format!("activity.id: {e}")))?;
    let created_str: String = row.get(6).unwrap_or_default();
    Ok(ActivityEntry {
        id: Uuid::parse_str(&id_str).unwrap_or_else(|_| Uuid::nil()),
        creator_id: row
            .get(1)
            .map_err(|e| DatabaseError::Query(format!("activity.creator_id: {e}")))?,
        milestone_id: row.get(2).ok(),
        action: row.get(3).unwrap_or_default(),
        actor: row.get(4).unwrap_or_default(),
        detail: parse_json(row.get(5).ok(), "activity.detail")?,
        created_at: parse_datetime(&created_str),
    })
}

// ── Progress writes ─────────────────────────────────────────────────

async fn insert_creator_milestone(
    conn: &Connection,
    row: &CreatorMilestone,
) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO creator_milestones ({CREATOR_MILESTONE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            row.creator_id.as_str(),
            row.milestone_id.as_str(),
            row.status.as_str(),
            row.completed_at.map(|d| d.to_rfc3339()),
            row.completed_by.as_deref(),
            row.optionality.is_optional as i64,
            row.optionality.optional_reason.as_deref(),
            row.optionality.optional_set_by.as_deref(),
            row.optionality.optional_set_at.map(|d| d.to_rfc3339()),
            to_json(&row.submission_data),
            row.version,
            row.created_at.to_rfc3339(),
            row.updated_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| {
        let msg = e.to_string();
        if msg.contains("UNIQUE") || msg.contains("PRIMARY KEY") {
            DatabaseError::Conflict(format!(
                "row {}/{} already exists",
                row.creator_id, row.milestone_id
            ))
        } else {
            DatabaseError::Query(format!("insert_creator_milestone: {e}"))
        }
    })?;
    Ok(())
}

/// Compare-and-set update: succeeds only if the stored version still matches
/// `row.version`, then bumps it.
async fn update_creator_milestone(
    conn: &Connection,
    row: &CreatorMilestone,
) -> Result<(), DatabaseError> {
    let count = conn
        .execute(
            "UPDATE creator_milestones SET status = ?1, completed_at = ?2, completed_by = ?3,
                 is_optional = ?4, optional_reason = ?5, optional_set_by = ?6, optional_set_at = ?7,
                 submission_data = ?8, version = version + 1, updated_at = ?9
             WHERE creator_id = ?10 AND milestone_id = ?11 AND version = ?12",
            params![
                row.status.as_str(),
                row.completed_at.map(|d| d.to_rfc3339()),
                row.completed_by.as_deref(),
                row.optionality.is_optional as i64,
                row.optionality.optional_reason.as_deref(),
                row.optionality.optional_set_by.as_deref(),
                row.optionality.optional_set_at.map(|d| d.to_rfc3339()),
                to_json(&row.submission_data),
                row.updated_at.to_rfc3339(),
                row.creator_id.as_str(),
                row.milestone_id.as_str(),
                row.version,
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("update_creator_milestone: {e}")))?;

    if count == 0 {
        return Err(DatabaseError::Conflict(format!(
            "row {}/{} changed since version {}",
            row.creator_id, row.milestone_id, row.version
        )));
    }
    Ok(())
}

async fn insert_activity(conn: &Connection, entry: &ActivityEntry) -> Result<(), DatabaseError> {
    conn.execute(
        &format!("INSERT INTO progress_activity ({ACTIVITY_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
        params![
            entry.id.to_string(),
            entry.creator_id.as_str(),
            entry.milestone_id.as_deref(),
            entry.action.as_str(),
            entry.actor.as_str(),
            to_json(&entry.detail),
            entry.created_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("insert_activity: {e}")))?;
    Ok(())
}

async fn write_changes(conn: &Connection, changes: &ProgressChangeSet) -> Result<(), DatabaseError> {
    for row in &changes.inserts {
        insert_creator_milestone(conn, row).await?;
    }
    for row in &changes.updates {
        update_creator_milestone(conn, row).await?;
    }
    for entry in &changes.activity {
        insert_activity(conn, entry).await?;
    }
    Ok(())
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Catalog ─────────────────────────────────────────────────────

    async fn catalog_version(&self) -> Result<i64, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT version FROM catalog_meta WHERE id = 1", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("catalog_version: {e}")))?;
        match rows.next().await {
            Ok(Some(row)) => row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("catalog_version row: {e}"))),
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("catalog_version row: {e}"))),
        }
    }

    async fn list_phases(&self) -> Result<Vec<Phase>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {PHASE_COLUMNS} FROM phases ORDER BY sort_order ASC, id ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_phases: {e}")))?;

        let mut phases = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            phases.push(row_to_phase(&row)?);
        }
        Ok(phases)
    }

    async fn list_milestones(&self) -> Result<Vec<Milestone>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(&format!("SELECT {MILESTONE_COLUMNS} FROM milestones"), ())
            .await
            .map_err(|e| DatabaseError::Query(format!("list_milestones: {e}")))?;

        let mut milestones = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            milestones.push(row_to_milestone(&row)?);
        }
        Ok(milestones)
    }

    async fn upsert_phase(&self, phase: &Phase) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("upsert_phase").await?;
        let result = async {
            tx.execute(
                "INSERT INTO phases (id, name, sort_order, description, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET name = excluded.name,
                     sort_order = excluded.sort_order, description = excluded.description,
                     updated_at = excluded.updated_at",
                params![
                    phase.id.as_str(),
                    phase.name.as_str(),
                    phase.sort_order,
                    phase.description.as_str(),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                if e.to_string().contains("UNIQUE") {
                    DatabaseError::Constraint(format!(
                        "phase sort order {} is already taken",
                        phase.sort_order
                    ))
                } else {
                    DatabaseError::Query(format!("upsert_phase: {e}"))
                }
            })?;
            bump_catalog_version(&tx).await
        }
        .await;
        finish(tx, "upsert_phase", result).await?;
        debug!(phase_id = %phase.id, "Phase upserted");
        Ok(())
    }

    async fn upsert_milestone(&self, milestone: &Milestone) -> Result<(), DatabaseError> {
        let applies_to = serde_json::to_string(&milestone.applies_to)
            .map_err(|e| DatabaseError::Serialization(e.to_string()))?;

        let _gate = self.write_gate.lock().await;
        let tx = self.begin("upsert_milestone").await?;
        let result = async {
            tx.execute(
                "INSERT INTO milestones (id, phase_id, sort_order, title, requires_team_action, applies_to, action_type, action_config, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(id) DO UPDATE SET phase_id = excluded.phase_id,
                     sort_order = excluded.sort_order, title = excluded.title,
                     requires_team_action = excluded.requires_team_action,
                     applies_to = excluded.applies_to, action_type = excluded.action_type,
                     action_config = excluded.action_config, updated_at = excluded.updated_at",
                params![
                    milestone.id.as_str(),
                    milestone.phase_id.as_str(),
                    milestone.sort_order,
                    milestone.title.as_str(),
                    milestone.requires_team_action as i64,
                    applies_to,
                    milestone.action_type.as_str(),
                    to_json(&milestone.action_config),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| {
                let msg = e.to_string();
                if msg.contains("FOREIGN KEY") {
                    DatabaseError::Constraint(format!(
                        "milestone {} references unknown phase {}",
                        milestone.id, milestone.phase_id
                    ))
                } else if msg.contains("UNIQUE") {
                    DatabaseError::Constraint(format!(
                        "phase {} already has a milestone at sort order {}",
                        milestone.phase_id, milestone.sort_order
                    ))
                } else {
                    DatabaseError::Query(format!("upsert_milestone: {e}"))
                }
            })?;
            bump_catalog_version(&tx).await
        }
        .await;
        finish(tx, "upsert_milestone", result).await?;
        debug!(milestone_id = %milestone.id, "Milestone upserted");
        Ok(())
    }

    async fn retire_milestone(&self, milestone_id: &str) -> Result<bool, DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("retire_milestone").await?;
        let result = async {
            let rows = tx
                .execute(
                    "DELETE FROM creator_milestones WHERE milestone_id = ?1",
                    params![milestone_id],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("retire_milestone rows: {e}")))?;
            let count = tx
                .execute("DELETE FROM milestones WHERE id = ?1", params![milestone_id])
                .await
                .map_err(|e| DatabaseError::Query(format!("retire_milestone: {e}")))?;
            if count > 0 {
                bump_catalog_version(&tx).await?;
            }
            Ok((count > 0, rows))
        }
        .await;
        let (retired, rows) = finish(tx, "retire_milestone", result).await?;
        if retired {
            info!(milestone_id, progress_rows = rows, "Milestone retired");
        }
        Ok(retired)
    }

    // ── Creators ────────────────────────────────────────────────────

    async fn upsert_creator(&self, creator: &Creator) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        self.conn()
            .execute(
                "INSERT INTO creators (id, display_name, content_path, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET display_name = excluded.display_name,
                     content_path = excluded.content_path, updated_at = excluded.updated_at",
                params![
                    creator.id.as_str(),
                    creator.display_name.as_str(),
                    creator.content_path.map(|p| p.as_str()),
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_creator: {e}")))?;
        debug!(creator_id = %creator.id, "Creator upserted");
        Ok(())
    }

    async fn get_creator(&self, id: &str) -> Result<Option<Creator>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, display_name, content_path FROM creators WHERE id = ?1",
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_creator: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_creator(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_creator row: {e}"))),
        }
    }

    async fn list_initialized_creators(&self) -> Result<Vec<String>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT DISTINCT creator_id FROM creator_milestones ORDER BY creator_id ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_initialized_creators: {e}")))?;

        let mut ids = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("creator_id: {e}")))?;
            ids.push(id);
        }
        Ok(ids)
    }

    // ── Progress ────────────────────────────────────────────────────

    async fn list_creator_milestones(
        &self,
        creator_id: &str,
    ) -> Result<Vec<CreatorMilestone>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {CREATOR_MILESTONE_COLUMNS} FROM creator_milestones WHERE creator_id = ?1"
                ),
                params![creator_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_creator_milestones: {e}")))?;

        let mut result = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            result.push(row_to_creator_milestone(&row)?);
        }
        Ok(result)
    }

    async fn apply_progress_changes(&self, changes: &ProgressChangeSet) -> Result<(), DatabaseError> {
        let _gate = self.write_gate.lock().await;
        let tx = self.begin("apply_progress_changes").await?;
        let result = write_changes(&tx, changes).await;
        finish(tx, "apply_progress_changes", result).await?;
        debug!(
            creator_id = %changes.creator_id,
            inserts = changes.inserts.len(),
            updates = changes.updates.len(),
            activity = changes.activity.len(),
            "Progress changes applied"
        );
        Ok(())
    }

    async fn list_activity(
        &self,
        creator_id: &str,
        limit: usize,
    ) -> Result<Vec<ActivityEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {ACTIVITY_COLUMNS} FROM progress_activity WHERE creator_id = ?1
                     ORDER BY created_at DESC, rowid DESC LIMIT ?2"
                ),
                params![creator_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_activity: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            entries.push(row_to_activity(&row)?);
        }
        Ok(entries)
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    async fn seeded_db() -> LibSqlBackend {
        let db = test_db().await;
        db.upsert_phase(&Phase::new("onboarding", "Onboarding", 1))
            .await
            .unwrap();
        db.upsert_milestone(&Milestone::new("intake", "onboarding", 1, "Intake"))
            .await
            .unwrap();
        db.upsert_milestone(
            &Milestone::new("outline", "onboarding", 2, "Outline")
                .applies_to([ContentPath::Course])
                .with_action(ActionType::Upload, Some(serde_json::json!({"accept": "pdf"}))),
        )
        .await
        .unwrap();
        db.upsert_creator(&Creator::new("c1", Some(ContentPath::Course)))
            .await
            .unwrap();
        db
    }

    // ── Catalog tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn catalog_writes_bump_version() {
        let db = test_db().await;
        assert_eq!(db.catalog_version().await.unwrap(), 0);
        db.upsert_phase(&Phase::new("p1", "One", 1)).await.unwrap();
        db.upsert_milestone(&Milestone::new("m1", "p1", 1, "M1"))
            .await
            .unwrap();
        assert_eq!(db.catalog_version().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn milestone_roundtrip() {
        let db = seeded_db().await;
        let milestones = db.list_milestones().await.unwrap();
        let outline = milestones.iter().find(|m| m.id == "outline").unwrap();
        assert_eq!(outline.phase_id, "onboarding");
        assert_eq!(outline.sort_order, 2);
        assert!(outline.applies_to.contains(&ContentPath::Course));
        assert_eq!(outline.action_type, ActionType::Upload);
        assert_eq!(outline.action_config, Some(serde_json::json!({"accept": "pdf"})));
    }

    #[tokio::test]
    async fn upsert_phase_replaces() {
        let db = test_db().await;
        db.upsert_phase(&Phase::new("p1", "One", 1)).await.unwrap();
        db.upsert_phase(&Phase::new("p1", "Renamed", 5)).await.unwrap();
        let phases = db.list_phases().await.unwrap();
        assert_eq!(phases.len(), 1);
        assert_eq!(phases[0].name, "Renamed");
        assert_eq!(phases[0].sort_order, 5);
    }

    #[tokio::test]
    async fn milestone_with_unknown_phase_rejected() {
        let db = test_db().await;
        let err = db
            .upsert_milestone(&Milestone::new("m1", "nope", 1, "M1"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        assert_eq!(db.catalog_version().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn occupied_catalog_slot_rejected() {
        let db = test_db().await;
        db.upsert_phase(&Phase::new("p1", "One", 1)).await.unwrap();
        let err = db
            .upsert_phase(&Phase::new("p2", "Two", 1))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));

        db.upsert_milestone(&Milestone::new("m1", "p1", 1, "M1"))
            .await
            .unwrap();
        let err = db
            .upsert_milestone(&Milestone::new("m2", "p1", 1, "M2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
        assert_eq!(db.list_milestones().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retire_milestone_cascades_progress_rows() {
        let db = seeded_db().await;
        let mut changes = ProgressChangeSet::new("c1");
        changes
            .inserts
            .push(CreatorMilestone::new("c1", "intake", MilestoneStatus::Completed));
        changes
            .inserts
            .push(CreatorMilestone::new("c1", "outline", MilestoneStatus::Available));
        db.apply_progress_changes(&changes).await.unwrap();

        assert!(db.retire_milestone("outline").await.unwrap());
        assert!(!db.retire_milestone("outline").await.unwrap());

        let rows = db.list_creator_milestones("c1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].milestone_id, "intake");
    }

    // ── Creator tests ───────────────────────────────────────────────

    #[tokio::test]
    async fn creator_roundtrip() {
        let db = test_db().await;
        db.upsert_creator(&Creator::new("c1", None).with_display_name("Dana"))
            .await
            .unwrap();
        let fetched = db.get_creator("c1").await.unwrap().unwrap();
        assert_eq!(fetched.display_name, "Dana");
        assert!(fetched.content_path.is_none());

        db.upsert_creator(&Creator::new("c1", Some(ContentPath::Blog)))
            .await
            .unwrap();
        let fetched = db.get_creator("c1").await.unwrap().unwrap();
        assert_eq!(fetched.content_path, Some(ContentPath::Blog));
    }

    #[tokio::test]
    async fn get_creator_not_found() {
        let db = test_db().await;
        assert!(db.get_creator("ghost").await.unwrap().is_none());
    }

    // ── Progress tests ──────────────────────────────────────────────

    #[tokio::test]
    async fn apply_inserts_and_lists() {
        let db = seeded_db().await;
        let mut changes = ProgressChangeSet::new("c1");
        changes.inserts.push(
            CreatorMilestone::new("c1", "intake", MilestoneStatus::Locked).completed_by("system"),
        );
        changes
            .inserts
            .push(CreatorMilestone::new("c1", "outline", MilestoneStatus::Available));
        changes
            .activity
            .push(ActivityEntry::new("c1", None, "initialized", "system"));
        db.apply_progress_changes(&changes).await.unwrap();

        let rows = db.list_creator_milestones("c1").await.unwrap();
        assert_eq!(rows.len(), 2);
        let intake = rows.iter().find(|r| r.milestone_id == "intake").unwrap();
        assert_eq!(intake.status, MilestoneStatus::Completed);
        assert_eq!(intake.completed_by.as_deref(), Some("system"));
        assert!(intake.completed_at.is_some());

        assert_eq!(db.list_initialized_creators().await.unwrap(), vec!["c1"]);
        let activity = db.list_activity("c1", 10).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].action, "initialized");
    }

    #[tokio::test]
    async fn duplicate_insert_is_conflict_and_rolls_back() {
        let db = seeded_db().await;
        let mut first = ProgressChangeSet::new("c1");
        first
            .inserts
            .push(CreatorMilestone::new("c1", "intake", MilestoneStatus::Completed));
        db.apply_progress_changes(&first).await.unwrap();

        let mut second = ProgressChangeSet::new("c1");
        second
            .inserts
            .push(CreatorMilestone::new("c1", "outline", MilestoneStatus::Available));
        second
            .inserts
            .push(CreatorMilestone::new("c1", "intake", MilestoneStatus::Locked));
        let err = db.apply_progress_changes(&second).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));

        // The outline insert rolled back with the failed set
        let rows = db.list_creator_milestones("c1").await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn update_is_compare_and_set() {
        let db = seeded_db().await;
        let mut init = ProgressChangeSet::new("c1");
        init.inserts
            .push(CreatorMilestone::new("c1", "outline", MilestoneStatus::Available));
        db.apply_progress_changes(&init).await.unwrap();

        let mut row = db.list_creator_milestones("c1").await.unwrap().remove(0);
        assert_eq!(row.version, 0);
        row.status = MilestoneStatus::InProgress;

        let mut update = ProgressChangeSet::new("c1");
        update.updates.push(row.clone());
        db.apply_progress_changes(&update).await.unwrap();

        let stored = db.list_creator_milestones("c1").await.unwrap().remove(0);
        assert_eq!(stored.status, MilestoneStatus::InProgress);
        assert_eq!(stored.version, 1);

        // Replaying the stale version loses
        let err = db.apply_progress_changes(&update).await.unwrap_err();
        assert!(matches!(err, DatabaseError::Conflict(_)));
    }

    #[tokio::test]
    async fn optionality_and_submission_roundtrip() {
        let db = seeded_db().await;
        let mut row = CreatorMilestone::new("c1", "outline", MilestoneStatus::Completed);
        row.optionality = Optionality {
            is_optional: true,
            optional_reason: Some("Already has an outline".into()),
            optional_set_by: Some("admin@team".into()),
            optional_set_at: Some(Utc::now()),
        };
        row.submission_data = Some(serde_json::json!({"file": "outline.pdf"}));
        let mut changes = ProgressChangeSet::new("c1");
        changes.inserts.push(row);
        db.apply_progress_changes(&changes).await.unwrap();

        let stored = db.list_creator_milestones("c1").await.unwrap().remove(0);
        assert!(stored.optionality.is_optional);
        assert_eq!(
            stored.optionality.optional_reason.as_deref(),
            Some("Already has an outline")
        );
        assert!(stored.optionality.optional_set_at.is_some());
        assert_eq!(
            stored.submission_data,
            Some(serde_json::json!({"file": "outline.pdf"}))
        );
    }

    #[tokio::test]
    async fn activity_newest_first_with_limit() {
        let db = seeded_db().await;
        let mut changes = ProgressChangeSet::new("c1");
        for action in ["initialized", "completed", "unlocked"] {
            changes
                .activity
                .push(ActivityEntry::new("c1", Some("intake"), action, "system"));
        }
        db.apply_progress_changes(&changes).await.unwrap();

        let entries = db.list_activity("c1", 2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "unlocked");
    }

    #[tokio::test]
    async fn open_local_creates_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("nested").join("pipeline.db");
        let db = LibSqlBackend::new_local(&db_path).await.unwrap();
        assert!(db_path.exists());
        drop(db);
    }
}
