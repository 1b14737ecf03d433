//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "catalog",
        sql: r#"
            CREATE TABLE IF NOT EXISTS phases (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                sort_order INTEGER NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_phases_sort ON phases(sort_order);

            CREATE TABLE IF NOT EXISTS milestones (
                id TEXT PRIMARY KEY,
                phase_id TEXT NOT NULL REFERENCES phases(id) ON DELETE CASCADE,
                sort_order INTEGER NOT NULL,
                title TEXT NOT NULL,
                requires_team_action INTEGER NOT NULL DEFAULT 0,
                applies_to TEXT NOT NULL DEFAULT '[]',
                action_type TEXT NOT NULL DEFAULT 'checkbox',
                action_config TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            CREATE INDEX IF NOT EXISTS idx_milestones_phase ON milestones(phase_id, sort_order);

            CREATE TABLE IF NOT EXISTS catalog_meta (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                version INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT OR IGNORE INTO catalog_meta (id, version) VALUES (1, 0);
        "#,
    },
    Migration {
        version: 2,
        name: "creator_progress",
        sql: r#"
            CREATE TABLE IF NOT EXISTS creators (
                id TEXT PRIMARY KEY,
                display_name TEXT NOT NULL DEFAULT '',
                content_path TEXT,
                created_at TEXT NOT NULL DEFAULT (datetime('now')),
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS creator_milestones (
                creator_id TEXT NOT NULL REFERENCES creators(id) ON DELETE CASCADE,
                milestone_id TEXT NOT NULL REFERENCES milestones(id) ON DELETE CASCADE,
                status TEXT NOT NULL DEFAULT 'locked',
                completed_at TEXT,
                completed_by TEXT,
                is_optional INTEGER NOT NULL DEFAULT 0,
                optional_reason TEXT,
                optional_set_by TEXT,
                optional_set_at TEXT,
                submission_data TEXT,
                version INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (creator_id, milestone_id)
            );
            CREATE INDEX IF NOT EXISTS idx_creator_milestones_status
                ON creator_milestones(creator_id, status);
            CREATE INDEX IF NOT EXISTS idx_creator_milestones_milestone
                ON creator_milestones(milestone_id);
        "#,
    },
    Migration {
        version: 3,
        name: "progress_activity",
        sql: r#"
            CREATE TABLE IF NOT EXISTS progress_activity (
                id TEXT PRIMARY KEY,
                creator_id TEXT NOT NULL,
                milestone_id TEXT,
                action TEXT NOT NULL,
                actor TEXT NOT NULL,
                detail TEXT,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_progress_activity_creator
                ON progress_activity(creator_id, created_at);
        "#,
    },
    Migration {
        version: 4,
        name: "catalog_unique_order",
        sql: r#"
            DROP INDEX IF EXISTS idx_phases_sort;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_phases_sort ON phases(sort_order);
            DROP INDEX IF EXISTS idx_milestones_phase;
            CREATE UNIQUE INDEX IF NOT EXISTS idx_milestones_phase
                ON milestones(phase_id, sort_order);
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::info!(version, "Database migrations complete");
    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}
