//! Error types for the creator pipeline.

/// Top-level error type for service startup.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A compare-and-set write lost against a concurrent writer.
    #[error("Write conflict: {0}")]
    Conflict(String),
}

/// Catalog administration errors.
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Milestone {milestone_id} references unknown phase {phase_id}")]
    UnknownPhase {
        milestone_id: String,
        phase_id: String,
    },

    #[error("Phase {phase_id} already has a milestone at sort order {sort_order}: {existing}")]
    DuplicateSortOrder {
        phase_id: String,
        sort_order: i64,
        existing: String,
    },

    #[error("Phase sort order {sort_order} is already used by {existing}")]
    DuplicatePhaseOrder { sort_order: i64, existing: String },

    #[error("Invalid catalog entry {id}: {reason}")]
    Invalid { id: String, reason: String },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Progression engine errors.
///
/// Everything except `Database` is a caller-level condition; the HTTP layer
/// maps them to client errors.
#[derive(Debug, thiserror::Error)]
pub enum ProgressionError {
    #[error("Creator {creator_id} has no progress rows; initialize first")]
    NotInitialized { creator_id: String },

    #[error("Milestone {milestone_id} is {status}, cannot {action}")]
    InvalidTransition {
        milestone_id: String,
        status: String,
        action: String,
    },

    #[error("Unknown milestone {milestone_id} for creator {creator_id}")]
    UnknownMilestone {
        creator_id: String,
        milestone_id: String,
    },

    #[error("Unknown creator {creator_id}")]
    UnknownCreator { creator_id: String },

    #[error("Concurrent modification of creator {creator_id}: {reason}")]
    ConcurrentModification { creator_id: String, reason: String },

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Database error: {0}")]
    Database(DatabaseError),
}

impl ProgressionError {
    /// Whether retrying the whole operation is expected to succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrentModification { .. })
    }

    /// Short machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotInitialized { .. } => "not_initialized",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::UnknownMilestone { .. } => "unknown_milestone",
            Self::UnknownCreator { .. } => "unknown_creator",
            Self::ConcurrentModification { .. } => "concurrent_modification",
            Self::Catalog(_) => "catalog",
            Self::Database(_) => "database",
        }
    }
}

impl From<DatabaseError> for ProgressionError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::Conflict(reason) => Self::ConcurrentModification {
                creator_id: String::new(),
                reason,
            },
            other => Self::Database(other),
        }
    }
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
