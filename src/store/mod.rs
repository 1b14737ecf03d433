//! Persistence layer: libSQL-backed storage for the catalog and creator progress.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

use std::sync::Arc;

pub use libsql_backend::LibSqlBackend;
pub use traits::{ActivityEntry, Database, ProgressChangeSet};

use crate::catalog::seed;
use crate::config::PipelineConfig;
use crate::error::Result;

/// Validate the configuration, open the database it names and seed the
/// default catalog when enabled.
pub async fn open_store(config: &PipelineConfig) -> Result<Arc<dyn Database>> {
    config.validate()?;
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&config.db_path).await?);
    if config.seed_catalog {
        seed::seed_if_empty(db.as_ref()).await?;
    }
    Ok(db)
}
