//! Resolved global milestone order and its per-version cache.
//!
//! The global order is `(phase.sort_order, milestone.sort_order, milestone.id)`
//! ascending. It is resolved once per catalog version; admin writes bump the
//! stored version, which makes the next `load` re-resolve.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use super::model::{Milestone, Phase};
use crate::error::CatalogError;
use crate::store::Database;

/// A catalog milestone with its phase context and global position.
#[derive(Debug, Clone)]
pub struct OrderedMilestone {
    pub milestone: Milestone,
    pub phase_name: String,
    pub phase_sort_order: i64,
    /// Zero-based index in the global order.
    pub position: usize,
}

/// The full catalog flattened into global order.
#[derive(Debug, Clone, Default)]
pub struct GlobalOrder {
    version: i64,
    entries: Vec<OrderedMilestone>,
    index: HashMap<String, usize>,
}

impl GlobalOrder {
    /// Flatten phases and milestones into global order.
    ///
    /// Equal `(phase order, sort order)` pairs fall back to milestone id so the
    /// order stays deterministic even on a catalog that skipped validation.
    pub fn resolve(
        version: i64,
        phases: &[Phase],
        milestones: &[Milestone],
    ) -> Result<Self, CatalogError> {
        let phase_by_id: HashMap<&str, &Phase> =
            phases.iter().map(|p| (p.id.as_str(), p)).collect();

        let mut keyed = Vec::with_capacity(milestones.len());
        for m in milestones {
            let phase = phase_by_id.get(m.phase_id.as_str()).ok_or_else(|| {
                CatalogError::UnknownPhase {
                    milestone_id: m.id.clone(),
                    phase_id: m.phase_id.clone(),
                }
            })?;
            keyed.push((phase.sort_order, phase.name.clone(), m.clone()));
        }
        keyed.sort_by(|a, b| {
            (a.0, a.2.sort_order, a.2.id.as_str()).cmp(&(b.0, b.2.sort_order, b.2.id.as_str()))
        });

        let mut entries = Vec::with_capacity(keyed.len());
        let mut index = HashMap::with_capacity(keyed.len());
        for (position, (phase_sort_order, phase_name, milestone)) in keyed.into_iter().enumerate() {
            index.insert(milestone.id.clone(), position);
            entries.push(OrderedMilestone {
                milestone,
                phase_name,
                phase_sort_order,
                position,
            });
        }

        Ok(Self {
            version,
            entries,
            index,
        })
    }

    /// Catalog version this order was resolved from.
    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn entries(&self) -> &[OrderedMilestone] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn position(&self, milestone_id: &str) -> Option<usize> {
        self.index.get(milestone_id).copied()
    }

    pub fn get(&self, milestone_id: &str) -> Option<&OrderedMilestone> {
        self.position(milestone_id).map(|i| &self.entries[i])
    }
}

/// Check catalog integrity before an admin write is accepted.
///
/// Rejects milestones pointing at unknown phases, duplicate phase sort
/// orders, and duplicate `(phase_id, sort_order)` pairs.
pub fn validate_catalog(phases: &[Phase], milestones: &[Milestone]) -> Result<(), CatalogError> {
    let mut phase_orders: HashMap<i64, &str> = HashMap::new();
    for phase in phases {
        if phase.id.trim().is_empty() {
            return Err(CatalogError::Invalid {
                id: phase.id.clone(),
                reason: "phase id must not be empty".into(),
            });
        }
        if let Some(existing) = phase_orders.insert(phase.sort_order, &phase.id) {
            if existing != phase.id {
                return Err(CatalogError::DuplicatePhaseOrder {
                    sort_order: phase.sort_order,
                    existing: existing.to_string(),
                });
            }
        }
    }

    let mut slots: HashMap<(&str, i64), &str> = HashMap::new();
    for m in milestones {
        if m.id.trim().is_empty() {
            return Err(CatalogError::Invalid {
                id: m.id.clone(),
                reason: "milestone id must not be empty".into(),
            });
        }
        if !phases.iter().any(|p| p.id == m.phase_id) {
            return Err(CatalogError::UnknownPhase {
                milestone_id: m.id.clone(),
                phase_id: m.phase_id.clone(),
            });
        }
        if let Some(existing) = slots.insert((m.phase_id.as_str(), m.sort_order), &m.id) {
            if existing != m.id {
                return Err(CatalogError::DuplicateSortOrder {
                    phase_id: m.phase_id.clone(),
                    sort_order: m.sort_order,
                    existing: existing.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Caches the resolved order, keyed by the stored catalog version.
#[derive(Default)]
pub struct CatalogCache {
    cached: RwLock<Option<Arc<GlobalOrder>>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the resolved order for the current catalog version, resolving
    /// it again if the stored version moved.
    pub async fn load(&self, db: &dyn Database) -> Result<Arc<GlobalOrder>, CatalogError> {
        let version = db.catalog_version().await?;
        {
            let cached = self.cached.read().await;
            if let Some(order) = cached.as_ref() {
                if order.version() == version {
                    return Ok(Arc::clone(order));
                }
            }
        }

        let phases = db.list_phases().await?;
        let milestones = db.list_milestones().await?;
        let order = Arc::new(GlobalOrder::resolve(version, &phases, &milestones)?);
        debug!(
            version,
            milestones = order.len(),
            "Resolved catalog global order"
        );

        let mut cached = self.cached.write().await;
        *cached = Some(Arc::clone(&order));
        Ok(order)
    }

    /// Drop the cached order.
    pub async fn invalidate(&self) {
        self.cached.write().await.take();
    }
}
