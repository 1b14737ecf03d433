//! Catalog: the ordered definition of phases and milestones every creator
//! walks through.

pub mod applicability;
pub mod model;
pub mod order;
pub mod seed;

pub use applicability::is_applicable;
pub use model::{ActionType, ContentPath, Milestone, Phase};
pub use order::{CatalogCache, GlobalOrder, OrderedMilestone, validate_catalog};
