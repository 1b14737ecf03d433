//! Creator progress: per-milestone records and the derived completion view.

pub mod aggregator;
pub mod model;

pub use aggregator::{MilestoneProgress, ProgressBreakdown, applicable_milestones, compute_breakdown};
pub use model::{Creator, CreatorMilestone, MilestoneStatus, Optionality};
