//! Creator Pipeline: milestone progression for creator onboarding.

pub mod api;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod progress;
pub mod store;
