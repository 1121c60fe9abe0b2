//! Goal-to-plan pipeline: turns a free-text goal into a validated,
//! dependency-ordered task list via a hosted model, and persists it.

pub mod error;
pub mod gateway;
pub mod plan;

pub use error::PlanError;
