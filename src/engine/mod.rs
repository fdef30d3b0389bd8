//! Storage engine: partition planning plus format/mount of the result.
//!
//! The planner decides what the disk will look like and applies it; the
//! format module prepares the resulting partitions for the base install.

pub mod format;
pub mod planner;

pub use planner::{Layout, PartitionPlan, PlanRequest};
