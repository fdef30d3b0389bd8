//! Logic modules: pure decisions with no I/O.
//!
//! # Modules
//!
//! - `packages`: package set resolution for the base install
//! - `boot_order`: firmware boot-entry prioritization

pub mod boot_order;
pub mod packages;
