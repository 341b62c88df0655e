//! Long-running services

pub mod harvest;

pub use harvest::{CycleReport, HarvestHandle, HarvestService};
