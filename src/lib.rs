//! Plotcraft - sandboxed voxel build scripts for a shared game world

pub mod core;
pub mod math;
pub mod voxel;
pub mod script;
pub mod compile;
pub mod structure;
pub mod plot;
pub mod build;
