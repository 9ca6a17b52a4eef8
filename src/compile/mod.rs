//! Region compiler: voxel canvas to world-space fills

pub mod bounds;
pub mod commands;
pub mod region;

pub use bounds::{BuildOrigin, BuildableBounds};
pub use region::{MAX_FILL_VOLUME, Region, compile, compile_group, place, split_oversized};
