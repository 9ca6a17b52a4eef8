//! Voxel canvas, block identifiers and geometry primitives

pub mod block;
pub mod canvas;
pub mod error;
pub mod geometry;

pub use block::{AIR, BlockSpec};
pub use canvas::{FillMode, VoxelCanvas};
pub use error::VoxelError;
pub use geometry::{Axis, Direction};
