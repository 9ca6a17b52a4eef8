//! Integer geometry helpers

pub mod aabb;
pub mod packed;

pub use aabb::BlockBox;
pub use packed::{pack_coord, unpack_coord, COORD_LIMIT};
