//! World-space anchor and footprint of one build

use glam::IVec3;
use serde::{Deserialize, Serialize};

use crate::math::BlockBox;

/// World position that local script coordinate (0, 0, 0) maps to
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildOrigin {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BuildOrigin {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn as_ivec3(&self) -> IVec3 {
        IVec3::new(self.x, self.y, self.z)
    }
}

impl From<IVec3> for BuildOrigin {
    fn from(v: IVec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

/// Inclusive x/z rectangle every emitted coordinate must fall inside.
/// Height is unconstrained.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildableBounds {
    pub x1: i32,
    pub z1: i32,
    pub x2: i32,
    pub z2: i32,
}

impl BuildableBounds {
    /// Create from two corners in any order
    pub fn new(x1: i32, z1: i32, x2: i32, z2: i32) -> Self {
        Self {
            x1: x1.min(x2),
            z1: z1.min(z2),
            x2: x1.max(x2),
            z2: z1.max(z2),
        }
    }

    pub fn contains_xz(&self, x: i32, z: i32) -> bool {
        x >= self.x1 && x <= self.x2 && z >= self.z1 && z <= self.z2
    }

    /// Intersect a box with this footprint, keeping its y range.
    /// `None` when the box lies entirely outside.
    pub fn clip(&self, bbox: &BlockBox) -> Option<BlockBox> {
        let column = BlockBox {
            min: IVec3::new(self.x1, bbox.min.y, self.z1),
            max: IVec3::new(self.x2, bbox.max.y, self.z2),
        };
        bbox.intersection(&column)
    }

    pub fn width(&self) -> i32 {
        self.x2 - self.x1 + 1
    }

    pub fn depth(&self) -> i32 {
        self.z2 - self.z1 + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_normalize() {
        let b = BuildableBounds::new(10, 5, 0, -5);
        assert_eq!((b.x1, b.z1, b.x2, b.z2), (0, -5, 10, 5));
        assert_eq!(b.width(), 11);
        assert_eq!(b.depth(), 11);
        assert!(b.contains_xz(10, -5));
        assert!(!b.contains_xz(11, 0));
    }

    #[test]
    fn test_clip_keeps_height() {
        let b = BuildableBounds::new(0, 0, 9, 9);
        let bbox = BlockBox::new(IVec3::new(-5, -60, 2), IVec3::new(4, 100, 20));
        let clipped = b.clip(&bbox).unwrap();
        assert_eq!(clipped.min, IVec3::new(0, -60, 2));
        assert_eq!(clipped.max, IVec3::new(4, 100, 9));

        let outside = BlockBox::new(IVec3::new(20, 0, 0), IVec3::new(30, 0, 0));
        assert!(b.clip(&outside).is_none());
    }
}
