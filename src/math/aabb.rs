//! Integer axis-aligned box

use glam::IVec3;

/// Inclusive axis-aligned box of voxel coordinates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockBox {
    pub min: IVec3,
    pub max: IVec3,
}

impl BlockBox {
    /// Create from two corners in any order
    pub fn new(a: IVec3, b: IVec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Single-voxel box
    pub fn point(p: IVec3) -> Self {
        Self { min: p, max: p }
    }

    /// Number of voxels along each axis
    pub fn size(&self) -> IVec3 {
        self.max - self.min + IVec3::ONE
    }

    /// Voxel count, saturating on overflow
    pub fn volume(&self) -> u64 {
        let s = self.size();
        (s.x as u64).saturating_mul(s.y as u64).saturating_mul(s.z as u64)
    }

    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    /// Check if voxel is inside box
    pub fn contains(&self, p: IVec3) -> bool {
        p.x >= self.min.x && p.x <= self.max.x &&
        p.y >= self.min.y && p.y <= self.max.y &&
        p.z >= self.min.z && p.z <= self.max.z
    }

    /// Check if two boxes share at least one voxel
    pub fn intersects(&self, other: &BlockBox) -> bool {
        self.min.x <= other.max.x && self.max.x >= other.min.x &&
        self.min.y <= other.max.y && self.max.y >= other.min.y &&
        self.min.z <= other.max.z && self.max.z >= other.min.z
    }

    /// Shared voxels of two boxes, if any
    pub fn intersection(&self, other: &BlockBox) -> Option<BlockBox> {
        if !self.intersects(other) {
            return None;
        }
        Some(BlockBox {
            min: self.min.max(other.min),
            max: self.max.min(other.max),
        })
    }

    /// Expand box to include voxel
    pub fn expand(&mut self, p: IVec3) {
        self.min = self.min.min(p);
        self.max = self.max.max(p);
    }

    /// Shift by an offset
    pub fn translated(&self, offset: IVec3) -> BlockBox {
        BlockBox {
            min: self.min + offset,
            max: self.max + offset,
        }
    }

    /// Every voxel, ordered by y, then z, then x
    pub fn positions(&self) -> impl Iterator<Item = IVec3> + use<> {
        let (min, max) = (self.min, self.max);
        (min.y..=max.y).flat_map(move |y| {
            (min.z..=max.z).flat_map(move |z| (min.x..=max.x).map(move |x| IVec3::new(x, y, z)))
        })
    }

    /// Whether the voxel lies on the box's outer shell
    pub fn on_shell(&self, p: IVec3) -> bool {
        p.x == self.min.x || p.x == self.max.x ||
        p.y == self.min.y || p.y == self.max.y ||
        p.z == self.min.z || p.z == self.max.z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_normalizes_corners() {
        let b = BlockBox::new(IVec3::new(3, -1, 5), IVec3::new(0, 2, 1));
        assert_eq!(b.min, IVec3::new(0, -1, 1));
        assert_eq!(b.max, IVec3::new(3, 2, 5));
        assert_eq!(b.size(), IVec3::new(4, 4, 5));
        assert_eq!(b.volume(), 80);
    }

    #[test]
    fn test_contains_and_shell() {
        let b = BlockBox::new(IVec3::ZERO, IVec3::splat(2));
        assert!(b.contains(IVec3::ONE));
        assert!(!b.contains(IVec3::splat(3)));
        assert!(b.on_shell(IVec3::new(0, 1, 1)));
        assert!(!b.on_shell(IVec3::ONE));
    }

    #[test]
    fn test_intersection() {
        let a = BlockBox::new(IVec3::ZERO, IVec3::splat(4));
        let b = BlockBox::new(IVec3::splat(3), IVec3::splat(6));
        let c = BlockBox::new(IVec3::splat(5), IVec3::splat(6));
        assert_eq!(a.intersection(&b), Some(BlockBox::new(IVec3::splat(3), IVec3::splat(4))));
        assert_eq!(a.intersection(&c), None);
    }

    #[test]
    fn test_positions_order() {
        let b = BlockBox::new(IVec3::ZERO, IVec3::new(1, 1, 0));
        let order: Vec<IVec3> = b.positions().collect();
        assert_eq!(
            order,
            vec![
                IVec3::new(0, 0, 0),
                IVec3::new(1, 0, 0),
                IVec3::new(0, 1, 0),
                IVec3::new(1, 1, 0),
            ]
        );
    }

    #[test]
    fn test_positions_outlive_box() {
        let boxes = [BlockBox::point(IVec3::ZERO), BlockBox::new(IVec3::X, IVec3::new(2, 0, 0))];
        let points: Vec<IVec3> = boxes
            .iter()
            .flat_map(|b| b.translated(IVec3::Y).positions())
            .collect();
        assert_eq!(points, vec![IVec3::Y, IVec3::new(1, 1, 0), IVec3::new(2, 1, 0)]);
    }
}
