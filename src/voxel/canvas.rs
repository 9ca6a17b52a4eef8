//! Sparse voxel accumulator written by build scripts

use std::collections::HashMap;
use std::str::FromStr;

use glam::IVec3;

use super::block::BlockSpec;
use super::error::VoxelError;
use crate::compile::BuildableBounds;
use crate::core::config::BuildLimits;
use crate::math::{BlockBox, COORD_LIMIT, pack_coord, unpack_coord};

/// How [`VoxelCanvas::fill_box`] treats the box interior
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FillMode {
    /// Every voxel gets the block
    #[default]
    Replace,
    /// Shell gets the block, interior becomes air
    Hollow,
    /// Shell only, interior untouched
    Outline,
}

impl FromStr for FillMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replace" => Ok(Self::Replace),
            "hollow" => Ok(Self::Hollow),
            "outline" => Ok(Self::Outline),
            other => Err(format!("unknown fill mode '{}'", other)),
        }
    }
}

/// Mapping from voxel coordinate to block, bounded by [`BuildLimits`].
///
/// Keys are packed coordinates, values index an interned block table so a
/// half-million identical voxels share one `BlockSpec`.
#[derive(Clone, Debug)]
pub struct VoxelCanvas {
    limits: BuildLimits,
    voxels: HashMap<u64, u32>,
    blocks: Vec<BlockSpec>,
    block_ids: HashMap<BlockSpec, u32>,
    writes: usize,
}

impl VoxelCanvas {
    pub fn new(limits: BuildLimits) -> Self {
        Self {
            limits,
            voxels: HashMap::new(),
            blocks: Vec::new(),
            block_ids: HashMap::new(),
            writes: 0,
        }
    }

    pub fn limits(&self) -> &BuildLimits {
        &self.limits
    }

    /// Write one voxel.
    ///
    /// Fails without writing when the coordinate is out of range or the
    /// write would push the running total past `max_blocks`.
    pub fn set_voxel(&mut self, pos: IVec3, block: &BlockSpec) -> Result<(), VoxelError> {
        let id = self.intern(block);
        self.set_id(pos, id)
    }

    /// Write the same block at many positions, stopping at the first error.
    pub fn set_many<I>(&mut self, positions: I, block: &BlockSpec) -> Result<(), VoxelError>
    where
        I: IntoIterator<Item = IVec3>,
    {
        let id = self.intern(block);
        for pos in positions {
            self.set_id(pos, id)?;
        }
        Ok(())
    }

    /// Fill the box spanned by two corners in any order.
    pub fn fill_box(
        &mut self,
        a: IVec3,
        b: IVec3,
        block: &BlockSpec,
        mode: FillMode,
    ) -> Result<(), VoxelError> {
        check_coord(a)?;
        check_coord(b)?;
        let bounds = BlockBox::new(a, b);
        let size = bounds.size();
        check_extent("fill width", size.x, &self.limits)?;
        check_extent("fill height", size.y, &self.limits)?;
        check_extent("fill depth", size.z, &self.limits)?;

        let id = self.intern(block);
        let air = match mode {
            FillMode::Hollow => Some(self.intern(&BlockSpec::air())),
            _ => None,
        };

        for pos in bounds.positions() {
            if bounds.on_shell(pos) {
                self.set_id(pos, id)?;
            } else {
                match mode {
                    FillMode::Replace => self.set_id(pos, id)?,
                    FillMode::Hollow => self.set_id(pos, air.unwrap_or(id))?,
                    FillMode::Outline => {}
                }
            }
        }
        Ok(())
    }

    /// Swap every `target` voxel inside the box for `block`.
    ///
    /// Only voxels this canvas already holds can match; the world behind
    /// the build is unknown here.
    pub fn replace_in_box(
        &mut self,
        a: IVec3,
        b: IVec3,
        block: &BlockSpec,
        target: &BlockSpec,
    ) -> Result<(), VoxelError> {
        check_coord(a)?;
        check_coord(b)?;
        let bounds = BlockBox::new(a, b);
        let size = bounds.size();
        check_extent("fill width", size.x, &self.limits)?;
        check_extent("fill height", size.y, &self.limits)?;
        check_extent("fill depth", size.z, &self.limits)?;

        let Some(&target_id) = self.block_ids.get(target) else {
            return Ok(());
        };
        let mut matches: Vec<u64> = self
            .voxels
            .iter()
            .filter(|&(&key, &id)| id == target_id && bounds.contains(unpack_coord(key)))
            .map(|(&key, _)| key)
            .collect();
        matches.sort_unstable();

        let id = self.intern(block);
        for key in matches {
            self.set_id(unpack_coord(key), id)?;
        }
        Ok(())
    }

    pub fn get(&self, pos: IVec3) -> Option<&BlockSpec> {
        if !crate::math::packed::in_range(pos) {
            return None;
        }
        self.voxels
            .get(&pack_coord(pos))
            .map(|&id| &self.blocks[id as usize])
    }

    /// Distinct voxels currently set
    pub fn count(&self) -> usize {
        self.voxels.len()
    }

    /// Running total of writes, including overwrites
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn is_empty(&self) -> bool {
        self.voxels.is_empty()
    }

    /// All voxels in arbitrary order
    pub fn iter(&self) -> impl Iterator<Item = (IVec3, &BlockSpec)> + '_ {
        self.voxels
            .iter()
            .map(|(&key, &id)| (unpack_coord(key), &self.blocks[id as usize]))
    }

    /// Box covering every non-air voxel
    pub fn non_air_bounds(&self) -> Option<BlockBox> {
        let mut bounds: Option<BlockBox> = None;
        for (pos, block) in self.iter() {
            if block.is_air() {
                continue;
            }
            match bounds.as_mut() {
                Some(b) => b.expand(pos),
                None => bounds = Some(BlockBox::point(pos)),
            }
        }
        bounds
    }

    /// Positions grouped by block, groups ordered by `BlockSpec` and
    /// positions by (y, z, x).
    pub fn block_groups(&self) -> Vec<(BlockSpec, Vec<IVec3>)> {
        let mut grouped: Vec<Vec<IVec3>> = vec![Vec::new(); self.blocks.len()];
        for (&key, &id) in &self.voxels {
            grouped[id as usize].push(unpack_coord(key));
        }

        let mut groups: Vec<(BlockSpec, Vec<IVec3>)> = self
            .blocks
            .iter()
            .cloned()
            .zip(grouped)
            .filter(|(_, positions)| !positions.is_empty())
            .map(|(block, mut positions)| {
                positions.sort_unstable_by_key(|p| (p.y, p.z, p.x));
                (block, positions)
            })
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
    }

    /// Copy holding only voxels whose world x/z (local + `origin`) lie
    /// inside `bounds`. The copy shares this canvas's limits and keeps
    /// local coordinates.
    pub fn clipped(&self, origin: IVec3, bounds: &BuildableBounds) -> VoxelCanvas {
        let mut out = VoxelCanvas::new(self.limits);
        for (&key, &id) in &self.voxels {
            let pos = unpack_coord(key);
            let world = pos + origin;
            if bounds.contains_xz(world.x, world.z) {
                let block = &self.blocks[id as usize];
                let new_id = out.intern(block);
                out.voxels.insert(key, new_id);
            }
        }
        out.writes = out.voxels.len();
        out
    }

    fn intern(&mut self, block: &BlockSpec) -> u32 {
        if let Some(&id) = self.block_ids.get(block) {
            return id;
        }
        let id = self.blocks.len() as u32;
        self.blocks.push(block.clone());
        self.block_ids.insert(block.clone(), id);
        id
    }

    fn set_id(&mut self, pos: IVec3, id: u32) -> Result<(), VoxelError> {
        check_coord(pos)?;
        let attempted = self.writes + 1;
        if attempted > self.limits.max_blocks {
            return Err(VoxelError::BuildLimitExceeded {
                attempted,
                max: self.limits.max_blocks,
            });
        }
        self.writes = attempted;
        self.voxels.insert(pack_coord(pos), id);
        Ok(())
    }
}

impl Default for VoxelCanvas {
    fn default() -> Self {
        Self::new(BuildLimits::default())
    }
}

fn check_coord(pos: IVec3) -> Result<(), VoxelError> {
    for value in pos.to_array() {
        if value.unsigned_abs() > COORD_LIMIT as u32 {
            return Err(VoxelError::BuildBoundsExceeded {
                what: "coordinate",
                value: value as i64,
                max: COORD_LIMIT as i64,
            });
        }
    }
    Ok(())
}

/// Reject a linear extent larger than `max_dimension`.
pub(crate) fn check_extent(what: &'static str, value: i32, limits: &BuildLimits) -> Result<(), VoxelError> {
    if value.unsigned_abs() > limits.max_dimension.unsigned_abs() {
        return Err(VoxelError::BuildBoundsExceeded {
            what,
            value: value as i64,
            max: limits.max_dimension as i64,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stone() -> BlockSpec {
        BlockSpec::parse("stone").unwrap()
    }

    fn small_limits(max_blocks: usize) -> BuildLimits {
        BuildLimits {
            max_blocks,
            ..BuildLimits::default()
        }
    }

    #[test]
    fn test_set_and_get() {
        let mut canvas = VoxelCanvas::default();
        canvas.set_voxel(IVec3::new(1, -2, 3), &stone()).unwrap();

        assert_eq!(canvas.get(IVec3::new(1, -2, 3)), Some(&stone()));
        assert_eq!(canvas.get(IVec3::ZERO), None);
        assert_eq!(canvas.count(), 1);
    }

    #[test]
    fn test_overwrite_counts_as_write() {
        let mut canvas = VoxelCanvas::default();
        let dirt = BlockSpec::parse("dirt").unwrap();
        canvas.set_voxel(IVec3::ZERO, &stone()).unwrap();
        canvas.set_voxel(IVec3::ZERO, &dirt).unwrap();

        assert_eq!(canvas.count(), 1);
        assert_eq!(canvas.writes(), 2);
        assert_eq!(canvas.get(IVec3::ZERO), Some(&dirt));
    }

    #[test]
    fn test_limit_is_never_exceeded() {
        let mut canvas = VoxelCanvas::new(small_limits(10));
        let err = canvas
            .fill_box(IVec3::ZERO, IVec3::new(4, 0, 2), &stone(), FillMode::Replace)
            .unwrap_err();

        assert_eq!(err, VoxelError::BuildLimitExceeded { attempted: 11, max: 10 });
        assert_eq!(canvas.count(), 10);
        assert_eq!(canvas.writes(), 10);
    }

    #[test]
    fn test_fill_normalizes_corners() {
        let mut canvas = VoxelCanvas::default();
        canvas
            .fill_box(IVec3::new(2, 1, 2), IVec3::ZERO, &stone(), FillMode::Replace)
            .unwrap();
        // 3 x 2 x 3
        assert_eq!(canvas.count(), 18);
        assert!(canvas.get(IVec3::new(2, 1, 2)).is_some());
        assert!(canvas.get(IVec3::new(0, 2, 0)).is_none());
    }

    #[test]
    fn test_fill_hollow_sets_air_inside() {
        let mut canvas = VoxelCanvas::default();
        canvas
            .fill_box(IVec3::ZERO, IVec3::splat(2), &stone(), FillMode::Hollow)
            .unwrap();

        assert_eq!(canvas.count(), 27);
        assert!(canvas.get(IVec3::ONE).is_some_and(BlockSpec::is_air));
        assert_eq!(canvas.get(IVec3::ZERO), Some(&stone()));
    }

    #[test]
    fn test_fill_outline_leaves_interior() {
        let mut canvas = VoxelCanvas::default();
        let glass = BlockSpec::parse("glass").unwrap();
        canvas.set_voxel(IVec3::ONE, &glass).unwrap();
        canvas
            .fill_box(IVec3::ZERO, IVec3::splat(2), &stone(), FillMode::Outline)
            .unwrap();

        assert_eq!(canvas.count(), 27);
        assert_eq!(canvas.get(IVec3::ONE), Some(&glass));
    }

    #[test]
    fn test_replace_in_box() {
        let mut canvas = VoxelCanvas::default();
        let dirt = BlockSpec::parse("dirt").unwrap();
        let glass = BlockSpec::parse("glass").unwrap();
        canvas
            .fill_box(IVec3::ZERO, IVec3::new(3, 0, 0), &stone(), FillMode::Replace)
            .unwrap();
        canvas.set_voxel(IVec3::new(1, 0, 0), &dirt).unwrap();

        canvas
            .replace_in_box(IVec3::ZERO, IVec3::new(2, 0, 0), &glass, &stone())
            .unwrap();
        assert_eq!(canvas.get(IVec3::new(0, 0, 0)), Some(&glass));
        assert_eq!(canvas.get(IVec3::new(1, 0, 0)), Some(&dirt));
        assert_eq!(canvas.get(IVec3::new(2, 0, 0)), Some(&glass));
        assert_eq!(canvas.get(IVec3::new(3, 0, 0)), Some(&stone()));
    }

    #[test]
    fn test_fill_rejects_oversized_extent_before_writing() {
        let mut canvas = VoxelCanvas::default();
        let err = canvas
            .fill_box(IVec3::ZERO, IVec3::new(256, 0, 0), &stone(), FillMode::Replace)
            .unwrap_err();

        assert!(matches!(err, VoxelError::BuildBoundsExceeded { what: "fill width", .. }));
        assert!(canvas.is_empty());
    }

    #[test]
    fn test_coordinate_range() {
        let mut canvas = VoxelCanvas::default();
        let far = IVec3::new(COORD_LIMIT + 1, 0, 0);
        assert!(canvas.set_voxel(far, &stone()).is_err());
        assert!(canvas.set_voxel(IVec3::new(-COORD_LIMIT, 0, 0), &stone()).is_ok());
        assert_eq!(canvas.get(far), None);
    }

    #[test]
    fn test_non_air_bounds_ignore_air() {
        let mut canvas = VoxelCanvas::default();
        canvas.set_voxel(IVec3::new(-5, 0, 0), &BlockSpec::air()).unwrap();
        canvas.set_voxel(IVec3::new(1, 2, 3), &stone()).unwrap();
        canvas.set_voxel(IVec3::new(4, 0, -1), &stone()).unwrap();

        let bounds = canvas.non_air_bounds().unwrap();
        assert_eq!(bounds.min, IVec3::new(1, 0, -1));
        assert_eq!(bounds.max, IVec3::new(4, 2, 3));
    }

    #[test]
    fn test_block_groups_sorted() {
        let mut canvas = VoxelCanvas::default();
        let dirt = BlockSpec::parse("dirt").unwrap();
        canvas.set_voxel(IVec3::new(0, 1, 0), &stone()).unwrap();
        canvas.set_voxel(IVec3::new(5, 0, 0), &stone()).unwrap();
        canvas.set_voxel(IVec3::new(0, 0, 0), &dirt).unwrap();

        let groups = canvas.block_groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, dirt);
        assert_eq!(groups[1].1, vec![IVec3::new(5, 0, 0), IVec3::new(0, 1, 0)]);
    }

    #[test]
    fn test_clipped() {
        let mut canvas = VoxelCanvas::default();
        canvas
            .fill_box(IVec3::ZERO, IVec3::new(9, 0, 0), &stone(), FillMode::Replace)
            .unwrap();

        let bounds = BuildableBounds::new(100, 0, 104, 10);
        let clipped = canvas.clipped(IVec3::new(100, 0, 0), &bounds);
        assert_eq!(clipped.count(), 5);
        assert!(clipped.get(IVec3::new(4, 0, 0)).is_some());
        assert!(clipped.get(IVec3::new(5, 0, 0)).is_none());
    }
}
