//! Greedy merge of voxels into axis-aligned same-block regions
//!
//! Positions of one block are visited in (y, z, x) order. Each unvisited
//! seed grows along +x, then +z while the whole x-run is present, then +y
//! while the whole x*z slab is present. The partition is deterministic but
//! not minimal.

use std::collections::HashSet;

use glam::IVec3;
use rayon::prelude::*;

use super::bounds::BuildableBounds;
use crate::math::{BlockBox, pack_coord};
use crate::voxel::{BlockSpec, VoxelCanvas};

/// Largest volume the server accepts in one fill command
pub const MAX_FILL_VOLUME: u64 = 32_768;

/// Axis-aligned box of one block, corners inclusive
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub min: IVec3,
    pub max: IVec3,
    pub block: BlockSpec,
}

impl Region {
    pub fn new(a: IVec3, b: IVec3, block: BlockSpec) -> Self {
        let bbox = BlockBox::new(a, b);
        Self {
            min: bbox.min,
            max: bbox.max,
            block,
        }
    }

    pub fn bbox(&self) -> BlockBox {
        BlockBox {
            min: self.min,
            max: self.max,
        }
    }

    /// Single voxel; emitted as a point placement
    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    pub fn volume(&self) -> u64 {
        self.bbox().volume()
    }

    pub fn translated(&self, offset: IVec3) -> Region {
        Region {
            min: self.min + offset,
            max: self.max + offset,
            block: self.block.clone(),
        }
    }

    /// Cut into y-slabs (then z-rows, then x-runs if still needed) no larger
    /// than `max_volume` voxels each.
    pub fn split(&self, max_volume: u64) -> Vec<Region> {
        let max_volume = max_volume.max(1);
        if self.volume() <= max_volume {
            return vec![self.clone()];
        }

        let size = self.bbox().size();
        let layer = size.x as u64 * size.z as u64;
        let mut out = Vec::new();
        if layer <= max_volume {
            let step = (max_volume / layer) as i32;
            let mut y = self.min.y;
            while y <= self.max.y {
                let y2 = (y + step - 1).min(self.max.y);
                out.push(self.with_y(y, y2));
                y = y2 + 1;
            }
        } else {
            for y in self.min.y..=self.max.y {
                let slab = self.with_y(y, y);
                let row = size.x as u64;
                if row <= max_volume {
                    let step = (max_volume / row) as i32;
                    let mut z = slab.min.z;
                    while z <= slab.max.z {
                        let z2 = (z + step - 1).min(slab.max.z);
                        out.push(Region {
                            min: IVec3::new(slab.min.x, y, z),
                            max: IVec3::new(slab.max.x, y, z2),
                            block: self.block.clone(),
                        });
                        z = z2 + 1;
                    }
                } else {
                    let step = max_volume as i32;
                    for z in slab.min.z..=slab.max.z {
                        let mut x = slab.min.x;
                        while x <= slab.max.x {
                            let x2 = (x + step - 1).min(slab.max.x);
                            out.push(Region {
                                min: IVec3::new(x, y, z),
                                max: IVec3::new(x2, y, z),
                                block: self.block.clone(),
                            });
                            x = x2 + 1;
                        }
                    }
                }
            }
        }
        out
    }

    fn with_y(&self, y1: i32, y2: i32) -> Region {
        Region {
            min: IVec3::new(self.min.x, y1, self.min.z),
            max: IVec3::new(self.max.x, y2, self.max.z),
            block: self.block.clone(),
        }
    }
}

/// Compile a whole canvas. Block groups run in parallel; output keeps the
/// canvas's block order.
pub fn compile(canvas: &VoxelCanvas) -> Vec<Region> {
    let groups = canvas.block_groups();
    let start = std::time::Instant::now();

    let regions: Vec<Region> = groups
        .par_iter()
        .map(|(block, positions)| compile_group(block, positions))
        .collect::<Vec<_>>()
        .into_iter()
        .flatten()
        .collect();

    log::debug!(
        "Compiled {} voxels in {} groups into {} regions in {:.1}ms",
        canvas.count(),
        groups.len(),
        regions.len(),
        start.elapsed().as_secs_f64() * 1000.0
    );
    regions
}

/// Greedy extraction for the positions of one block.
pub fn compile_group(block: &BlockSpec, positions: &[IVec3]) -> Vec<Region> {
    let mut seeds = positions.to_vec();
    seeds.sort_unstable_by_key(|p| (p.y, p.z, p.x));
    seeds.dedup();

    let present: HashSet<u64> = seeds.iter().map(|&p| pack_coord(p)).collect();
    let mut visited: HashSet<u64> = HashSet::with_capacity(seeds.len());
    let free = |p: IVec3, visited: &HashSet<u64>| {
        let key = pack_coord(p);
        present.contains(&key) && !visited.contains(&key)
    };

    let mut regions = Vec::new();
    for &seed in &seeds {
        if visited.contains(&pack_coord(seed)) {
            continue;
        }

        let mut max = seed;
        while free(IVec3::new(max.x + 1, seed.y, seed.z), &visited) {
            max.x += 1;
        }
        while (seed.x..=max.x).all(|x| free(IVec3::new(x, seed.y, max.z + 1), &visited)) {
            max.z += 1;
        }
        while (seed.z..=max.z)
            .all(|z| (seed.x..=max.x).all(|x| free(IVec3::new(x, max.y + 1, z), &visited)))
        {
            max.y += 1;
        }

        let region = Region::new(seed, max, block.clone());
        for p in region.bbox().positions() {
            visited.insert(pack_coord(p));
        }
        regions.push(region);
    }
    regions
}

/// Translate regions into world space, drop those outside `bounds` and
/// truncate the rest to the footprint.
pub fn place(regions: &[Region], offset: IVec3, bounds: Option<&BuildableBounds>) -> Vec<Region> {
    regions
        .iter()
        .filter_map(|region| {
            let moved = region.translated(offset);
            match bounds {
                None => Some(moved),
                Some(bounds) => bounds.clip(&moved.bbox()).map(|bbox| Region {
                    min: bbox.min,
                    max: bbox.max,
                    block: moved.block,
                }),
            }
        })
        .collect()
}

/// Split every region over [`MAX_FILL_VOLUME`]
pub fn split_oversized(regions: Vec<Region>) -> Vec<Region> {
    regions
        .into_iter()
        .flat_map(|r| r.split(MAX_FILL_VOLUME))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voxel::FillMode;
    use crate::voxel::geometry;
    use std::collections::HashMap;

    fn block(name: &str) -> BlockSpec {
        BlockSpec::parse(name).unwrap()
    }

    /// Replay regions as fills and check coverage and non-overlap
    fn assert_exact_cover(canvas: &VoxelCanvas, regions: &[Region]) {
        let mut replay: HashMap<IVec3, &BlockSpec> = HashMap::new();
        for region in regions {
            for p in region.bbox().positions() {
                assert!(replay.insert(p, &region.block).is_none(), "overlap at {:?}", p);
            }
        }
        assert_eq!(replay.len(), canvas.count());
        for (pos, block) in canvas.iter() {
            assert_eq!(replay.get(&pos), Some(&block), "mismatch at {:?}", pos);
        }
    }

    #[test]
    fn test_two_adjacent_voxels_merge() {
        let mut canvas = VoxelCanvas::default();
        let stone = block("stone");
        canvas.fill_box(IVec3::ZERO, IVec3::ZERO, &stone, FillMode::Replace).unwrap();
        canvas
            .fill_box(IVec3::new(1, 0, 0), IVec3::new(1, 0, 0), &stone, FillMode::Replace)
            .unwrap();

        let regions = compile(&canvas);
        assert_eq!(regions, vec![Region::new(IVec3::ZERO, IVec3::new(1, 0, 0), stone)]);
    }

    #[test]
    fn test_solid_box_is_one_region() {
        let mut canvas = VoxelCanvas::default();
        canvas
            .fill_box(IVec3::ZERO, IVec3::new(4, 3, 2), &block("stone"), FillMode::Replace)
            .unwrap();

        let regions = compile(&canvas);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].max, IVec3::new(4, 3, 2));
    }

    #[test]
    fn test_shapes_cover_exactly() {
        let mut canvas = VoxelCanvas::default();
        geometry::sphere(&mut canvas, IVec3::ZERO, 6, &block("glass"), true).unwrap();
        geometry::cylinder(&mut canvas, IVec3::new(20, 0, 0), 4, 7, &block("stone"), false, geometry::Axis::Y)
            .unwrap();
        geometry::pyramid(&mut canvas, IVec3::new(0, 0, 20), 9, &block("sandstone"), true).unwrap();
        canvas
            .fill_box(IVec3::new(-10, 0, -10), IVec3::new(-4, 4, -4), &block("oak_planks"), FillMode::Hollow)
            .unwrap();

        let regions = compile(&canvas);
        assert_exact_cover(&canvas, &regions);
        assert!(regions.len() < canvas.count());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let mut canvas = VoxelCanvas::default();
        geometry::dome(&mut canvas, IVec3::ZERO, 8, &block("stone"), false).unwrap();
        geometry::spiral(&mut canvas, IVec3::ZERO, 10, 12, &block("gold_block"), 2.0).unwrap();

        assert_eq!(compile(&canvas), compile(&canvas));
    }

    #[test]
    fn test_place_translates_and_clips() {
        let regions = vec![
            Region::new(IVec3::ZERO, IVec3::new(9, 2, 0), block("stone")),
            Region::new(IVec3::new(50, 0, 0), IVec3::new(55, 0, 0), block("dirt")),
        ];
        let bounds = BuildableBounds::new(100, -5, 104, 5);

        let placed = place(&regions, IVec3::new(100, -60, 0), Some(&bounds));
        assert_eq!(placed.len(), 1);
        assert_eq!(placed[0].min, IVec3::new(100, -60, 0));
        assert_eq!(placed[0].max, IVec3::new(104, -58, 0));

        let unclipped = place(&regions, IVec3::new(100, -60, 0), None);
        assert_eq!(unclipped.len(), 2);
    }

    #[test]
    fn test_split_respects_volume() {
        let region = Region::new(IVec3::ZERO, IVec3::new(99, 9, 99), block("stone"));
        let parts = region.split(MAX_FILL_VOLUME);

        assert!(parts.iter().all(|p| p.volume() <= MAX_FILL_VOLUME));
        assert_eq!(parts.iter().map(Region::volume).sum::<u64>(), region.volume());

        let wide = Region::new(IVec3::ZERO, IVec3::new(255, 1, 255), block("stone"));
        let parts = wide.split(MAX_FILL_VOLUME);
        assert!(parts.iter().all(|p| p.volume() <= MAX_FILL_VOLUME));
        assert_eq!(parts.iter().map(Region::volume).sum::<u64>(), wide.volume());
    }
}
