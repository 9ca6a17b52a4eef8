//! Console command text for compiled regions and area preparation
//!
//! Coordinates are world-space. Block text comes from [`BlockSpec`]'s
//! `Display`, whose alphabet is restricted at parse time.

use glam::IVec3;

use super::bounds::BuildableBounds;
use super::region::Region;
use crate::voxel::BlockSpec;

/// `setblock` for one voxel
pub fn setblock_command(pos: IVec3, block: &BlockSpec) -> String {
    format!("/setblock {} {} {} {}", pos.x, pos.y, pos.z, block)
}

/// `fill` between two corners
pub fn fill_command(min: IVec3, max: IVec3, block: &BlockSpec) -> String {
    format!(
        "/fill {} {} {} {} {} {} {}",
        min.x, min.y, min.z, max.x, max.y, max.z, block
    )
}

/// Point placement for single voxels, bulk fill otherwise
pub fn region_command(region: &Region) -> String {
    if region.is_point() {
        setblock_command(region.min, &region.block)
    } else {
        fill_command(region.min, region.max, &region.block)
    }
}

pub fn region_commands(regions: &[Region]) -> Vec<String> {
    regions.iter().map(region_command).collect()
}

/// Replace everything in the footprint between `y1` and `y2` with air
pub fn clear_area_command(bounds: &BuildableBounds, y1: i32, y2: i32) -> String {
    fill_command(
        IVec3::new(bounds.x1, y1, bounds.z1),
        IVec3::new(bounds.x2, y2, bounds.z2),
        &BlockSpec::air(),
    )
}

/// One-block-thick layer over the footprint at height `y`
pub fn floor_command(bounds: &BuildableBounds, y: i32, block: &BlockSpec) -> String {
    fill_command(
        IVec3::new(bounds.x1, y, bounds.z1),
        IVec3::new(bounds.x2, y, bounds.z2),
        block,
    )
}

/// Load a saved structure template at a world position
pub fn place_template_command(template: &str, pos: IVec3) -> String {
    format!("/place template {} {} {} {}", template, pos.x, pos.y, pos.z)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_point_region_is_setblock() {
        let block = BlockSpec::parse("oak_log[axis=x]").unwrap();
        let point = Region::new(IVec3::new(1, -60, 3), IVec3::new(1, -60, 3), block.clone());
        assert_eq!(region_command(&point), "/setblock 1 -60 3 minecraft:oak_log[axis=x]");

        let bulk = Region::new(IVec3::ZERO, IVec3::new(2, 0, 1), block);
        assert_eq!(region_command(&bulk), "/fill 0 0 0 2 0 1 minecraft:oak_log[axis=x]");
    }

    #[test]
    fn test_area_commands() {
        let bounds = BuildableBounds::new(-32, -32, 31, 31);
        assert_eq!(
            clear_area_command(&bounds, -59, 60),
            "/fill -32 -59 -32 31 60 31 minecraft:air"
        );
        let grass = BlockSpec::parse("grass_block").unwrap();
        assert_eq!(
            floor_command(&bounds, -60, &grass),
            "/fill -32 -60 -32 31 -60 31 minecraft:grass_block"
        );
        assert_eq!(
            place_template_command("plotcraft:build_7", IVec3::new(0, -59, 4)),
            "/place template plotcraft:build_7 0 -59 4"
        );
    }
}
