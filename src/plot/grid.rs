//! Plot layout of the shared build world
//!
//! Plots are square, separated by a gap, and centred on multiples of the
//! stride. New plots are handed out along a square spiral from (0, 0).

use std::collections::HashSet;
use std::fmt;

use glam::IVec3;
use serde::{Deserialize, Serialize};

use crate::compile::commands::{clear_area_command, fill_command, floor_command};
use crate::compile::{BuildOrigin, BuildableBounds};
use crate::voxel::BlockSpec;

/// Grid coordinates of one plot
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlotId {
    pub x: i32,
    pub z: i32,
}

impl PlotId {
    pub fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }
}

impl fmt::Display for PlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.z)
    }
}

/// Plot grid configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PlotGridConfig {
    /// Side length of a plot in blocks
    pub plot_size: i32,
    /// Blocks between neighbouring plots
    pub gap: i32,
    /// Height of the plot floor
    pub ground_y: i32,
    /// How far above the floor a rebuild clears
    pub clear_height: i32,
    /// Block paved around each plot
    pub border_block: String,
    /// Block the plot floor is reset to
    pub floor_block: String,
}

impl Default for PlotGridConfig {
    fn default() -> Self {
        Self {
            plot_size: 64,
            gap: 8,
            ground_y: -60,
            clear_height: 120,
            border_block: "minecraft:stone_bricks".to_string(),
            floor_block: "minecraft:grass_block".to_string(),
        }
    }
}

/// Plot geometry and preparation commands
#[derive(Clone, Debug)]
pub struct PlotGrid {
    config: PlotGridConfig,
    border: BlockSpec,
    floor: BlockSpec,
}

impl PlotGrid {
    /// Fails when a configured block name is not a valid block
    pub fn new(config: PlotGridConfig) -> Result<Self, crate::voxel::VoxelError> {
        let border = BlockSpec::parse(&config.border_block)?;
        let floor = BlockSpec::parse(&config.floor_block)?;
        Ok(Self { config, border, floor })
    }

    pub fn config(&self) -> &PlotGridConfig {
        &self.config
    }

    /// Distance between the centres of neighbouring plots
    pub fn stride(&self) -> i32 {
        self.config.plot_size + self.config.gap
    }

    /// Inclusive world footprint of a plot
    pub fn plot_bounds(&self, id: PlotId) -> BuildableBounds {
        let half = self.config.plot_size / 2;
        let x1 = id.x * self.stride() - half;
        let z1 = id.z * self.stride() - half;
        BuildableBounds::new(
            x1,
            z1,
            x1 + self.config.plot_size - 1,
            z1 + self.config.plot_size - 1,
        )
    }

    /// World point script coordinate (0, 0, 0) maps to: plot centre at
    /// floor height
    pub fn origin(&self, id: PlotId) -> BuildOrigin {
        let b = self.plot_bounds(id);
        BuildOrigin::new(
            (b.x1 + b.x2 + 1).div_euclid(2),
            self.config.ground_y,
            (b.z1 + b.z2 + 1).div_euclid(2),
        )
    }

    /// Plot containing a world position, `None` in the gaps
    pub fn plot_at(&self, x: i32, z: i32) -> Option<PlotId> {
        let stride = self.stride();
        let half = self.config.plot_size / 2;
        let id = PlotId::new(
            (x + half).div_euclid(stride),
            (z + half).div_euclid(stride),
        );
        self.plot_bounds(id).contains_xz(x, z).then_some(id)
    }

    /// First plot along the spiral not in `taken`
    pub fn next_free(&self, taken: &HashSet<PlotId>) -> PlotId {
        spiral()
            .find(|id| !taken.contains(id))
            .unwrap_or_default()
    }

    /// Wipe everything above the floor and reset the floor
    pub fn clear_commands(&self, id: PlotId) -> Vec<String> {
        let bounds = self.plot_bounds(id);
        let y = self.config.ground_y;
        vec![
            clear_area_command(&bounds, y + 1, y + self.config.clear_height),
            floor_command(&bounds, y, &self.floor),
        ]
    }

    /// Border paving across the surrounding gap, then the plot floor
    pub fn decoration_commands(&self, id: PlotId) -> Vec<String> {
        let b = self.plot_bounds(id);
        let y = self.config.ground_y;
        let gap = self.config.gap;
        vec![
            fill_command(
                IVec3::new(b.x1 - gap, y, b.z1 - gap),
                IVec3::new(b.x2 + gap, y, b.z2 + gap),
                &self.border,
            ),
            floor_command(&b, y, &self.floor),
        ]
    }

    /// Everything issued before a build is placed
    pub fn prep_commands(&self, id: PlotId) -> Vec<String> {
        let mut commands = self.clear_commands(id);
        commands.extend(self.decoration_commands(id));
        commands
    }
}

/// Endless square spiral of plot ids starting at (0, 0)
pub fn spiral() -> impl Iterator<Item = PlotId> {
    std::iter::once(PlotId::new(0, 0)).chain((1..).flat_map(ring))
}

fn ring(layer: i32) -> impl Iterator<Item = PlotId> {
    let east = (-(layer - 1)..=layer).map(move |z| PlotId::new(layer, z));
    let south = (-layer..layer).rev().map(move |x| PlotId::new(x, layer));
    let west = (-layer..layer).rev().map(move |z| PlotId::new(-layer, z));
    let north = (-layer + 1..=layer).map(move |x| PlotId::new(x, -layer));
    east.chain(south).chain(west).chain(north)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid() -> PlotGrid {
        PlotGrid::new(PlotGridConfig::default()).unwrap()
    }

    #[test]
    fn test_spiral_order() {
        let first: Vec<PlotId> = spiral().take(10).collect();
        assert_eq!(
            first,
            vec![
                PlotId::new(0, 0),
                PlotId::new(1, 0),
                PlotId::new(1, 1),
                PlotId::new(0, 1),
                PlotId::new(-1, 1),
                PlotId::new(-1, 0),
                PlotId::new(-1, -1),
                PlotId::new(0, -1),
                PlotId::new(1, -1),
                PlotId::new(2, -1),
            ]
        );
    }

    #[test]
    fn test_spiral_visits_each_ring_once() {
        let ids: Vec<PlotId> = spiral().take(1 + 8 + 16 + 24).collect();
        let unique: HashSet<PlotId> = ids.iter().copied().collect();
        assert_eq!(unique.len(), ids.len());
        assert!(ids.iter().all(|id| id.x.abs() <= 3 && id.z.abs() <= 3));
    }

    #[test]
    fn test_next_free_skips_taken() {
        let taken: HashSet<PlotId> = [PlotId::new(0, 0), PlotId::new(1, 0)].into_iter().collect();
        assert_eq!(grid().next_free(&taken), PlotId::new(1, 1));
        assert_eq!(grid().next_free(&HashSet::new()), PlotId::new(0, 0));
    }

    #[test]
    fn test_bounds_and_origin() {
        let grid = grid();
        let b = grid.plot_bounds(PlotId::new(1, -1));
        assert_eq!((b.x1, b.z1, b.x2, b.z2), (40, -104, 103, -41));
        assert_eq!(b.width(), 64);
        assert_eq!(grid.origin(PlotId::new(1, -1)), BuildOrigin::new(72, -60, -72));
        assert_eq!(grid.origin(PlotId::new(0, 0)), BuildOrigin::new(0, -60, 0));
    }

    #[test]
    fn test_plot_at() {
        let grid = grid();
        assert_eq!(grid.plot_at(0, 0), Some(PlotId::new(0, 0)));
        assert_eq!(grid.plot_at(-32, 31), Some(PlotId::new(0, 0)));
        assert_eq!(grid.plot_at(35, 0), None);
        assert_eq!(grid.plot_at(40, 0), Some(PlotId::new(1, 0)));
        assert_eq!(grid.plot_at(-41, 0), Some(PlotId::new(-1, 0)));
    }

    #[test]
    fn test_prep_commands() {
        let commands = grid().prep_commands(PlotId::new(0, 0));
        assert_eq!(
            commands,
            vec![
                "/fill -32 -59 -32 31 60 31 minecraft:air",
                "/fill -32 -60 -32 31 -60 31 minecraft:grass_block",
                "/fill -40 -60 -40 39 -60 39 minecraft:stone_bricks",
                "/fill -32 -60 -32 31 -60 31 minecraft:grass_block",
            ]
        );
    }

    #[test]
    fn test_bad_block_config() {
        let config = PlotGridConfig {
            border_block: "stone bricks".to_string(),
            ..PlotGridConfig::default()
        };
        assert!(PlotGrid::new(config).is_err());
    }
}
