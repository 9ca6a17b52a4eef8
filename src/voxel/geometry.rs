//! Geometry primitives
//!
//! `*_points` functions are pure point-set generators. The functions without
//! the suffix validate their size arguments against [`BuildLimits`] and then
//! write the points into a [`VoxelCanvas`]; a rejected call writes nothing.

use std::str::FromStr;

use glam::{I64Vec3, IVec3};

use super::block::BlockSpec;
use super::canvas::{FillMode, VoxelCanvas, check_extent};
use super::error::VoxelError;
use crate::core::config::BuildLimits;
use crate::math::COORD_LIMIT;

/// Axis a round primitive is built around
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Axis {
    X,
    #[default]
    Y,
    Z,
}

impl FromStr for Axis {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "x" => Ok(Self::X),
            "y" => Ok(Self::Y),
            "z" => Ok(Self::Z),
            other => Err(format!("unknown axis '{}'", other)),
        }
    }
}

/// Horizontal direction a staircase climbs towards
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    North,
    South,
    East,
    West,
}

impl Direction {
    /// Unit step in x/z
    pub fn step(self) -> IVec3 {
        match self {
            Direction::North => IVec3::new(0, 0, -1),
            Direction::South => IVec3::new(0, 0, 1),
            Direction::East => IVec3::new(1, 0, 0),
            Direction::West => IVec3::new(-1, 0, 0),
        }
    }

    /// Value of the `facing` block property
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::North => "north",
            Direction::South => "south",
            Direction::East => "east",
            Direction::West => "west",
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "north" => Ok(Self::North),
            "south" => Ok(Self::South),
            "east" => Ok(Self::East),
            "west" => Ok(Self::West),
            other => Err(format!("unknown direction '{}'", other)),
        }
    }
}

/// Widest angular span an arc may cover, in degrees
pub const MAX_ARC_SPAN: i32 = 360;

/// Spiral samples per block of height
pub const SPIRAL_STEPS_PER_BLOCK: i32 = 16;

// ---------------------------------------------------------------------------
// Limit checks
// ---------------------------------------------------------------------------

fn check_radius(radius: i32, limits: &BuildLimits) -> Result<(), VoxelError> {
    if radius.unsigned_abs() > limits.max_radius.unsigned_abs() {
        return Err(VoxelError::BuildBoundsExceeded {
            what: "radius",
            value: radius as i64,
            max: limits.max_radius as i64,
        });
    }
    Ok(())
}

fn check_line(a: IVec3, b: IVec3, limits: &BuildLimits) -> Result<(), VoxelError> {
    let d = (b.as_i64vec3() - a.as_i64vec3()).abs();
    let longest = d.x.max(d.y).max(d.z);
    if longest > limits.max_dimension as i64 {
        return Err(VoxelError::BuildBoundsExceeded {
            what: "line length",
            value: longest,
            max: limits.max_dimension as i64,
        });
    }
    Ok(())
}

fn check_point(pos: I64Vec3) -> Result<(), VoxelError> {
    for value in pos.to_array() {
        if value.abs() > COORD_LIMIT as i64 {
            return Err(VoxelError::BuildBoundsExceeded {
                what: "coordinate",
                value,
                max: COORD_LIMIT as i64,
            });
        }
    }
    Ok(())
}

/// Every point a shape anchored at `anchor` generates lies within `reach`
/// blocks of it on each axis; reject the shape if that cube leaves the
/// coordinate range.
fn check_reach(anchor: IVec3, reach: i64) -> Result<(), VoxelError> {
    let anchor = anchor.as_i64vec3();
    let reach = I64Vec3::splat(reach.abs());
    check_point(anchor - reach)?;
    check_point(anchor + reach)
}

// ---------------------------------------------------------------------------
// Point generators
// ---------------------------------------------------------------------------

/// Round a sample to the nearest voxel, ties away from zero
fn round_sample(x: f64, y: f64, z: f64) -> IVec3 {
    IVec3::new(x.round() as i32, y.round() as i32, z.round() as i32)
}

/// Whether squared distance `d2` is inside a ball (or its one-voxel shell)
/// of radius `r`: solid is `dist <= r`, hollow is `r - 1 < dist <= r`.
fn in_round_shape(d2: i64, r: i64, hollow: bool) -> bool {
    if d2 > r * r {
        return false;
    }
    if !hollow {
        return true;
    }
    let inner = r - 1;
    inner < 0 || d2 > inner * inner
}

/// Straight line with `max(|dx|,|dy|,|dz|,1)` interpolation steps
pub fn line_points(a: IVec3, b: IVec3) -> Vec<IVec3> {
    let d = b - a;
    let steps = d.x.abs().max(d.y.abs()).max(d.z.abs()).max(1);
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            round_sample(
                a.x as f64 + d.x as f64 * t,
                a.y as f64 + d.y as f64 * t,
                a.z as f64 + d.z as f64 * t,
            )
        })
        .collect()
}

fn ring_point(center: IVec3, radius: f64, degrees: i32, axis: Axis) -> IVec3 {
    let rad = (degrees as f64).to_radians();
    let (c, s) = (radius * rad.cos(), radius * rad.sin());
    let (cx, cy, cz) = (center.x as f64, center.y as f64, center.z as f64);
    match axis {
        Axis::Y => round_sample(cx + c, cy, cz + s),
        Axis::X => round_sample(cx, cy + c, cz + s),
        Axis::Z => round_sample(cx + c, cy + s, cz),
    }
}

/// Circle outline sampled at every whole degree
pub fn circle_points(center: IVec3, radius: i32, axis: Axis) -> Vec<IVec3> {
    arc_points(center, radius, 0, 359, axis)
}

/// Arc from `start` to `end` degrees inclusive; empty when `end < start`
pub fn arc_points(center: IVec3, radius: i32, start: i32, end: i32, axis: Axis) -> Vec<IVec3> {
    (start..=end)
        .map(|deg| ring_point(center, radius as f64, deg, axis))
        .collect()
}

/// Helix rising `height` blocks over `turns` revolutions around +y
pub fn spiral_points(center: IVec3, radius: i32, height: i32, turns: f64) -> Vec<IVec3> {
    let steps = height.max(0) * SPIRAL_STEPS_PER_BLOCK;
    (0..steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            let angle = t * turns * std::f64::consts::TAU;
            round_sample(
                center.x as f64 + radius as f64 * angle.cos(),
                center.y as f64 + t * height as f64,
                center.z as f64 + radius as f64 * angle.sin(),
            )
        })
        .collect()
}

/// Ball (or one-voxel shell) of Euclidean radius `radius`
pub fn sphere_points(center: IVec3, radius: i32, hollow: bool) -> Vec<IVec3> {
    let r = radius as i64;
    let mut points = Vec::new();
    for dx in -radius..=radius {
        for dy in -radius..=radius {
            for dz in -radius..=radius {
                let d2 = (dx as i64).pow(2) + (dy as i64).pow(2) + (dz as i64).pow(2);
                if in_round_shape(d2, r, hollow) {
                    points.push(center + IVec3::new(dx, dy, dz));
                }
            }
        }
    }
    points
}

/// Upper half of a sphere, including the equator layer
pub fn dome_points(center: IVec3, radius: i32, hollow: bool) -> Vec<IVec3> {
    let r = radius as i64;
    let mut points = Vec::new();
    for dx in -radius..=radius {
        for dy in 0..=radius {
            for dz in -radius..=radius {
                let d2 = (dx as i64).pow(2) + (dy as i64).pow(2) + (dz as i64).pow(2);
                if in_round_shape(d2, r, hollow) {
                    points.push(center + IVec3::new(dx, dy, dz));
                }
            }
        }
    }
    points
}

/// Cylinder of `height` layers starting at `base` and growing along +axis
pub fn cylinder_points(base: IVec3, radius: i32, height: i32, hollow: bool, axis: Axis) -> Vec<IVec3> {
    let r = radius as i64;
    let mut points = Vec::new();
    for h in 0..height.max(0) {
        for a in -radius..=radius {
            for b in -radius..=radius {
                let d2 = (a as i64).pow(2) + (b as i64).pow(2);
                if !in_round_shape(d2, r, hollow) {
                    continue;
                }
                let offset = match axis {
                    Axis::Y => IVec3::new(a, h, b),
                    Axis::X => IVec3::new(h, a, b),
                    Axis::Z => IVec3::new(a, b, h),
                };
                points.push(base + offset);
            }
        }
    }
    points
}

/// Stepped pyramid centred on `base` whose bottom layer is `size` wide
pub fn pyramid_points(base: IVec3, size: i32, hollow: bool) -> Vec<IVec3> {
    let half0 = size.max(0) / 2;
    let mut points = Vec::new();
    for layer in 0..=half0 {
        let half = half0 - layer;
        let y = base.y + layer;
        for dx in -half..=half {
            for dz in -half..=half {
                let ring = dx.abs() == half || dz.abs() == half;
                if hollow && layer < half0 && !ring {
                    continue;
                }
                points.push(IVec3::new(base.x + dx, y, base.z + dz));
            }
        }
    }
    points
}

/// One block per step, rising one block each step towards `direction`
pub fn stairs_points(start: IVec3, length: i32, direction: Direction) -> Vec<IVec3> {
    let step = direction.step();
    (0..length.max(0))
        .map(|i| start + step * i + IVec3::new(0, i, 0))
        .collect()
}

// ---------------------------------------------------------------------------
// Canvas writers
// ---------------------------------------------------------------------------

pub fn line(canvas: &mut VoxelCanvas, a: IVec3, b: IVec3, block: &BlockSpec) -> Result<(), VoxelError> {
    check_point(a.as_i64vec3())?;
    check_point(b.as_i64vec3())?;
    check_line(a, b, canvas.limits())?;
    canvas.set_many(line_points(a, b), block)
}

pub fn circle(
    canvas: &mut VoxelCanvas,
    center: IVec3,
    radius: i32,
    block: &BlockSpec,
    axis: Axis,
) -> Result<(), VoxelError> {
    check_radius(radius, canvas.limits())?;
    check_reach(center, radius as i64)?;
    canvas.set_many(circle_points(center, radius, axis), block)
}

pub fn arc(
    canvas: &mut VoxelCanvas,
    center: IVec3,
    radius: i32,
    start: i32,
    end: i32,
    block: &BlockSpec,
    axis: Axis,
) -> Result<(), VoxelError> {
    check_radius(radius, canvas.limits())?;
    let span = end as i64 - start as i64;
    if span > MAX_ARC_SPAN as i64 {
        return Err(VoxelError::BuildBoundsExceeded {
            what: "arc span",
            value: span,
            max: MAX_ARC_SPAN as i64,
        });
    }
    check_reach(center, radius as i64)?;
    canvas.set_many(arc_points(center, radius, start, end, axis), block)
}

pub fn spiral(
    canvas: &mut VoxelCanvas,
    center: IVec3,
    radius: i32,
    height: i32,
    block: &BlockSpec,
    turns: f64,
) -> Result<(), VoxelError> {
    check_radius(radius, canvas.limits())?;
    check_extent("spiral height", height, canvas.limits())?;
    check_reach(center, (radius as i64).abs().max((height as i64).abs()))?;
    canvas.set_many(spiral_points(center, radius, height, turns), block)
}

/// Box with its minimum corner at `corner` and the given size
pub fn box_shape(
    canvas: &mut VoxelCanvas,
    corner: IVec3,
    size: IVec3,
    block: &BlockSpec,
    hollow: bool,
) -> Result<(), VoxelError> {
    check_extent("box width", size.x, canvas.limits())?;
    check_extent("box height", size.y, canvas.limits())?;
    check_extent("box depth", size.z, canvas.limits())?;
    check_point(corner.as_i64vec3())?;
    check_point(corner.as_i64vec3() + size.as_i64vec3() - I64Vec3::ONE)?;
    let far = corner + size - IVec3::ONE;
    let mode = if hollow { FillMode::Hollow } else { FillMode::Replace };
    canvas.fill_box(corner, far, block, mode)
}

pub fn cylinder(
    canvas: &mut VoxelCanvas,
    base: IVec3,
    radius: i32,
    height: i32,
    block: &BlockSpec,
    hollow: bool,
    axis: Axis,
) -> Result<(), VoxelError> {
    check_radius(radius, canvas.limits())?;
    check_extent("cylinder height", height, canvas.limits())?;
    check_reach(base, (radius as i64).abs().max((height as i64).abs()))?;
    canvas.set_many(cylinder_points(base, radius, height, hollow, axis), block)
}

pub fn sphere(
    canvas: &mut VoxelCanvas,
    center: IVec3,
    radius: i32,
    block: &BlockSpec,
    hollow: bool,
) -> Result<(), VoxelError> {
    check_radius(radius, canvas.limits())?;
    check_reach(center, radius as i64)?;
    canvas.set_many(sphere_points(center, radius, hollow), block)
}

pub fn dome(
    canvas: &mut VoxelCanvas,
    center: IVec3,
    radius: i32,
    block: &BlockSpec,
    hollow: bool,
) -> Result<(), VoxelError> {
    check_radius(radius, canvas.limits())?;
    check_reach(center, radius as i64)?;
    canvas.set_many(dome_points(center, radius, hollow), block)
}

pub fn pyramid(
    canvas: &mut VoxelCanvas,
    base: IVec3,
    size: i32,
    block: &BlockSpec,
    hollow: bool,
) -> Result<(), VoxelError> {
    check_extent("pyramid size", size, canvas.limits())?;
    check_reach(base, size as i64)?;
    canvas.set_many(pyramid_points(base, size, hollow), block)
}

/// Staircase of `block` oriented with `facing` set to the climb direction
/// unless the block already carries a facing.
pub fn stairs(
    canvas: &mut VoxelCanvas,
    start: IVec3,
    length: i32,
    block: &BlockSpec,
    direction: Direction,
) -> Result<(), VoxelError> {
    check_extent("stairs length", length, canvas.limits())?;
    check_reach(start, length as i64)?;
    let mut block = block.clone();
    if block.path().ends_with("_stairs") {
        block
            .properties
            .entry("facing".to_string())
            .or_insert_with(|| direction.as_str().to_string());
    }
    canvas.set_many(stairs_points(start, length, direction), &block)
}

/// Vertical or horizontal slab between two corners
pub fn wall(canvas: &mut VoxelCanvas, a: IVec3, b: IVec3, block: &BlockSpec) -> Result<(), VoxelError> {
    canvas.fill_box(a, b, block, FillMode::Replace)
}

/// Flat layer at height `y` between two x/z corners
pub fn floor(
    canvas: &mut VoxelCanvas,
    x1: i32,
    z1: i32,
    x2: i32,
    z2: i32,
    y: i32,
    block: &BlockSpec,
) -> Result<(), VoxelError> {
    canvas.fill_box(IVec3::new(x1, y, z1), IVec3::new(x2, y, z2), block, FillMode::Replace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn stone() -> BlockSpec {
        BlockSpec::parse("stone").unwrap()
    }

    fn set(points: Vec<IVec3>) -> HashSet<IVec3> {
        points.into_iter().collect()
    }

    #[test]
    fn test_hollow_sphere_is_solid_minus_inner() {
        for r in 0..8 {
            let hollow = set(sphere_points(IVec3::ZERO, r, true));
            let solid = set(sphere_points(IVec3::ZERO, r, false));
            let inner = set(sphere_points(IVec3::ZERO, r - 1, false));

            assert!(hollow.is_subset(&solid), "radius {}", r);
            let expected: HashSet<IVec3> = solid.difference(&inner).copied().collect();
            assert_eq!(hollow, expected, "radius {}", r);
        }
    }

    #[test]
    fn test_sphere_boundary() {
        let solid = set(sphere_points(IVec3::ZERO, 2, false));
        assert!(solid.contains(&IVec3::new(2, 0, 0)));
        assert!(!solid.contains(&IVec3::new(2, 1, 0)));
        assert!(solid.contains(&IVec3::new(1, 1, 1)));
        // dist = sqrt(2) > 1, so it belongs to the radius-2 shell
        let hollow = set(sphere_points(IVec3::ZERO, 2, true));
        assert!(hollow.contains(&IVec3::new(1, 1, 0)));
        assert!(!hollow.contains(&IVec3::new(1, 0, 0)));
    }

    #[test]
    fn test_radius_limit() {
        let mut canvas = VoxelCanvas::default();
        sphere(&mut canvas, IVec3::ZERO, 50, &stone(), true).unwrap();
        assert!(canvas.count() > 0);

        let mut canvas = VoxelCanvas::default();
        let err = sphere(&mut canvas, IVec3::ZERO, 51, &stone(), true).unwrap_err();
        assert!(matches!(err, VoxelError::BuildBoundsExceeded { what: "radius", value: 51, .. }));
        assert!(canvas.is_empty());
    }

    #[test]
    fn test_dome_is_upper_half() {
        let dome = set(dome_points(IVec3::ZERO, 4, false));
        let sphere = set(sphere_points(IVec3::ZERO, 4, false));
        assert!(dome.iter().all(|p| p.y >= 0));
        assert_eq!(dome, sphere.into_iter().filter(|p| p.y >= 0).collect());
    }

    #[test]
    fn test_cylinder_axes() {
        let y = cylinder_points(IVec3::ZERO, 2, 3, false, Axis::Y);
        assert!(y.iter().all(|p| (0..3).contains(&p.y)));
        let x = cylinder_points(IVec3::ZERO, 2, 3, false, Axis::X);
        assert!(x.iter().all(|p| (0..3).contains(&p.x)));
        assert_eq!(y.len(), x.len());
    }

    #[test]
    fn test_line_endpoints_and_steps() {
        let points = line_points(IVec3::ZERO, IVec3::new(4, 2, 0));
        assert_eq!(points.len(), 5);
        assert_eq!(points.first(), Some(&IVec3::ZERO));
        assert_eq!(points.last(), Some(&IVec3::new(4, 2, 0)));

        assert_eq!(line_points(IVec3::ONE, IVec3::ONE), vec![IVec3::ONE, IVec3::ONE]);
    }

    #[test]
    fn test_circle_stays_on_plane() {
        let points = set(circle_points(IVec3::new(0, 10, 0), 5, Axis::Y));
        assert!(points.iter().all(|p| p.y == 10));
        assert!(points.contains(&IVec3::new(5, 10, 0)));
        assert!(points.contains(&IVec3::new(-5, 10, 0)));
        assert!(points.contains(&IVec3::new(0, 10, 5)));
    }

    #[test]
    fn test_arc_span_limit() {
        let mut canvas = VoxelCanvas::default();
        assert!(arc(&mut canvas, IVec3::ZERO, 5, 0, 400, &stone(), Axis::Y).is_err());
        assert!(canvas.is_empty());
        arc(&mut canvas, IVec3::ZERO, 5, 0, 90, &stone(), Axis::Y).unwrap();
        assert!(canvas.get(IVec3::new(5, 0, 0)).is_some());
        assert!(canvas.get(IVec3::new(0, 0, 5)).is_some());
    }

    #[test]
    fn test_spiral_sample_count() {
        let points = spiral_points(IVec3::ZERO, 3, 4, 1.0);
        assert_eq!(points.len(), 64);
        assert_eq!(points[0], IVec3::new(3, 0, 0));
        assert!(points.iter().all(|p| (0..=4).contains(&p.y)));
    }

    #[test]
    fn test_pyramid_layers() {
        let solid = pyramid_points(IVec3::ZERO, 5, false);
        // 5x5 + 3x3 + 1
        assert_eq!(solid.len(), 35);

        let hollow = pyramid_points(IVec3::ZERO, 5, true);
        // 16 + 8 + apex
        assert_eq!(hollow.len(), 25);
    }

    #[test]
    fn test_stairs_face_climb_direction() {
        let mut canvas = VoxelCanvas::default();
        let oak = BlockSpec::parse("oak_stairs").unwrap();
        stairs(&mut canvas, IVec3::ZERO, 3, &oak, Direction::East).unwrap();

        let top = canvas.get(IVec3::new(2, 2, 0)).unwrap();
        assert_eq!(top.properties.get("facing").map(String::as_str), Some("east"));
        assert_eq!(canvas.count(), 3);
    }

    #[test]
    fn test_box_shape_hollow() {
        let mut canvas = VoxelCanvas::default();
        box_shape(&mut canvas, IVec3::ZERO, IVec3::splat(3), &stone(), true).unwrap();
        assert!(canvas.get(IVec3::ONE).is_some_and(BlockSpec::is_air));
        assert!(canvas.get(IVec3::splat(2)).is_some_and(|b| !b.is_air()));
        assert!(box_shape(&mut canvas, IVec3::ZERO, IVec3::new(300, 1, 1), &stone(), false).is_err());
    }

    fn assert_out_of_range(result: Result<(), VoxelError>, canvas: &VoxelCanvas) {
        assert!(
            matches!(result, Err(VoxelError::BuildBoundsExceeded { what: "coordinate", .. })),
            "{:?}",
            result
        );
        assert!(canvas.is_empty());
    }

    #[test]
    fn test_round_shapes_near_i32_max() {
        let far = IVec3::new(i32::MAX - 7, 0, 0);
        let mut canvas = VoxelCanvas::default();
        assert_out_of_range(sphere(&mut canvas, far, 20, &stone(), false), &canvas);
        assert_out_of_range(dome(&mut canvas, far, 20, &stone(), true), &canvas);
        assert_out_of_range(circle(&mut canvas, far, 20, &stone(), Axis::Y), &canvas);
        assert_out_of_range(arc(&mut canvas, far, 20, 0, 90, &stone(), Axis::Y), &canvas);
        assert_out_of_range(spiral(&mut canvas, far, 3, 10, &stone(), 1.0), &canvas);
        assert_out_of_range(
            cylinder(&mut canvas, IVec3::new(0, i32::MAX, 0), 2, 5, &stone(), false, Axis::Y),
            &canvas,
        );
    }

    #[test]
    fn test_linear_shapes_near_i32_max() {
        let mut canvas = VoxelCanvas::default();
        assert_out_of_range(
            box_shape(&mut canvas, IVec3::new(i32::MAX, 0, 0), IVec3::splat(2), &stone(), false),
            &canvas,
        );
        assert_out_of_range(
            stairs(&mut canvas, IVec3::new(0, i32::MAX, 0), 5, &stone(), Direction::East),
            &canvas,
        );
        assert_out_of_range(
            pyramid(&mut canvas, IVec3::new(i32::MIN, 0, 0), 5, &stone(), false),
            &canvas,
        );
        assert_out_of_range(
            line(&mut canvas, IVec3::splat(i32::MAX), IVec3::splat(i32::MAX - 3), &stone()),
            &canvas,
        );
    }

    #[test]
    fn test_shapes_reaching_the_coordinate_edge() {
        let mut canvas = VoxelCanvas::default();
        let edge = IVec3::new(COORD_LIMIT - 2, 0, 0);
        sphere(&mut canvas, edge, 2, &stone(), false).unwrap();
        assert!(canvas.get(IVec3::new(COORD_LIMIT, 0, 0)).is_some());

        let mut canvas = VoxelCanvas::default();
        let result = box_shape(&mut canvas, edge, IVec3::splat(4), &stone(), false);
        assert_out_of_range(result, &canvas);
    }
}
