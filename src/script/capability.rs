//! The `build` object scripts draw with
//!
//! Scripts only ever see the methods listed in [`METHODS`]; each call is
//! checked, converted to typed arguments and forwarded to a [`BuildApi`].

use std::collections::HashMap;

use glam::IVec3;

use super::builtins::bind;
use super::value::{ExcKind, Exception, VResult, Value};
use crate::core::config::BuildLimits;
use crate::voxel::{Axis, BlockSpec, Direction, FillMode, VoxelCanvas, VoxelError, geometry};

/// Distinct block strings remembered by [`CanvasBuilder`]
const BLOCK_CACHE_SIZE: usize = 256;

/// Drawing surface behind the script-visible `build` handle
pub trait BuildApi {
    fn set_block(&mut self, pos: IVec3, block: &str) -> Result<(), VoxelError>;
    fn fill(&mut self, a: IVec3, b: IVec3, block: &str, mode: FillMode) -> Result<(), VoxelError>;
    fn fill_replace(&mut self, a: IVec3, b: IVec3, block: &str, target: &str) -> Result<(), VoxelError>;
    fn wall(&mut self, a: IVec3, b: IVec3, block: &str) -> Result<(), VoxelError>;
    fn floor(&mut self, x1: i32, z1: i32, x2: i32, z2: i32, y: i32, block: &str) -> Result<(), VoxelError>;
    fn box_shape(&mut self, corner: IVec3, size: IVec3, block: &str, hollow: bool) -> Result<(), VoxelError>;
    fn cylinder(
        &mut self,
        base: IVec3,
        radius: i32,
        height: i32,
        block: &str,
        hollow: bool,
        axis: Axis,
    ) -> Result<(), VoxelError>;
    fn sphere(&mut self, center: IVec3, radius: i32, block: &str, hollow: bool) -> Result<(), VoxelError>;
    fn dome(&mut self, center: IVec3, radius: i32, block: &str, hollow: bool) -> Result<(), VoxelError>;
    fn line(&mut self, a: IVec3, b: IVec3, block: &str) -> Result<(), VoxelError>;
    fn circle(&mut self, center: IVec3, radius: i32, block: &str, axis: Axis) -> Result<(), VoxelError>;
    fn arc(
        &mut self,
        center: IVec3,
        radius: i32,
        start: i32,
        end: i32,
        block: &str,
        axis: Axis,
    ) -> Result<(), VoxelError>;
    fn spiral(&mut self, center: IVec3, radius: i32, height: i32, block: &str, turns: f64) -> Result<(), VoxelError>;
    fn pyramid(&mut self, base: IVec3, size: i32, block: &str, hollow: bool) -> Result<(), VoxelError>;
    fn stairs(&mut self, start: IVec3, length: i32, direction: Direction, block: &str) -> Result<(), VoxelError>;
    fn clear_area(&mut self, a: IVec3, b: IVec3) -> Result<(), VoxelError>;
    fn block_count(&self) -> usize;
}

/// [`BuildApi`] writing into a [`VoxelCanvas`]
pub struct CanvasBuilder {
    canvas: VoxelCanvas,
    blocks: HashMap<String, BlockSpec>,
}

impl CanvasBuilder {
    pub fn new(limits: BuildLimits) -> Self {
        Self {
            canvas: VoxelCanvas::new(limits),
            blocks: HashMap::new(),
        }
    }

    pub fn canvas(&self) -> &VoxelCanvas {
        &self.canvas
    }

    pub fn into_canvas(self) -> VoxelCanvas {
        self.canvas
    }

    fn block(&mut self, text: &str) -> Result<BlockSpec, VoxelError> {
        if let Some(spec) = self.blocks.get(text) {
            return Ok(spec.clone());
        }
        let spec = BlockSpec::parse(text)?;
        if self.blocks.len() < BLOCK_CACHE_SIZE {
            self.blocks.insert(text.to_string(), spec.clone());
        }
        Ok(spec)
    }
}

impl BuildApi for CanvasBuilder {
    fn set_block(&mut self, pos: IVec3, block: &str) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        self.canvas.set_voxel(pos, &block)
    }

    fn fill(&mut self, a: IVec3, b: IVec3, block: &str, mode: FillMode) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        self.canvas.fill_box(a, b, &block, mode)
    }

    fn fill_replace(&mut self, a: IVec3, b: IVec3, block: &str, target: &str) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        let target = self.block(target)?;
        self.canvas.replace_in_box(a, b, &block, &target)
    }

    fn wall(&mut self, a: IVec3, b: IVec3, block: &str) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::wall(&mut self.canvas, a, b, &block)
    }

    fn floor(&mut self, x1: i32, z1: i32, x2: i32, z2: i32, y: i32, block: &str) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::floor(&mut self.canvas, x1, z1, x2, z2, y, &block)
    }

    fn box_shape(&mut self, corner: IVec3, size: IVec3, block: &str, hollow: bool) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::box_shape(&mut self.canvas, corner, size, &block, hollow)
    }

    fn cylinder(
        &mut self,
        base: IVec3,
        radius: i32,
        height: i32,
        block: &str,
        hollow: bool,
        axis: Axis,
    ) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::cylinder(&mut self.canvas, base, radius, height, &block, hollow, axis)
    }

    fn sphere(&mut self, center: IVec3, radius: i32, block: &str, hollow: bool) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::sphere(&mut self.canvas, center, radius, &block, hollow)
    }

    fn dome(&mut self, center: IVec3, radius: i32, block: &str, hollow: bool) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::dome(&mut self.canvas, center, radius, &block, hollow)
    }

    fn line(&mut self, a: IVec3, b: IVec3, block: &str) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::line(&mut self.canvas, a, b, &block)
    }

    fn circle(&mut self, center: IVec3, radius: i32, block: &str, axis: Axis) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::circle(&mut self.canvas, center, radius, &block, axis)
    }

    fn arc(
        &mut self,
        center: IVec3,
        radius: i32,
        start: i32,
        end: i32,
        block: &str,
        axis: Axis,
    ) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::arc(&mut self.canvas, center, radius, start, end, &block, axis)
    }

    fn spiral(&mut self, center: IVec3, radius: i32, height: i32, block: &str, turns: f64) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::spiral(&mut self.canvas, center, radius, height, &block, turns)
    }

    fn pyramid(&mut self, base: IVec3, size: i32, block: &str, hollow: bool) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::pyramid(&mut self.canvas, base, size, &block, hollow)
    }

    fn stairs(&mut self, start: IVec3, length: i32, direction: Direction, block: &str) -> Result<(), VoxelError> {
        let block = self.block(block)?;
        geometry::stairs(&mut self.canvas, start, length, &block, direction)
    }

    fn clear_area(&mut self, a: IVec3, b: IVec3) -> Result<(), VoxelError> {
        self.canvas.fill_box(a, b, &BlockSpec::air(), FillMode::Replace)
    }

    fn block_count(&self) -> usize {
        self.canvas.count()
    }
}

/// Method names reachable through `build.<name>`
pub const METHODS: &[&str] = &[
    "place_block",
    "setblock",
    "fill",
    "fill_hollow",
    "fill_outline",
    "fill_replace",
    "wall",
    "floor",
    "box",
    "cylinder",
    "sphere",
    "dome",
    "line",
    "circle",
    "arc",
    "spiral",
    "pyramid",
    "stairs",
    "clear_area",
    "get_block_count",
];

const CORNERS: [&str; 6] = ["x1", "y1", "z1", "x2", "y2", "z2"];

impl From<VoxelError> for Exception {
    fn from(e: VoxelError) -> Self {
        let kind = match &e {
            VoxelError::BuildLimitExceeded { .. } => ExcKind::BuildLimitExceeded,
            VoxelError::BuildBoundsExceeded { .. } => ExcKind::BuildBoundsExceeded,
            VoxelError::InvalidBlock { .. } => ExcKind::InvalidBlock,
        };
        Exception::new(kind, e.to_string())
    }
}

/// Positional slots after binding, read in order
struct Args<'m> {
    method: &'m str,
    params: &'m [&'m str],
    slots: std::vec::IntoIter<Option<Value>>,
    at: usize,
}

impl<'m> Args<'m> {
    fn bind(
        method: &'m str,
        params: &'m [&'m str],
        required: usize,
        args: Vec<Value>,
        kwargs: Vec<(String, Value)>,
    ) -> VResult<Self> {
        let slots = bind(method, params, required, args, kwargs)?;
        Ok(Self {
            method,
            params,
            slots: slots.into_iter(),
            at: 0,
        })
    }

    fn next(&mut self) -> (Option<Value>, &'m str) {
        let name = self.params.get(self.at).copied().unwrap_or("?");
        self.at += 1;
        (self.slots.next().flatten(), name)
    }

    fn required(&mut self) -> VResult<(Value, &'m str)> {
        match self.next() {
            (Some(v), name) => Ok((v, name)),
            (None, name) => Err(Exception::type_error(format!(
                "{}() missing required argument: '{}'",
                self.method, name
            ))),
        }
    }

    fn int(&mut self) -> VResult<i32> {
        let (v, name) = self.required()?;
        int_arg(self.method, name, &v)
    }

    fn point(&mut self) -> VResult<IVec3> {
        Ok(IVec3::new(self.int()?, self.int()?, self.int()?))
    }

    fn text(&mut self) -> VResult<String> {
        let (v, name) = self.required()?;
        str_arg(self.method, name, &v)
    }

    fn flag(&mut self, default: bool) -> bool {
        self.next().0.map_or(default, |v| v.truthy())
    }

    fn parsed<T: std::str::FromStr<Err = String>>(&mut self, default: T) -> VResult<T> {
        match self.next() {
            (None, _) => Ok(default),
            (Some(v), name) => str_arg(self.method, name, &v)?
                .to_ascii_lowercase()
                .parse()
                .map_err(|e: String| Exception::value_error(format!("{}(): {}", self.method, e))),
        }
    }
}

/// Script number to block coordinate; floats round half away from zero
fn int_arg(method: &str, name: &str, v: &Value) -> VResult<i32> {
    let wide = match v {
        Value::Float(f) if f.is_finite() => f.round(),
        Value::Float(_) => {
            return Err(Exception::value_error(format!(
                "{}(): {} must be a finite number",
                method, name
            )));
        }
        other => match other.as_int() {
            Some(i) => i as f64,
            None => {
                return Err(Exception::type_error(format!(
                    "{}(): {} must be a number, not {}",
                    method,
                    name,
                    other.type_name()
                )));
            }
        },
    };
    if wide < i32::MIN as f64 || wide > i32::MAX as f64 {
        return Err(Exception::new(
            ExcKind::BuildBoundsExceeded,
            format!("{}(): {} {} is out of range", method, name, wide),
        ));
    }
    Ok(wide as i32)
}

fn str_arg(method: &str, name: &str, v: &Value) -> VResult<String> {
    match v {
        Value::Str(s) => Ok(s.to_string()),
        other => Err(Exception::type_error(format!(
            "{}(): {} must be a string, not {}",
            method,
            name,
            other.type_name()
        ))),
    }
}

/// Dispatch `build.<method>(...)` onto `api`
pub fn call(
    api: &mut dyn BuildApi,
    method: &str,
    args: Vec<Value>,
    kwargs: Vec<(String, Value)>,
) -> VResult<Value> {
    match method {
        "place_block" | "setblock" => {
            let mut a = Args::bind(method, &["x", "y", "z", "block"], 4, args, kwargs)?;
            let pos = a.point()?;
            let block = a.text()?;
            api.set_block(pos, &block)?;
        }
        "fill" | "fill_hollow" | "fill_outline" => {
            let params = [&CORNERS[..], &["block", "mode"][..]].concat();
            let params = if method == "fill" { &params[..] } else { &params[..7] };
            let mut a = Args::bind(method, params, 7, args, kwargs)?;
            let (p1, p2) = (a.point()?, a.point()?);
            let block = a.text()?;
            let mode = match method {
                "fill_hollow" => FillMode::Hollow,
                "fill_outline" => FillMode::Outline,
                _ => a.parsed(FillMode::Replace)?,
            };
            api.fill(p1, p2, &block, mode)?;
        }
        "fill_replace" => {
            let params = [&CORNERS[..], &["block", "replace_block"][..]].concat();
            let mut a = Args::bind(method, &params, 8, args, kwargs)?;
            let (p1, p2) = (a.point()?, a.point()?);
            let block = a.text()?;
            let target = a.text()?;
            api.fill_replace(p1, p2, &block, &target)?;
        }
        "wall" | "line" => {
            let params = [&CORNERS[..], &["block"][..]].concat();
            let mut a = Args::bind(method, &params, 7, args, kwargs)?;
            let (p1, p2) = (a.point()?, a.point()?);
            let block = a.text()?;
            if method == "wall" {
                api.wall(p1, p2, &block)?;
            } else {
                api.line(p1, p2, &block)?;
            }
        }
        "floor" => {
            let mut a = Args::bind(method, &["x1", "y1", "z1", "x2", "z2", "block"], 6, args, kwargs)?;
            let (x1, y, z1, x2, z2) = (a.int()?, a.int()?, a.int()?, a.int()?, a.int()?);
            let block = a.text()?;
            api.floor(x1, z1, x2, z2, y, &block)?;
        }
        "box" => {
            let params = ["x", "y", "z", "width", "height", "depth", "block", "hollow"];
            let mut a = Args::bind(method, &params, 7, args, kwargs)?;
            let (corner, size) = (a.point()?, a.point()?);
            let block = a.text()?;
            let hollow = a.flag(true);
            api.box_shape(corner, size, &block, hollow)?;
        }
        "cylinder" => {
            let params = ["cx", "cy", "cz", "radius", "height", "block", "hollow", "axis"];
            let mut a = Args::bind(method, &params, 6, args, kwargs)?;
            let base = a.point()?;
            let (radius, height) = (a.int()?, a.int()?);
            let block = a.text()?;
            let hollow = a.flag(true);
            let axis = a.parsed(Axis::Y)?;
            api.cylinder(base, radius, height, &block, hollow, axis)?;
        }
        "sphere" | "dome" => {
            let params = ["cx", "cy", "cz", "radius", "block", "hollow"];
            let mut a = Args::bind(method, &params, 5, args, kwargs)?;
            let center = a.point()?;
            let radius = a.int()?;
            let block = a.text()?;
            let hollow = a.flag(true);
            if method == "sphere" {
                api.sphere(center, radius, &block, hollow)?;
            } else {
                api.dome(center, radius, &block, hollow)?;
            }
        }
        "circle" => {
            let params = ["cx", "cy", "cz", "radius", "block", "axis"];
            let mut a = Args::bind(method, &params, 5, args, kwargs)?;
            let center = a.point()?;
            let radius = a.int()?;
            let block = a.text()?;
            let axis = a.parsed(Axis::Y)?;
            api.circle(center, radius, &block, axis)?;
        }
        "arc" => {
            let params = ["cx", "cy", "cz", "radius", "start_angle", "end_angle", "block", "axis"];
            let mut a = Args::bind(method, &params, 7, args, kwargs)?;
            let center = a.point()?;
            let (radius, start, end) = (a.int()?, a.int()?, a.int()?);
            let block = a.text()?;
            let axis = a.parsed(Axis::Y)?;
            api.arc(center, radius, start, end, &block, axis)?;
        }
        "spiral" => {
            let params = ["cx", "cy", "cz", "radius", "height", "block", "turns"];
            let mut a = Args::bind(method, &params, 6, args, kwargs)?;
            let center = a.point()?;
            let (radius, height) = (a.int()?, a.int()?);
            let block = a.text()?;
            let turns = match a.next() {
                (None, _) => 1.0,
                (Some(v), name) => match v.as_f64() {
                    Some(t) if t.is_finite() => t,
                    _ => {
                        return Err(Exception::type_error(format!(
                            "spiral(): {} must be a finite number",
                            name
                        )));
                    }
                },
            };
            api.spiral(center, radius, height, &block, turns)?;
        }
        "pyramid" => {
            let params = ["cx", "cy", "cz", "base_size", "block", "hollow"];
            let mut a = Args::bind(method, &params, 5, args, kwargs)?;
            let base = a.point()?;
            let size = a.int()?;
            let block = a.text()?;
            let hollow = a.flag(true);
            api.pyramid(base, size, &block, hollow)?;
        }
        "stairs" => {
            let params = ["x", "y", "z", "length", "direction", "block"];
            let mut a = Args::bind(method, &params, 6, args, kwargs)?;
            let start = a.point()?;
            let length = a.int()?;
            let direction = a.parsed(Direction::North)?;
            let block = a.text()?;
            api.stairs(start, length, direction, &block)?;
        }
        "clear_area" => {
            let mut a = Args::bind(method, &CORNERS, 6, args, kwargs)?;
            let (p1, p2) = (a.point()?, a.point()?);
            api.clear_area(p1, p2)?;
        }
        "get_block_count" => {
            Args::bind(method, &[], 0, args, kwargs)?;
            return Ok(Value::Int(api.block_count() as i64));
        }
        other => {
            return Err(Exception::new(
                ExcKind::AttributeError,
                format!("'build' object has no attribute '{}'", other),
            ));
        }
    }
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Vec<Value> {
        values.iter().map(|&v| Value::Int(v)).collect()
    }

    fn with_block(mut args: Vec<Value>, block: &str) -> Vec<Value> {
        args.push(Value::from(block));
        args
    }

    #[test]
    fn test_setblock_and_count() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        call(&mut b, "setblock", with_block(ints(&[1, 2, 3]), "stone"), vec![]).unwrap();
        call(&mut b, "place_block", with_block(ints(&[1, 2, 3]), "dirt"), vec![]).unwrap();
        let count = call(&mut b, "get_block_count", vec![], vec![]).unwrap();
        assert!(matches!(count, Value::Int(1)));
        assert_eq!(b.canvas().get(IVec3::new(1, 2, 3)).unwrap().name, "minecraft:dirt");
    }

    #[test]
    fn test_float_coordinates_round_half_away() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        let args = vec![
            Value::Float(2.5),
            Value::Float(-2.5),
            Value::Float(0.4),
            Value::from("stone"),
        ];
        call(&mut b, "setblock", args, vec![]).unwrap();
        assert!(b.canvas().get(IVec3::new(3, -3, 0)).is_some());
    }

    #[test]
    fn test_keyword_arguments_and_defaults() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        let kwargs = vec![("hollow".to_string(), Value::Bool(false))];
        call(&mut b, "sphere", with_block(ints(&[0, 0, 0, 2]), "glass"), kwargs).unwrap();
        let solid = b.canvas().count();

        let mut hollow = CanvasBuilder::new(BuildLimits::default());
        call(&mut hollow, "sphere", with_block(ints(&[0, 0, 0, 2]), "glass"), vec![]).unwrap();
        assert!(hollow.canvas().count() < solid);

        let mut c = CanvasBuilder::new(BuildLimits::default());
        let kwargs = vec![("mode".to_string(), Value::from("outline"))];
        call(&mut c, "fill", with_block(ints(&[0, 0, 0, 2, 2, 2]), "stone"), kwargs).unwrap();
        assert_eq!(c.canvas().count(), 26);
    }

    #[test]
    fn test_box_floor_and_clear() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        call(&mut b, "box", with_block(ints(&[0, 0, 0, 3, 3, 3]), "stone"), vec![]).unwrap();
        assert_eq!(b.canvas().get(IVec3::new(1, 1, 1)).unwrap().name, "minecraft:air");

        let mut f = CanvasBuilder::new(BuildLimits::default());
        call(&mut f, "floor", with_block(ints(&[0, 5, 0, 2, 2]), "oak_planks"), vec![]).unwrap();
        assert_eq!(f.canvas().count(), 9);
        assert!(f.canvas().iter().all(|(p, _)| p.y == 5));

        call(&mut f, "clear_area", ints(&[0, 5, 0, 0, 5, 0]), vec![]).unwrap();
        assert!(f.canvas().get(IVec3::new(0, 5, 0)).unwrap().is_air());
    }

    #[test]
    fn test_stairs_direction_argument() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        let mut args = ints(&[0, 0, 0, 3]);
        args.push(Value::from("east"));
        args.push(Value::from("oak_stairs"));
        call(&mut b, "stairs", args, vec![]).unwrap();
        let top = b.canvas().get(IVec3::new(2, 2, 0)).unwrap();
        assert_eq!(top.properties.get("facing").map(String::as_str), Some("east"));
    }

    #[test]
    fn test_argument_errors() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        let err = call(&mut b, "setblock", ints(&[0, 0, 0]), vec![]).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);

        let err = call(&mut b, "setblock", ints(&[0, 0, 0, 1]), vec![]).unwrap_err();
        assert_eq!(err.kind, ExcKind::TypeError);

        let err = call(&mut b, "circle", with_block(ints(&[0, 0, 0, 3]), "stone"), vec![("axis".into(), Value::from("w"))])
            .unwrap_err();
        assert_eq!(err.kind, ExcKind::ValueError);

        let err = call(&mut b, "teleport", vec![], vec![]).unwrap_err();
        assert_eq!(err.kind, ExcKind::AttributeError);
    }

    #[test]
    fn test_voxel_errors_become_fatal_exceptions() {
        let mut b = CanvasBuilder::new(BuildLimits::default());
        let err = call(&mut b, "sphere", with_block(ints(&[0, 0, 0, 51]), "stone"), vec![]).unwrap_err();
        assert_eq!(err.kind, ExcKind::BuildBoundsExceeded);
        assert!(err.kind.is_fatal());
        assert_eq!(b.canvas().count(), 0);

        let err = call(&mut b, "setblock", with_block(ints(&[0, 0, 0]), "stone; op @a"), vec![]).unwrap_err();
        assert_eq!(err.kind, ExcKind::InvalidBlock);

        let err = call(&mut b, "setblock", with_block(ints(&[0, 0, 1 << 40]), "stone"), vec![]).unwrap_err();
        assert_eq!(err.kind, ExcKind::BuildBoundsExceeded);
    }
}
