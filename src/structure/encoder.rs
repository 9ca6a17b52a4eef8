//! Structure documents: palette-indexed, gzip-compressed tag files the game
//! server loads with `place template`

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use flate2::Compression;
use flate2::GzBuilder;
use flate2::read::GzDecoder;
use glam::IVec3;

use super::StructureError;
use super::nbt::{self, Compound, List, Tag, TagKind};
use crate::compile::Region;
use crate::core::config::DATA_VERSION;
use crate::math::BlockBox;
use crate::voxel::{BlockSpec, VoxelCanvas};

/// Author string stamped into every document
pub const AUTHOR: &str = "plotcraft";

/// Largest decompressed document [`StructureDocument::decode`] accepts
const MAX_DECODED_LEN: u64 = 256 * 1024 * 1024;

/// One placed block, position relative to the document's minimum corner
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StructureBlock {
    pub pos: IVec3,
    pub state: i32,
}

/// In-memory form of a structure file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StructureDocument {
    pub data_version: i32,
    pub size: IVec3,
    /// Distinct blocks, sorted; a block's state is its index here
    pub palette: Vec<BlockSpec>,
    /// Sorted by (y, z, x)
    pub blocks: Vec<StructureBlock>,
}

impl StructureDocument {
    /// Build from every non-air voxel of a canvas.
    pub fn from_canvas(canvas: &VoxelCanvas) -> Result<Self, StructureError> {
        Self::from_voxels(canvas.iter().map(|(pos, block)| (pos, block.clone())))
    }

    /// Build from compiled regions; equivalent to [`from_canvas`](Self::from_canvas)
    /// on the canvas they were compiled from.
    pub fn from_regions(regions: &[Region]) -> Result<Self, StructureError> {
        Self::from_voxels(
            regions
                .iter()
                .flat_map(|r| r.bbox().positions().map(move |p| (p, r.block.clone()))),
        )
    }

    fn from_voxels<I>(voxels: I) -> Result<Self, StructureError>
    where
        I: IntoIterator<Item = (IVec3, BlockSpec)>,
    {
        let solid: Vec<(IVec3, BlockSpec)> = voxels.into_iter().filter(|(_, b)| !b.is_air()).collect();
        let mut bounds: Option<BlockBox> = None;
        for (pos, _) in &solid {
            match bounds.as_mut() {
                Some(b) => b.expand(*pos),
                None => bounds = Some(BlockBox::point(*pos)),
            }
        }
        let Some(bounds) = bounds else {
            return Err(StructureError::Empty);
        };

        let palette: Vec<BlockSpec> = solid
            .iter()
            .map(|(_, b)| b.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index: BTreeMap<&BlockSpec, i32> = palette
            .iter()
            .enumerate()
            .map(|(i, b)| (b, i as i32))
            .collect();

        let mut blocks: Vec<StructureBlock> = solid
            .iter()
            .map(|(pos, block)| StructureBlock {
                pos: *pos - bounds.min,
                state: index[block],
            })
            .collect();
        blocks.sort_unstable_by_key(|b| (b.pos.y, b.pos.z, b.pos.x));

        Ok(Self {
            data_version: DATA_VERSION,
            size: bounds.size(),
            palette,
            blocks,
        })
    }

    pub fn with_data_version(mut self, data_version: i32) -> Self {
        self.data_version = data_version;
        self
    }

    /// Raw tag tree
    pub fn to_nbt(&self) -> Compound {
        let palette = self
            .palette
            .iter()
            .map(|block| {
                let mut entry = Compound::new().with("Name", Tag::String(block.name.clone()));
                if !block.properties.is_empty() {
                    let mut props = Compound::new();
                    for (key, value) in &block.properties {
                        props.insert(key.clone(), Tag::String(value.clone()));
                    }
                    entry.insert("Properties", Tag::Compound(props));
                }
                entry
            })
            .collect();

        let blocks = self
            .blocks
            .iter()
            .map(|b| {
                Compound::new()
                    .with("pos", Tag::List(List::ints(&b.pos.to_array())))
                    .with("state", Tag::Int(b.state))
            })
            .collect();

        Compound::new()
            .with("DataVersion", Tag::Int(self.data_version))
            .with("author", Tag::String(AUTHOR.to_string()))
            .with("size", Tag::List(List::ints(&self.size.to_array())))
            .with("palette", Tag::List(List::compounds(palette)))
            .with("blocks", Tag::List(List::compounds(blocks)))
            .with("entities", Tag::List(List::new(TagKind::Compound)))
    }

    /// Gzip-compressed file bytes; identical input gives identical bytes.
    pub fn encode(&self) -> Result<Vec<u8>, StructureError> {
        let raw = nbt::write_root(&self.to_nbt())?;
        let mut encoder = GzBuilder::new()
            .mtime(0)
            .write(Vec::with_capacity(raw.len() / 4), Compression::default());
        encoder.write_all(&raw)?;
        Ok(encoder.finish()?)
    }

    /// Parse file bytes produced by [`encode`](Self::encode) or the game.
    pub fn decode(bytes: &[u8]) -> Result<Self, StructureError> {
        let mut raw = Vec::new();
        GzDecoder::new(bytes)
            .take(MAX_DECODED_LEN)
            .read_to_end(&mut raw)?;
        let root = nbt::read_root(&raw)?;
        Self::from_nbt(&root)
    }

    /// Interpret a tag tree
    pub fn from_nbt(root: &Compound) -> Result<Self, StructureError> {
        let data_version = root
            .get("DataVersion")
            .and_then(Tag::as_int)
            .ok_or_else(|| missing("DataVersion"))?;
        let size = int_triple(root.get("size")).ok_or_else(|| missing("size"))?;

        let palette_list = root
            .get("palette")
            .and_then(Tag::as_list)
            .ok_or_else(|| missing("palette"))?;
        let mut palette = Vec::with_capacity(palette_list.len());
        for entry in &palette_list.items {
            let entry = entry.as_compound().ok_or_else(|| missing("palette entry"))?;
            let name = entry
                .get("Name")
                .and_then(Tag::as_str)
                .ok_or_else(|| missing("Name"))?;
            let mut block = BlockSpec::parse(name).map_err(|e| StructureError::Nbt(e.to_string()))?;
            if let Some(props) = entry.get("Properties").and_then(Tag::as_compound) {
                for (key, value) in props.iter() {
                    let value = value.as_str().ok_or_else(|| missing("property value"))?;
                    block.properties.insert(key.to_string(), value.to_string());
                }
            }
            palette.push(block);
        }

        let block_list = root
            .get("blocks")
            .and_then(Tag::as_list)
            .ok_or_else(|| missing("blocks"))?;
        let mut blocks = Vec::with_capacity(block_list.len());
        for entry in &block_list.items {
            let entry = entry.as_compound().ok_or_else(|| missing("block entry"))?;
            let pos = int_triple(entry.get("pos")).ok_or_else(|| missing("pos"))?;
            let state = entry
                .get("state")
                .and_then(Tag::as_int)
                .ok_or_else(|| missing("state"))?;
            if state < 0 || state as usize >= palette.len() {
                return Err(StructureError::Nbt(format!("state {} outside palette", state)));
            }
            blocks.push(StructureBlock { pos, state });
        }

        Ok(Self {
            data_version,
            size,
            palette,
            blocks,
        })
    }

    /// Every block with its palette entry, positions relative to the
    /// minimum corner
    pub fn voxels(&self) -> impl Iterator<Item = (IVec3, &BlockSpec)> + '_ {
        self.blocks
            .iter()
            .map(|b| (b.pos, &self.palette[b.state as usize]))
    }
}

fn missing(what: &str) -> StructureError {
    StructureError::Nbt(format!("missing or mistyped {}", what))
}

fn int_triple(tag: Option<&Tag>) -> Option<IVec3> {
    let list = tag?.as_list()?;
    match list.items.as_slice() {
        [Tag::Int(x), Tag::Int(y), Tag::Int(z)] => Some(IVec3::new(*x, *y, *z)),
        _ => None,
    }
}

/// World position to place a document built from `canvas` so each voxel
/// lands at `origin + local`. The y component never drops below `min_y`.
pub fn structure_offset(canvas: &VoxelCanvas, origin: IVec3, min_y: i32) -> IVec3 {
    let min = canvas.non_air_bounds().map_or(IVec3::ZERO, |b| b.min);
    let offset = origin + min;
    IVec3::new(offset.x, offset.y.max(min_y), offset.z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile;
    use crate::voxel::{FillMode, geometry};
    use std::collections::HashMap;

    fn block(name: &str) -> BlockSpec {
        BlockSpec::parse(name).unwrap()
    }

    fn sample_canvas() -> VoxelCanvas {
        let mut canvas = VoxelCanvas::default();
        canvas
            .fill_box(IVec3::new(-3, 0, -3), IVec3::new(3, 4, 3), &block("stone_bricks"), FillMode::Hollow)
            .unwrap();
        geometry::dome(&mut canvas, IVec3::new(0, 5, 0), 3, &block("glass"), true).unwrap();
        canvas
            .set_voxel(IVec3::new(0, 1, -3), &block("oak_door[facing=north,half=lower]"))
            .unwrap();
        canvas
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let canvas = sample_canvas();
        let a = StructureDocument::from_canvas(&canvas).unwrap().encode().unwrap();
        let b = StructureDocument::from_canvas(&canvas.clone()).unwrap().encode().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_reconstructs_voxels() {
        let canvas = sample_canvas();
        let doc = StructureDocument::from_canvas(&canvas).unwrap();
        let decoded = StructureDocument::decode(&doc.encode().unwrap()).unwrap();
        assert_eq!(decoded, doc);

        let min = canvas.non_air_bounds().unwrap().min;
        let original: HashMap<IVec3, &BlockSpec> = canvas
            .iter()
            .filter(|(_, b)| !b.is_air())
            .map(|(p, b)| (p - min, b))
            .collect();
        let rebuilt: HashMap<IVec3, &BlockSpec> = decoded.voxels().collect();
        assert_eq!(rebuilt, original);
    }

    #[test]
    fn test_palette_sorted_and_air_excluded() {
        let doc = StructureDocument::from_canvas(&sample_canvas()).unwrap();
        assert!(doc.palette.windows(2).all(|w| w[0] < w[1]));
        assert!(doc.palette.iter().all(|b| !b.is_air()));
        assert_eq!(doc.size, IVec3::new(7, 9, 7));
        assert!(doc.blocks.windows(2).all(|w| {
            (w[0].pos.y, w[0].pos.z, w[0].pos.x) < (w[1].pos.y, w[1].pos.z, w[1].pos.x)
        }));
    }

    #[test]
    fn test_regions_match_canvas() {
        let canvas = sample_canvas();
        let regions = compile::compile(&canvas);
        assert_eq!(
            StructureDocument::from_regions(&regions).unwrap(),
            StructureDocument::from_canvas(&canvas).unwrap()
        );
    }

    #[test]
    fn test_empty_canvas() {
        let mut canvas = VoxelCanvas::default();
        assert!(matches!(StructureDocument::from_canvas(&canvas), Err(StructureError::Empty)));
        canvas.set_voxel(IVec3::ZERO, &BlockSpec::air()).unwrap();
        assert!(matches!(StructureDocument::from_canvas(&canvas), Err(StructureError::Empty)));
    }

    #[test]
    fn test_properties_written() {
        let doc = StructureDocument::from_canvas(&sample_canvas()).unwrap();
        let root = doc.to_nbt();
        let palette = root.get("palette").and_then(Tag::as_list).unwrap();
        let door = palette
            .items
            .iter()
            .filter_map(Tag::as_compound)
            .find(|c| c.get("Name").and_then(Tag::as_str) == Some("minecraft:oak_door"))
            .unwrap();
        let props = door.get("Properties").and_then(Tag::as_compound).unwrap();
        assert_eq!(props.get("facing").and_then(Tag::as_str), Some("north"));
        assert_eq!(root.get("entities").and_then(Tag::as_list).map(List::len), Some(0));
    }

    #[test]
    fn test_structure_offset() {
        let mut canvas = VoxelCanvas::default();
        canvas.set_voxel(IVec3::new(-2, -10, 5), &block("stone")).unwrap();
        canvas.set_voxel(IVec3::new(3, 4, 6), &block("stone")).unwrap();

        let offset = structure_offset(&canvas, IVec3::new(100, -60, 200), -64);
        assert_eq!(offset, IVec3::new(98, -64, 205));

        let empty = VoxelCanvas::default();
        assert_eq!(structure_offset(&empty, IVec3::new(1, 2, 3), -64), IVec3::new(1, 2, 3));
    }
}
