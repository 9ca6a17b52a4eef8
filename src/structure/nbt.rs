//! Big-endian named binary tags
//!
//! Just enough of the format for structure files: every tag type can be
//! written and read, compounds keep insertion order so output bytes are
//! reproducible.

use super::StructureError;

/// Deepest nesting accepted when reading
const MAX_DEPTH: usize = 512;

/// Tag type ids as they appear on the wire
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TagKind {
    End = 0,
    Byte = 1,
    Short = 2,
    Int = 3,
    Long = 4,
    Float = 5,
    Double = 6,
    ByteArray = 7,
    String = 8,
    List = 9,
    Compound = 10,
    IntArray = 11,
    LongArray = 12,
}

impl TagKind {
    pub fn from_u8(id: u8) -> Option<Self> {
        Some(match id {
            0 => Self::End,
            1 => Self::Byte,
            2 => Self::Short,
            3 => Self::Int,
            4 => Self::Long,
            5 => Self::Float,
            6 => Self::Double,
            7 => Self::ByteArray,
            8 => Self::String,
            9 => Self::List,
            10 => Self::Compound,
            11 => Self::IntArray,
            12 => Self::LongArray,
            _ => return None,
        })
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(List),
    Compound(Compound),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    pub fn kind(&self) -> TagKind {
        match self {
            Tag::Byte(_) => TagKind::Byte,
            Tag::Short(_) => TagKind::Short,
            Tag::Int(_) => TagKind::Int,
            Tag::Long(_) => TagKind::Long,
            Tag::Float(_) => TagKind::Float,
            Tag::Double(_) => TagKind::Double,
            Tag::ByteArray(_) => TagKind::ByteArray,
            Tag::String(_) => TagKind::String,
            Tag::List(_) => TagKind::List,
            Tag::Compound(_) => TagKind::Compound,
            Tag::IntArray(_) => TagKind::IntArray,
            Tag::LongArray(_) => TagKind::LongArray,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Tag::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Tag::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&List> {
        match self {
            Tag::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_compound(&self) -> Option<&Compound> {
        match self {
            Tag::Compound(c) => Some(c),
            _ => None,
        }
    }
}

/// Homogeneous list; the element kind is kept so empty lists round-trip
#[derive(Clone, Debug, PartialEq)]
pub struct List {
    pub kind: TagKind,
    pub items: Vec<Tag>,
}

impl List {
    pub fn new(kind: TagKind) -> Self {
        Self { kind, items: Vec::new() }
    }

    pub fn ints(values: &[i32]) -> Self {
        Self {
            kind: TagKind::Int,
            items: values.iter().map(|&v| Tag::Int(v)).collect(),
        }
    }

    pub fn compounds(items: Vec<Compound>) -> Self {
        Self {
            kind: TagKind::Compound,
            items: items.into_iter().map(Tag::Compound).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Named tags in insertion order
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Compound {
    entries: Vec<(String, Tag)>,
}

impl Compound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position on replace.
    pub fn insert(&mut self, name: impl Into<String>, tag: Tag) {
        let name = name.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some(entry) => entry.1 = tag,
            None => self.entries.push((name, tag)),
        }
    }

    /// Builder form of [`insert`](Self::insert)
    pub fn with(mut self, name: impl Into<String>, tag: Tag) -> Self {
        self.insert(name, tag);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, t)| t)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Tag)> {
        self.entries.iter().map(|(n, t)| (n.as_str(), t))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Serialize a root compound with an empty name.
pub fn write_root(root: &Compound) -> Result<Vec<u8>, StructureError> {
    let mut out = Vec::new();
    out.push(TagKind::Compound as u8);
    write_string(&mut out, "")?;
    write_compound(&mut out, root)?;
    Ok(out)
}

fn write_string(out: &mut Vec<u8>, s: &str) -> Result<(), StructureError> {
    let len = u16::try_from(s.len())
        .map_err(|_| StructureError::Nbt(format!("string of {} bytes is too long", s.len())))?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(s.as_bytes());
    Ok(())
}

fn write_len(out: &mut Vec<u8>, len: usize) -> Result<(), StructureError> {
    let len = i32::try_from(len)
        .map_err(|_| StructureError::Nbt(format!("{} elements do not fit a length prefix", len)))?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn write_compound(out: &mut Vec<u8>, compound: &Compound) -> Result<(), StructureError> {
    for (name, tag) in &compound.entries {
        out.push(tag.kind() as u8);
        write_string(out, name)?;
        write_payload(out, tag)?;
    }
    out.push(TagKind::End as u8);
    Ok(())
}

fn write_payload(out: &mut Vec<u8>, tag: &Tag) -> Result<(), StructureError> {
    match tag {
        Tag::Byte(v) => out.push(*v as u8),
        Tag::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        Tag::ByteArray(values) => {
            write_len(out, values.len())?;
            out.extend(values.iter().map(|&v| v as u8));
        }
        Tag::String(s) => write_string(out, s)?,
        Tag::List(list) => {
            if let Some(bad) = list.items.iter().find(|t| t.kind() != list.kind) {
                return Err(StructureError::Nbt(format!(
                    "{:?} element in a list of {:?}",
                    bad.kind(),
                    list.kind
                )));
            }
            out.push(list.kind as u8);
            write_len(out, list.items.len())?;
            for item in &list.items {
                write_payload(out, item)?;
            }
        }
        Tag::Compound(c) => write_compound(out, c)?,
        Tag::IntArray(values) => {
            write_len(out, values.len())?;
            for v in values {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
        Tag::LongArray(values) => {
            write_len(out, values.len())?;
            for v in values {
                out.extend_from_slice(&v.to_be_bytes());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Parse an uncompressed root compound.
pub fn read_root(bytes: &[u8]) -> Result<Compound, StructureError> {
    let mut reader = Reader { bytes, pos: 0 };
    let kind = reader.u8()?;
    if kind != TagKind::Compound as u8 {
        return Err(StructureError::Nbt(format!("root tag has type {}, expected compound", kind)));
    }
    reader.string()?;
    let root = reader.compound(0)?;
    if reader.pos != bytes.len() {
        return Err(StructureError::Nbt(format!(
            "{} trailing bytes after root",
            bytes.len() - reader.pos
        )));
    }
    Ok(root)
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], StructureError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| StructureError::Nbt("unexpected end of data".to_string()))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], StructureError> {
        let mut buf = [0u8; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn u8(&mut self) -> Result<u8, StructureError> {
        Ok(self.array::<1>()?[0])
    }

    fn len(&mut self) -> Result<usize, StructureError> {
        let len = i32::from_be_bytes(self.array()?);
        usize::try_from(len).map_err(|_| StructureError::Nbt(format!("negative length {}", len)))
    }

    fn string(&mut self) -> Result<String, StructureError> {
        let len = u16::from_be_bytes(self.array()?) as usize;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|e| StructureError::Nbt(e.to_string()))
    }

    fn compound(&mut self, depth: usize) -> Result<Compound, StructureError> {
        if depth > MAX_DEPTH {
            return Err(StructureError::Nbt("nesting too deep".to_string()));
        }
        let mut compound = Compound::new();
        loop {
            let id = self.u8()?;
            let kind = TagKind::from_u8(id)
                .ok_or_else(|| StructureError::Nbt(format!("unknown tag type {}", id)))?;
            if kind == TagKind::End {
                return Ok(compound);
            }
            let name = self.string()?;
            let tag = self.payload(kind, depth + 1)?;
            compound.entries.push((name, tag));
        }
    }

    fn payload(&mut self, kind: TagKind, depth: usize) -> Result<Tag, StructureError> {
        Ok(match kind {
            TagKind::End => return Err(StructureError::Nbt("unexpected end tag".to_string())),
            TagKind::Byte => Tag::Byte(self.u8()? as i8),
            TagKind::Short => Tag::Short(i16::from_be_bytes(self.array()?)),
            TagKind::Int => Tag::Int(i32::from_be_bytes(self.array()?)),
            TagKind::Long => Tag::Long(i64::from_be_bytes(self.array()?)),
            TagKind::Float => Tag::Float(f32::from_be_bytes(self.array()?)),
            TagKind::Double => Tag::Double(f64::from_be_bytes(self.array()?)),
            TagKind::ByteArray => {
                let len = self.len()?;
                Tag::ByteArray(self.take(len)?.iter().map(|&b| b as i8).collect())
            }
            TagKind::String => Tag::String(self.string()?),
            TagKind::List => {
                if depth > MAX_DEPTH {
                    return Err(StructureError::Nbt("nesting too deep".to_string()));
                }
                let id = self.u8()?;
                let item_kind = TagKind::from_u8(id)
                    .ok_or_else(|| StructureError::Nbt(format!("unknown list type {}", id)))?;
                let len = self.len()?;
                if item_kind == TagKind::End && len > 0 {
                    return Err(StructureError::Nbt("non-empty list of end tags".to_string()));
                }
                let mut items = Vec::with_capacity(len.min(self.bytes.len() - self.pos));
                for _ in 0..len {
                    items.push(self.payload(item_kind, depth + 1)?);
                }
                Tag::List(List { kind: item_kind, items })
            }
            TagKind::Compound => Tag::Compound(self.compound(depth)?),
            TagKind::IntArray => {
                let len = self.len()?;
                let raw = self.take(len.checked_mul(4).ok_or_else(overflow)?)?;
                Tag::IntArray(
                    raw.chunks_exact(4)
                        .map(|c| i32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                        .collect(),
                )
            }
            TagKind::LongArray => {
                let len = self.len()?;
                let raw = self.take(len.checked_mul(8).ok_or_else(overflow)?)?;
                Tag::LongArray(
                    raw.chunks_exact(8)
                        .map(|c| i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]))
                        .collect(),
                )
            }
        })
    }
}

fn overflow() -> StructureError {
    StructureError::Nbt("array length overflow".to_string())
}
