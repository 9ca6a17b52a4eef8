//! Block identifiers with optional state properties

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::VoxelError;

/// Namespace given to bare block names
pub const DEFAULT_NAMESPACE: &str = "minecraft";

/// Fully-qualified air block
pub const AIR: &str = "minecraft:air";

/// Canonical block identifier plus state properties.
///
/// Every accepted name and property is restricted to the game's identifier
/// alphabet, so a `BlockSpec` can be spliced into console command text.
/// Ordering is by name, then properties; palettes rely on it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockSpec {
    /// `namespace:identifier`
    pub name: String,
    pub properties: BTreeMap<String, String>,
}

impl BlockSpec {
    /// Parse `name` or `name[key=value,...]`, qualifying bare names.
    pub fn parse(text: &str) -> Result<Self, VoxelError> {
        let text = text.trim();
        let (name, props) = match text.find('[') {
            Some(open) => {
                let Some(body) = text[open + 1..].strip_suffix(']') else {
                    return Err(VoxelError::invalid_block(text, "unterminated property list"));
                };
                (&text[..open], Some(body))
            }
            None => (text, None),
        };

        let name = canonical_name(text, name)?;
        let mut properties = BTreeMap::new();
        if let Some(body) = props {
            for pair in body.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                let Some((key, value)) = pair.split_once('=') else {
                    return Err(VoxelError::invalid_block(
                        text,
                        format!("property '{}' is missing '='", pair),
                    ));
                };
                let key = key.trim().to_ascii_lowercase();
                let value = value.trim().to_ascii_lowercase();
                if !is_property_token(&key) || !is_property_token(&value) {
                    return Err(VoxelError::invalid_block(
                        text,
                        format!("invalid property '{}'", pair),
                    ));
                }
                properties.insert(key, value);
            }
        }

        Ok(Self { name, properties })
    }

    pub fn air() -> Self {
        Self {
            name: AIR.to_string(),
            properties: BTreeMap::new(),
        }
    }

    pub fn is_air(&self) -> bool {
        self.name == AIR
    }

    pub fn namespace(&self) -> &str {
        self.name.split_once(':').map_or(DEFAULT_NAMESPACE, |(ns, _)| ns)
    }

    /// Identifier without the namespace
    pub fn path(&self) -> &str {
        self.name.split_once(':').map_or(self.name.as_str(), |(_, path)| path)
    }
}

impl fmt::Display for BlockSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if !self.properties.is_empty() {
            f.write_str("[")?;
            for (i, (key, value)) in self.properties.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", key, value)?;
            }
            f.write_str("]")?;
        }
        Ok(())
    }
}

impl FromStr for BlockSpec {
    type Err = VoxelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn canonical_name(original: &str, name: &str) -> Result<String, VoxelError> {
    let name = name.trim().to_ascii_lowercase();
    let (namespace, path) = match name.split_once(':') {
        Some((ns, path)) => (ns.to_string(), path.to_string()),
        None => (DEFAULT_NAMESPACE.to_string(), name),
    };

    if namespace.is_empty() || !namespace.bytes().all(is_namespace_byte) {
        return Err(VoxelError::invalid_block(original, "invalid namespace"));
    }
    if path.is_empty() || !path.bytes().all(|b| is_namespace_byte(b) || b == b'/') {
        return Err(VoxelError::invalid_block(original, "invalid identifier"));
    }
    Ok(format!("{}:{}", namespace, path))
}

fn is_namespace_byte(b: u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'_' | b'.' | b'-')
}

fn is_property_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(is_namespace_byte)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_name_is_qualified() {
        let block = BlockSpec::parse("stone").unwrap();
        assert_eq!(block.name, "minecraft:stone");
        assert!(block.properties.is_empty());
        assert_eq!(block.to_string(), "minecraft:stone");
    }

    #[test]
    fn test_inline_properties() {
        let block = BlockSpec::parse("oak_stairs[facing=north, half=bottom]").unwrap();
        assert_eq!(block.name, "minecraft:oak_stairs");
        assert_eq!(block.properties.get("facing").map(String::as_str), Some("north"));
        assert_eq!(block.properties.get("half").map(String::as_str), Some("bottom"));
        assert_eq!(block.to_string(), "minecraft:oak_stairs[facing=north,half=bottom]");
    }

    #[test]
    fn test_custom_namespace() {
        let block = BlockSpec::parse("create:cogwheel").unwrap();
        assert_eq!(block.namespace(), "create");
        assert_eq!(block.path(), "cogwheel");
    }

    #[test]
    fn test_rejects_injection() {
        assert!(BlockSpec::parse("stone run say hi").is_err());
        assert!(BlockSpec::parse("stone\nop me").is_err());
        assert!(BlockSpec::parse("stone[facing=north").is_err());
        assert!(BlockSpec::parse("stone[facing]").is_err());
        assert!(BlockSpec::parse("stone[a=b c]").is_err());
        assert!(BlockSpec::parse("").is_err());
    }

    #[test]
    fn test_ordering_is_name_then_properties() {
        let mut blocks = vec![
            BlockSpec::parse("stone").unwrap(),
            BlockSpec::parse("oak_log[axis=y]").unwrap(),
            BlockSpec::parse("oak_log[axis=x]").unwrap(),
            BlockSpec::parse("dirt").unwrap(),
        ];
        blocks.sort();
        let names: Vec<String> = blocks.iter().map(|b| b.to_string()).collect();
        assert_eq!(
            names,
            vec![
                "minecraft:dirt",
                "minecraft:oak_log[axis=x]",
                "minecraft:oak_log[axis=y]",
                "minecraft:stone",
            ]
        );
    }

    #[test]
    fn test_air() {
        assert!(BlockSpec::parse("air").unwrap().is_air());
        assert!(BlockSpec::air().is_air());
        assert!(!BlockSpec::parse("stone").unwrap().is_air());
    }
}
