//! Structure file encoding and storage

pub mod encoder;
pub mod nbt;
pub mod store;

use thiserror::Error;

pub use encoder::{StructureBlock, StructureDocument, structure_offset};
pub use store::{StructureHandle, StructureStore};

#[derive(Debug, Error)]
pub enum StructureError {
    #[error("NBT error: {0}")]
    Nbt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Structure has no solid blocks")]
    Empty,

    #[error("Invalid structure name '{0}'")]
    InvalidName(String),
}
