//! Error types for the build pipeline

use thiserror::Error;

use crate::script::ScriptError;
use crate::structure::StructureError;
use crate::voxel::VoxelError;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Voxel error: {0}")]
    Voxel(#[from] VoxelError),

    #[error("Script error: {0}")]
    Script(#[from] ScriptError),

    #[error("Structure error: {0}")]
    Structure(#[from] StructureError),

    #[error("RCON error: {0}")]
    Rcon(#[from] plotcraft_rcon::RconError),

    #[error("Server rejected command: {0}")]
    Rejected(String),

    #[error("Config error: {0}")]
    Config(String),
}
