//! Canvas and primitive errors

use thiserror::Error;

/// Errors raised synchronously by canvas writes and geometry primitives.
///
/// All of them abort the current build only; the canvas is owned by one
/// script execution so nothing shared is left inconsistent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoxelError {
    #[error("Build limit exceeded: {attempted} blocks requested, maximum is {max}")]
    BuildLimitExceeded { attempted: usize, max: usize },

    #[error("Build bounds exceeded: {what} {value} is larger than {max}")]
    BuildBoundsExceeded {
        what: &'static str,
        value: i64,
        max: i64,
    },

    #[error("Invalid block '{block}': {reason}")]
    InvalidBlock { block: String, reason: String },
}

impl VoxelError {
    pub(crate) fn invalid_block(block: &str, reason: impl Into<String>) -> Self {
        Self::InvalidBlock {
            block: block.to_string(),
            reason: reason.into(),
        }
    }
}
