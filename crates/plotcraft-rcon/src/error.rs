//! Error types for the RCON client

use thiserror::Error;

/// Errors raised while talking to the remote console
#[derive(Debug, Error)]
pub enum RconError {
    #[error("RCON authentication failed")]
    AuthenticationFailed,

    #[error("RCON packet too large: {0} bytes")]
    PacketTooLarge(usize),

    #[error("Malformed RCON packet: {0}")]
    MalformedPacket(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("RCON {0} timed out")]
    Timeout(&'static str),

    #[error("Not connected to RCON")]
    NotConnected,

    #[error("RCON delivery failed after {attempts} attempts: {last}")]
    DeliveryFailed { attempts: u32, last: String },

    #[error("RCON pool is closed")]
    PoolClosed,
}

impl RconError {
    /// Whether the error is worth a reconnect-and-retry.
    ///
    /// Authentication failures and oversized packets fail the same way on
    /// every attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            RconError::AuthenticationFailed
                | RconError::PacketTooLarge(_)
                | RconError::PoolClosed
                | RconError::DeliveryFailed { .. }
        )
    }
}

/// Result alias for RCON operations
pub type Result<T> = std::result::Result<T, RconError>;
