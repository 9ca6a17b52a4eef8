//! Remote console (RCON) client for the game server
//!
//! Speaks the length-framed binary console protocol, authenticates with a
//! shared secret and retries transient failures with linear backoff:
//! ```ignore
//! let pool = RconPool::new(RconConfig::default(), 4);
//! let output = pool.command("list").await?;
//! ```

pub mod client;
pub mod error;
pub mod pool;
pub mod protocol;

#[cfg(any(test, feature = "mock-server"))]
pub mod mock;

pub use client::{ConnectionState, RconClient, RconConfig};
pub use error::{RconError, Result};
pub use pool::{BatchReport, PooledClient, RconPool};
pub use protocol::{Packet, PacketKind};

/// Default RCON port of the game server
pub const DEFAULT_PORT: u16 = 25575;
