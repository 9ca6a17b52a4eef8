//! Core types and utilities shared by every stage of the build pipeline

pub mod types;
pub mod error;
pub mod logging;
pub mod config;

pub use types::*;
pub use error::Error;
pub use config::{AppConfig, BuildLimits, SandboxConfig};
