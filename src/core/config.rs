//! Runtime configuration
//!
//! Every section has sensible defaults; a JSON file can override any subset
//! of fields and a handful of environment variables override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::build::DeliveryMode;
use crate::core::error::Error;
use crate::plot::PlotGridConfig;
use plotcraft_rcon::RconConfig;

/// Lowest buildable y of the target world
pub const WORLD_MIN_Y: i32 = -64;

/// DataVersion stamped into structure files
pub const DATA_VERSION: i32 = 3953;

/// Per-build voxel ceilings
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildLimits {
    /// Maximum voxel writes one script may perform
    pub max_blocks: usize,
    /// Maximum radius accepted by round primitives
    pub max_radius: i32,
    /// Maximum linear extent (length, height, box side) of one call
    pub max_dimension: i32,
}

impl Default for BuildLimits {
    fn default() -> Self {
        Self {
            max_blocks: 500_000,
            max_radius: 50,
            max_dimension: 256,
        }
    }
}

/// Script sandbox settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub limits: BuildLimits,
    /// Wall-clock budget for one execution
    pub timeout_ms: u64,
    /// Longest accepted script source, in bytes
    pub max_script_len: usize,
    /// Deepest user function call chain
    pub max_call_depth: usize,
    /// Longest list/dict/string a script may build
    pub max_collection_len: usize,
    /// Seed for the script-visible `random` module
    pub random_seed: u64,
    /// Scripts allowed to execute at the same time
    pub max_workers: usize,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            limits: BuildLimits::default(),
            timeout_ms: 30_000,
            max_script_len: 50_000,
            max_call_depth: 64,
            max_collection_len: 1_000_000,
            random_seed: 0x5eed,
            max_workers: 2,
        }
    }
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// RCON connection settings (serializable form of [`RconConfig`])
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RconSettings {
    pub host: String,
    pub port: u16,
    pub password: String,
    pub pool_size: usize,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub io_timeout_ms: u64,
    pub throttle_every: u64,
    pub throttle_pause_ms: u64,
}

impl Default for RconSettings {
    fn default() -> Self {
        let client = RconConfig::default();
        Self {
            host: client.host,
            port: client.port,
            password: client.password,
            pool_size: 4,
            max_retries: client.max_retries,
            retry_delay_ms: client.retry_delay.as_millis() as u64,
            io_timeout_ms: client.io_timeout.as_millis() as u64,
            throttle_every: client.throttle_every,
            throttle_pause_ms: client.throttle_pause.as_millis() as u64,
        }
    }
}

impl RconSettings {
    pub fn client_config(&self) -> RconConfig {
        RconConfig {
            host: self.host.clone(),
            port: self.port,
            password: self.password.clone(),
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            io_timeout: Duration::from_millis(self.io_timeout_ms),
            throttle_every: self.throttle_every,
            throttle_pause: Duration::from_millis(self.throttle_pause_ms),
            ..RconConfig::default()
        }
    }
}

/// Top-level configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sandbox: SandboxConfig,
    pub rcon: RconSettings,
    pub grid: PlotGridConfig,
    /// Root of the server's generated structure directory
    pub structure_dir: PathBuf,
    /// Namespace structures are registered under
    pub structure_namespace: String,
    pub data_version: i32,
    pub world_min_y: i32,
    pub delivery: DeliveryMode,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sandbox: SandboxConfig::default(),
            rcon: RconSettings::default(),
            grid: PlotGridConfig::default(),
            structure_dir: PathBuf::from("world/generated"),
            structure_namespace: "plotcraft".to_string(),
            data_version: DATA_VERSION,
            world_min_y: WORLD_MIN_Y,
            delivery: DeliveryMode::Structure,
        }
    }
}

impl AppConfig {
    /// Load from an optional JSON file, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, Error> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                serde_json::from_str(&text)
                    .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?
            }
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), Error> {
        if let Ok(host) = std::env::var("RCON_HOST") {
            self.rcon.host = host;
        }
        if let Ok(port) = std::env::var("RCON_PORT") {
            self.rcon.port = port
                .parse()
                .map_err(|_| Error::Config(format!("RCON_PORT is not a port number: {}", port)))?;
        }
        if let Ok(password) = std::env::var("RCON_PASSWORD") {
            self.rcon.password = password;
        }
        if let Ok(dir) = std::env::var("PLOTCRAFT_STRUCTURE_DIR") {
            self.structure_dir = PathBuf::from(dir);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.sandbox.limits.max_blocks, 500_000);
        assert_eq!(config.sandbox.limits.max_radius, 50);
        assert_eq!(config.rcon.pool_size, 4);
        assert_eq!(config.sandbox.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "sandbox": { "limits": { "max_radius": 20 } }, "rcon": { "port": 25580 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.sandbox.limits.max_radius, 20);
        assert_eq!(config.sandbox.limits.max_blocks, 500_000);
        assert_eq!(config.rcon.port, 25580);
        assert_eq!(config.rcon.client_config().port, 25580);
        assert_eq!(config.delivery, DeliveryMode::Structure);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plotcraft.json");
        std::fs::write(&path, r#"{ "structure_namespace": "test" }"#).unwrap();

        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.structure_namespace, "test");
    }

    #[test]
    fn test_load_rejects_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(AppConfig::load(Some(&path)), Err(Error::Config(_))));
    }
}
