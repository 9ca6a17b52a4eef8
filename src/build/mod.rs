//! Build pipeline: script in, blocks on a plot out
//!
//! The service runs a script in the sandbox, clips the result to the plot,
//! resets the plot and delivers the voxels either as a structure template
//! or as plain fill commands.

pub mod service;

use serde::{Deserialize, Serialize};

use crate::compile::{BuildOrigin, BuildableBounds};
use crate::plot::PlotId;
use crate::structure::StructureHandle;

pub use service::BuildService;

/// How voxels reach the server
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Write a structure file and issue one `place template`
    #[default]
    Structure,
    /// Compile to regions and issue one command per region
    Commands,
}

/// One build of one plot
#[derive(Clone, Debug)]
pub struct BuildRequest {
    pub plot: PlotId,
    pub script: String,
    /// Defaults to the plot's buildable origin
    pub origin: Option<BuildOrigin>,
    /// Defaults to the plot's footprint
    pub bounds: Option<BuildableBounds>,
    /// Structure name; defaults to one derived from the plot
    pub name: Option<String>,
}

impl BuildRequest {
    pub fn new(plot: PlotId, script: impl Into<String>) -> Self {
        Self {
            plot,
            script: script.into(),
            origin: None,
            bounds: None,
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_origin(mut self, origin: BuildOrigin) -> Self {
        self.origin = Some(origin);
        self
    }

    pub fn with_bounds(mut self, bounds: BuildableBounds) -> Self {
        self.bounds = Some(bounds);
        self
    }

    /// Structure name used when none was given
    pub fn structure_name(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| format!("plot_{}_{}", self.plot.x, self.plot.z))
    }
}

/// What happened to a build
#[derive(Clone, Debug, Default)]
pub struct BuildOutcome {
    pub success: bool,
    /// Voxels the script produced
    pub block_count: usize,
    /// Console commands the server acknowledged
    pub commands_executed: usize,
    /// Template placed in structure mode; its file is already removed
    pub handle: Option<StructureHandle>,
    /// User-facing reason when `success` is false
    pub error: Option<String>,
}

impl BuildOutcome {
    fn failed(block_count: usize, commands_executed: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            block_count,
            commands_executed,
            handle: None,
            error: Some(error.into()),
        }
    }
}
