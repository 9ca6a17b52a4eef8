//! Build service: sandbox, plot reset and delivery for one plot at a time

use std::sync::Arc;
use std::time::Instant;

use glam::IVec3;
use plotcraft_rcon::RconPool;
use plotcraft_rcon::pool::looks_like_command_error;
use tokio::sync::Semaphore;

use super::{BuildOutcome, BuildRequest, DeliveryMode};
use crate::compile::commands::{place_template_command, region_commands};
use crate::compile::{BuildOrigin, BuildableBounds, compile, place, split_oversized};
use crate::core::config::AppConfig;
use crate::core::{Error, Result};
use crate::plot::{PlotGrid, PlotId, PlotLocks};
use crate::script::{Sandbox, SandboxFailure, SandboxOutput, ScriptError};
use crate::structure::{StructureDocument, StructureError, StructureHandle, StructureStore, structure_offset};
use crate::voxel::VoxelCanvas;

/// Owns everything a build touches: the console pool, the plot layout and
/// locks, the structure store and the script workers.
pub struct BuildService {
    config: AppConfig,
    pool: RconPool,
    grid: PlotGrid,
    locks: PlotLocks,
    store: StructureStore,
    sandbox: Arc<Sandbox>,
    workers: Semaphore,
}

impl BuildService {
    /// Service with a fresh RCON pool built from `config.rcon`
    pub fn new(config: AppConfig) -> Result<Self> {
        let pool = RconPool::new(config.rcon.client_config(), config.rcon.pool_size);
        Self::with_pool(config, pool)
    }

    pub fn with_pool(config: AppConfig, pool: RconPool) -> Result<Self> {
        let grid = PlotGrid::new(config.grid.clone())?;
        let store = StructureStore::new(
            config.structure_dir.clone(),
            config.structure_namespace.clone(),
        );
        let sandbox = Arc::new(Sandbox::new(config.sandbox.clone()));
        let workers = Semaphore::new(config.sandbox.max_workers.max(1));

        log::info!(
            "Build service ready: {:?} delivery, {} script workers",
            config.delivery,
            config.sandbox.max_workers.max(1)
        );

        Ok(Self {
            config,
            pool,
            grid,
            locks: PlotLocks::new(),
            store,
            sandbox,
            workers,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn grid(&self) -> &PlotGrid {
        &self.grid
    }

    pub fn pool(&self) -> &RconPool {
        &self.pool
    }

    pub fn store(&self) -> &StructureStore {
        &self.store
    }

    pub fn locks(&self) -> &PlotLocks {
        &self.locks
    }

    /// Execute a script on a blocking worker. At most `max_workers`
    /// scripts run at once; further callers wait for a slot.
    pub async fn run_script(&self, script: &str) -> std::result::Result<SandboxOutput, SandboxFailure> {
        let _permit = self.workers.acquire().await.map_err(|_| {
            SandboxFailure::new(ScriptError::Runtime("script workers shut down".to_string()))
        })?;

        let sandbox = self.sandbox.clone();
        let source = script.to_string();
        match tokio::task::spawn_blocking(move || sandbox.run(&source)).await {
            Ok(result) => result,
            Err(e) => Err(SandboxFailure::new(ScriptError::Runtime(format!(
                "script worker failed: {}",
                e
            )))),
        }
    }

    /// Run the script, then reset the plot and place the result.
    ///
    /// Failures never panic or propagate; they come back as an outcome with
    /// `success == false` and a reason. A script that fails leaves the
    /// server untouched.
    pub async fn build(&self, request: BuildRequest) -> BuildOutcome {
        let start = Instant::now();
        let origin = request.origin.unwrap_or_else(|| self.grid.origin(request.plot));
        let bounds = request.bounds.unwrap_or_else(|| self.grid.plot_bounds(request.plot));

        let output = match self.run_script(&request.script).await {
            Ok(output) => output,
            Err(failure) => {
                log::info!("Build of plot {} failed: {}", request.plot, failure.error);
                let drawn = failure.partial.as_ref().map_or(0, VoxelCanvas::count);
                return BuildOutcome::failed(drawn, 0, failure.error.reason());
            }
        };

        let canvas = output.canvas.clipped(origin.as_ivec3(), &bounds);
        if canvas.count() < output.block_count {
            log::debug!(
                "Plot {}: {} voxels outside the footprint dropped",
                request.plot,
                output.block_count - canvas.count()
            );
        }

        let outcome = {
            let _guard = self.locks.lock(request.plot).await;
            self.place_locked(&request, &canvas, origin, &bounds, output.block_count)
                .await
        };
        self.locks.prune();

        if outcome.success {
            log::info!(
                "Built plot {} in {:.2?}: {} blocks, {} commands",
                request.plot,
                start.elapsed(),
                outcome.block_count,
                outcome.commands_executed
            );
        }
        outcome
    }

    /// Reset and deliver while the caller holds the plot lock
    async fn place_locked(
        &self,
        request: &BuildRequest,
        canvas: &VoxelCanvas,
        origin: BuildOrigin,
        bounds: &BuildableBounds,
        block_count: usize,
    ) -> BuildOutcome {
        let mut executed = 0;
        if let Err(e) = self.prepare(request.plot, &mut executed).await {
            return BuildOutcome::failed(block_count, executed, e.to_string());
        }

        let delivered = match self.config.delivery {
            DeliveryMode::Structure => {
                self.deliver_structure(request, canvas, origin, &mut executed)
                    .await
            }
            DeliveryMode::Commands => self
                .deliver_commands(canvas, origin, bounds, &mut executed)
                .await
                .map(|()| None),
        };

        match delivered {
            Ok(handle) => BuildOutcome {
                success: true,
                block_count,
                commands_executed: executed,
                handle,
                error: None,
            },
            Err(e) => {
                log::warn!("Delivery to plot {} failed: {}", request.plot, e);
                BuildOutcome::failed(block_count, executed, e.to_string())
            }
        }
    }

    /// Clear, floor and decorate a plot without building anything
    pub async fn reset_plot(&self, plot: PlotId) -> Result<usize> {
        let mut executed = 0;
        let prepared = {
            let _guard = self.locks.lock(plot).await;
            self.prepare(plot, &mut executed).await
        };
        self.locks.prune();
        prepared.map(|()| executed)
    }

    /// Refuse further builds and disconnect the console pool.
    pub fn close(&self) {
        self.workers.close();
        self.pool.close();
        self.locks.prune();
    }

    async fn prepare(&self, plot: PlotId, executed: &mut usize) -> Result<()> {
        let commands = self.grid.prep_commands(plot);
        let report = self.pool.batch(&commands, "Build prep").await;
        *executed += report.executed;
        if let Some(e) = report.fatal {
            return Err(e.into());
        }
        for error in &report.errors {
            log::warn!("Plot {} prep: {}", plot, error);
        }
        Ok(())
    }

    async fn deliver_structure(
        &self,
        request: &BuildRequest,
        canvas: &VoxelCanvas,
        origin: BuildOrigin,
        executed: &mut usize,
    ) -> Result<Option<StructureHandle>> {
        let document = match StructureDocument::from_canvas(canvas) {
            Ok(document) => document.with_data_version(self.config.data_version),
            Err(StructureError::Empty) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let handle = self.store.save(&request.structure_name(), &document).await?;

        let offset = structure_offset(canvas, origin.as_ivec3(), self.config.world_min_y);
        let command = place_template_command(&handle.template_id(), offset);
        let placed = self.pool.command(&command).await;

        // Spent whether or not placement succeeded
        if let Err(e) = self.store.remove(&handle).await {
            log::warn!("Could not remove structure {}: {}", handle.template_id(), e);
        }

        let output = placed?;
        if looks_like_command_error(&output) {
            return Err(Error::Rejected(format!("{}: {}", command, output.trim())));
        }
        *executed += 1;
        Ok(Some(handle))
    }

    async fn deliver_commands(
        &self,
        canvas: &VoxelCanvas,
        origin: BuildOrigin,
        bounds: &BuildableBounds,
        executed: &mut usize,
    ) -> Result<()> {
        let offset: IVec3 = origin.as_ivec3();
        let regions = split_oversized(place(&compile(canvas), offset, Some(bounds)));
        let commands = region_commands(&regions);

        let report = self.pool.batch(&commands, "Build place").await;
        *executed += report.executed;
        if let Some(e) = report.fatal {
            return Err(e.into());
        }
        if report.executed + report.errors.len() < commands.len() {
            let first = report.errors.first().cloned().unwrap_or_default();
            return Err(Error::Rejected(first));
        }
        for error in &report.errors {
            log::warn!("Build place: {}", error);
        }
        Ok(())
    }
}
