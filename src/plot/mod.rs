//! Plot grid and per-plot locking

pub mod grid;
pub mod locks;

pub use grid::{PlotGrid, PlotGridConfig, PlotId, spiral};
pub use locks::PlotLocks;
