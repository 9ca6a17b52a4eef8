//! Per-plot mutual exclusion
//!
//! Clearing, decorating and placing on one plot must not interleave with
//! another build of the same plot. Builds on different plots never wait on
//! each other.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use super::grid::PlotId;

/// Registry of one async lock per plot, created on first use
#[derive(Default)]
pub struct PlotLocks {
    locks: Mutex<HashMap<PlotId, Arc<AsyncMutex<()>>>>,
}

impl PlotLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to a plot. Access ends when the guard drops.
    pub async fn lock(&self, id: PlotId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Lock a plot only if nobody holds it
    pub fn try_lock(&self, id: PlotId) -> Option<OwnedMutexGuard<()>> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(id).or_default().clone()
        };
        lock.try_lock_owned().ok()
    }

    /// Number of plots with a lock entry
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop entries nobody is holding or waiting on
    pub fn prune(&self) {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_plot_serializes() {
        let locks = Arc::new(PlotLocks::new());
        let id = PlotId::new(0, 0);

        let guard = locks.lock(id).await;
        assert!(locks.try_lock(id).is_none());

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_different_plots_are_independent() {
        let locks = PlotLocks::new();
        let _a = locks.lock(PlotId::new(0, 0)).await;
        let b = tokio::time::timeout(Duration::from_millis(100), locks.lock(PlotId::new(1, 0))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_prune_keeps_held_locks() {
        let locks = PlotLocks::new();
        let held = locks.lock(PlotId::new(0, 0)).await;
        drop(locks.lock(PlotId::new(1, 0)).await);
        assert_eq!(locks.len(), 2);

        locks.prune();
        assert_eq!(locks.len(), 1);
        drop(held);
        locks.prune();
        assert!(locks.is_empty());
    }
}
