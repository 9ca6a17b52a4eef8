//! Fixed-size pool of RCON connections
//!
//! Callers suspend in [`RconPool::acquire`] until a connection is free, which
//! bounds the number of in-flight console commands to the pool size.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::client::{RconClient, RconConfig};
use crate::error::{RconError, Result};

/// Default number of errors tolerated by [`RconPool::batch`]
pub const DEFAULT_MAX_BATCH_ERRORS: usize = 10;

struct PoolInner {
    idle: Mutex<VecDeque<RconClient>>,
    permits: Arc<Semaphore>,
    closed: AtomicBool,
}

impl PoolInner {
    fn idle(&self) -> MutexGuard<'_, VecDeque<RconClient>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Outcome of [`RconPool::batch`]
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Commands the server acknowledged without an error message
    pub executed: usize,
    /// `command: message` for every command the server rejected
    pub errors: Vec<String>,
    /// Transport failure that stopped the batch
    pub fatal: Option<RconError>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.fatal.is_none()
    }
}

/// Pool of lazily-connected RCON clients
#[derive(Clone)]
pub struct RconPool {
    inner: Arc<PoolInner>,
    size: usize,
    max_batch_errors: usize,
}

impl RconPool {
    pub fn new(config: RconConfig, size: usize) -> Self {
        let size = size.max(1);
        let idle = (0..size).map(|_| RconClient::new(config.clone())).collect();
        log::info!("RCON pool initialized with {} connections to {}", size, config.address());

        Self {
            inner: Arc::new(PoolInner {
                idle: Mutex::new(idle),
                permits: Arc::new(Semaphore::new(size)),
                closed: AtomicBool::new(false),
            }),
            size,
            max_batch_errors: DEFAULT_MAX_BATCH_ERRORS,
        }
    }

    /// Override how many rejected commands a batch tolerates.
    pub fn with_max_batch_errors(mut self, max: usize) -> Self {
        self.max_batch_errors = max;
        self
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Connections not currently checked out.
    pub fn available(&self) -> usize {
        self.inner.permits.available_permits()
    }

    /// Wait for a free connection.
    pub async fn acquire(&self) -> Result<PooledClient> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| RconError::PoolClosed)?;
        let client = self.inner.idle().pop_front().ok_or(RconError::PoolClosed)?;

        Ok(PooledClient {
            client: Some(client),
            pool: self.inner.clone(),
            _permit: permit,
        })
    }

    /// Run one command on any free connection.
    pub async fn command(&self, text: &str) -> Result<String> {
        let mut client = self.acquire().await?;
        client.command(text).await
    }

    /// Like [`command`](Self::command) but logs and swallows the error.
    pub async fn command_safe(&self, text: &str, label: &str) -> Option<String> {
        match self.command(text).await {
            Ok(output) => Some(output),
            Err(e) => {
                log::warn!("[{}] RCON error: {}", label, e);
                None
            }
        }
    }

    /// Run commands in order on one connection.
    ///
    /// Server-side rejections accumulate until they exceed the error budget;
    /// a transport failure (retries exhausted, auth refused) stops the batch
    /// immediately so nothing after the failure point is sent.
    pub async fn batch<S: AsRef<str>>(&self, commands: &[S], label: &str) -> BatchReport {
        let mut report = BatchReport::default();
        let mut client = match self.acquire().await {
            Ok(client) => client,
            Err(e) => {
                report.fatal = Some(e);
                return report;
            }
        };

        for cmd in commands {
            let cmd = cmd.as_ref();
            match client.command(cmd).await {
                Ok(output) if looks_like_command_error(&output) => {
                    report.errors.push(format!("{}: {}", cmd, output.trim()));
                    if report.errors.len() > self.max_batch_errors {
                        log::warn!("[{}] batch stopped after {} errors", label, report.errors.len());
                        break;
                    }
                }
                Ok(_) => report.executed += 1,
                Err(e) => {
                    log::error!("[{}] batch aborted at '{}': {}", label, cmd, e);
                    report.fatal = Some(e);
                    break;
                }
            }
        }

        log::debug!(
            "[{}] batch: {}/{} executed, {} errors",
            label,
            report.executed,
            commands.len(),
            report.errors.len()
        );
        report
    }

    /// Disconnect every idle client and refuse further acquisitions.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.permits.close();
        for client in self.inner.idle().iter_mut() {
            client.disconnect();
        }
        log::info!("RCON pool closed");
    }
}

/// Heuristic used by the game server's console output for a failed command.
pub fn looks_like_command_error(output: &str) -> bool {
    let lower = output.to_ascii_lowercase();
    lower.contains("unknown") || lower.contains("error") || lower.contains("incorrect argument")
}

/// A checked-out connection; returned to the pool on drop.
pub struct PooledClient {
    client: Option<RconClient>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for PooledClient {
    type Target = RconClient;

    fn deref(&self) -> &RconClient {
        self.client.as_ref().expect("pooled client present until drop")
    }
}

impl DerefMut for PooledClient {
    fn deref_mut(&mut self) -> &mut RconClient {
        self.client.as_mut().expect("pooled client present until drop")
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(mut client) = self.client.take() {
            if self.pool.closed.load(Ordering::SeqCst) {
                client.disconnect();
            }
            // Returned before the permit is released so acquire always finds it
            self.pool.idle().push_back(client);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_command() {
        let server = MockServer::start("pw").await.unwrap();
        let pool = RconPool::new(server.config("pw"), 2);

        assert_eq!(pool.command("list").await.unwrap(), "ok: list");
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn test_acquire_blocks_when_exhausted() {
        let server = MockServer::start("pw").await.unwrap();
        let pool = RconPool::new(server.config("pw"), 1);

        let held = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        let waiting = tokio::time::timeout(Duration::from_millis(50), pool.acquire()).await;
        assert!(waiting.is_err());

        drop(held);
        let again = tokio::time::timeout(Duration::from_millis(500), pool.acquire()).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_commands_share_pool() {
        let server = MockServer::start("pw").await.unwrap();
        let pool = RconPool::new(server.config("pw"), 2);

        let mut handles = Vec::new();
        for i in 0..8 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.command(&format!("say {}", i)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(server.commands().len(), 8);
        assert!(server.connections_opened() <= 2);
    }

    #[tokio::test]
    async fn test_batch_collects_rejections() {
        let server = MockServer::start_with("pw", |cmd| {
            if cmd.starts_with("bad") {
                "Unknown or incomplete command".to_string()
            } else {
                String::new()
            }
        })
        .await
        .unwrap();
        let pool = RconPool::new(server.config("pw"), 1);

        let report = pool.batch(&["fill 0 0 0 1 1 1 stone", "bad one", "setblock 0 0 0 dirt"], "test").await;
        assert_eq!(report.executed, 2);
        assert_eq!(report.errors.len(), 1);
        assert!(report.fatal.is_none());
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_batch_stops_past_error_budget() {
        let server = MockServer::start_with("pw", |_| "error".to_string()).await.unwrap();
        let pool = RconPool::new(server.config("pw"), 1).with_max_batch_errors(2);

        let commands: Vec<String> = (0..10).map(|i| format!("cmd {}", i)).collect();
        let report = pool.batch(&commands, "test").await;

        assert_eq!(report.errors.len(), 3);
        assert_eq!(server.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_batch_aborts_on_auth_failure() {
        let server = MockServer::start("pw").await.unwrap();
        let pool = RconPool::new(server.config("nope"), 1);

        let report = pool.batch(&["a", "b"], "test").await;
        assert!(matches!(report.fatal, Some(RconError::AuthenticationFailed)));
        assert_eq!(report.executed, 0);
        assert!(server.commands().is_empty());
    }

    #[tokio::test]
    async fn test_closed_pool_rejects_acquire() {
        let server = MockServer::start("pw").await.unwrap();
        let pool = RconPool::new(server.config("pw"), 1);
        pool.close();

        assert!(matches!(pool.acquire().await, Err(RconError::PoolClosed)));
    }

    #[test]
    fn test_command_error_heuristic() {
        assert!(looks_like_command_error("Unknown block type 'minecraft:nope'"));
        assert!(looks_like_command_error("Incorrect argument for command"));
        assert!(!looks_like_command_error("Successfully filled 27 block(s)"));
    }
}
