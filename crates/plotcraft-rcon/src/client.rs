//! Single RCON connection with authentication, retry and throttling

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::error::{RconError, Result};
use crate::protocol::{self, AUTH_FAILURE_ID, Packet, PacketKind};

/// Connection settings for one RCON client
#[derive(Clone, Debug)]
pub struct RconConfig {
    /// Server host name or address
    pub host: String,
    /// Server RCON port
    pub port: u16,
    /// Shared secret sent in the auth packet
    pub password: String,
    /// Attempts per command before giving up
    pub max_retries: u32,
    /// Base backoff; attempt `n` waits `retry_delay * n`
    pub retry_delay: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    /// Per-packet read/write timeout
    pub io_timeout: Duration,
    /// Pause after every N successful commands (0 disables)
    pub throttle_every: u64,
    /// Length of the throttle pause
    pub throttle_pause: Duration,
}

impl Default for RconConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: crate::DEFAULT_PORT,
            password: String::new(),
            max_retries: 5,
            retry_delay: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(15),
            io_timeout: Duration::from_secs(15),
            throttle_every: 500,
            throttle_pause: Duration::from_millis(100),
        }
    }
}

impl RconConfig {
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Connection lifecycle. Any error drops straight back to `Disconnected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Authenticating,
    Ready,
}

/// One authenticated socket session with the remote console.
///
/// Not shareable: a client serves one in-flight command at a time.
pub struct RconClient {
    config: RconConfig,
    stream: Option<TcpStream>,
    state: ConnectionState,
    request_id: i32,
    commands_since_throttle: u64,
}

impl RconClient {
    pub fn new(config: RconConfig) -> Self {
        Self {
            config,
            stream: None,
            state: ConnectionState::Disconnected,
            request_id: 0,
            commands_since_throttle: 0,
        }
    }

    pub fn config(&self) -> &RconConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Open a fresh socket and authenticate.
    ///
    /// An echoed request id of `-1` tears the socket down and yields
    /// [`RconError::AuthenticationFailed`].
    pub async fn connect(&mut self) -> Result<()> {
        self.disconnect();

        let addr = self.config.address();
        let stream = timeout(self.config.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| RconError::Timeout("connect"))??;
        stream.set_nodelay(true)?;
        self.stream = Some(stream);
        self.state = ConnectionState::Authenticating;

        let password = self.config.password.clone();
        match self.authenticate(&password).await {
            Ok(()) => {
                self.state = ConnectionState::Ready;
                self.commands_since_throttle = 0;
                log::debug!("RCON connected to {}", addr);
                Ok(())
            }
            Err(e) => {
                self.disconnect();
                if matches!(e, RconError::AuthenticationFailed) {
                    log::error!("RCON authentication to {} refused", addr);
                }
                Err(e)
            }
        }
    }

    async fn authenticate(&mut self, password: &str) -> Result<()> {
        let id = self.next_request_id();
        self.send(&Packet::new(id, PacketKind::Auth, password)).await?;

        let mut response = self.receive().await?;
        // Some servers send an empty RESPONSE_VALUE ahead of the auth reply
        if response.kind == PacketKind::ResponseValue && response.request_id == id {
            response = self.receive().await?;
        }

        if response.request_id == AUTH_FAILURE_ID {
            return Err(RconError::AuthenticationFailed);
        }
        if response.request_id != id {
            return Err(RconError::MalformedPacket(format!(
                "auth response id {} does not match request {}",
                response.request_id, id
            )));
        }
        Ok(())
    }

    /// Close the socket, if any.
    pub fn disconnect(&mut self) {
        if self.stream.take().is_some() {
            log::debug!("RCON disconnected from {}", self.config.address());
        }
        self.state = ConnectionState::Disconnected;
    }

    /// Run a command, reconnecting and retrying transient failures with
    /// linearly increasing backoff.
    pub async fn command(&mut self, text: &str) -> Result<String> {
        let max_retries = self.config.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_retries {
            match self.try_command(text).await {
                Ok(output) => {
                    self.throttle().await;
                    return Ok(output);
                }
                Err(e) => {
                    self.disconnect();
                    if !e.is_transient() {
                        return Err(e);
                    }
                    log::warn!(
                        "RCON command failed (attempt {}/{}): {}",
                        attempt,
                        max_retries,
                        e
                    );
                    last_error = e.to_string();
                    if attempt < max_retries {
                        sleep(self.config.retry_delay * attempt).await;
                    }
                }
            }
        }

        Err(RconError::DeliveryFailed {
            attempts: max_retries,
            last: last_error,
        })
    }

    async fn try_command(&mut self, text: &str) -> Result<String> {
        if self.state != ConnectionState::Ready {
            self.connect().await?;
        }

        let id = self.next_request_id();
        self.send(&Packet::new(id, PacketKind::ExecCommand, text)).await?;
        let response = self.receive().await?;
        if response.request_id != id {
            return Err(RconError::MalformedPacket(format!(
                "response id {} does not match request {}",
                response.request_id, id
            )));
        }
        Ok(response.payload)
    }

    /// Cheap liveness check; reconnects when it fails.
    pub async fn ensure_connected(&mut self) -> Result<()> {
        if self.state == ConnectionState::Ready && self.try_command("list").await.is_ok() {
            return Ok(());
        }
        self.disconnect();
        self.connect().await
    }

    async fn throttle(&mut self) {
        self.commands_since_throttle += 1;
        let every = self.config.throttle_every;
        if every > 0 && self.commands_since_throttle % every == 0 {
            log::trace!("RCON throttle after {} commands", self.commands_since_throttle);
            sleep(self.config.throttle_pause).await;
        }
    }

    fn next_request_id(&mut self) -> i32 {
        // Wraps before i32::MAX and never produces 0 or the failure sentinel
        self.request_id = if self.request_id >= i32::MAX - 1 {
            1
        } else {
            self.request_id + 1
        };
        self.request_id
    }

    async fn send(&mut self, packet: &Packet) -> Result<()> {
        let io_timeout = self.config.io_timeout;
        let stream = self.stream.as_mut().ok_or(RconError::NotConnected)?;
        timeout(io_timeout, protocol::write_packet(stream, packet))
            .await
            .map_err(|_| RconError::Timeout("write"))?
    }

    async fn receive(&mut self) -> Result<Packet> {
        let io_timeout = self.config.io_timeout;
        let stream = self.stream.as_mut().ok_or(RconError::NotConnected)?;
        timeout(io_timeout, protocol::read_packet(stream))
            .await
            .map_err(|_| RconError::Timeout("read"))?
    }
}

impl Drop for RconClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockServer;
    use std::time::Instant;

    #[tokio::test]
    async fn test_connect_and_command() {
        let server = MockServer::start("hunter2").await.unwrap();
        let mut client = RconClient::new(server.config("hunter2"));

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);

        let output = client.command("list").await.unwrap();
        assert_eq!(output, "ok: list");
        assert_eq!(server.commands(), vec!["list".to_string()]);
    }

    #[tokio::test]
    async fn test_command_connects_lazily() {
        let server = MockServer::start("pw").await.unwrap();
        let mut client = RconClient::new(server.config("pw"));
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.command("time set day").await.unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
    }

    #[tokio::test]
    async fn test_bad_password_leaves_no_socket() {
        let server = MockServer::start("right").await.unwrap();
        let mut client = RconClient::new(server.config("wrong"));

        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, RconError::AuthenticationFailed));
        assert!(!client.is_connected());
        assert_eq!(client.state(), ConnectionState::Disconnected);

        server.wait_for_closed(1).await;
        assert_eq!(server.connections_closed(), server.connections_opened());
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let server = MockServer::start("right").await.unwrap();
        let mut client = RconClient::new(server.config("wrong"));

        let err = client.command("list").await.unwrap_err();
        assert!(matches!(err, RconError::AuthenticationFailed));
        assert_eq!(server.connections_opened(), 1);
        assert!(server.commands().is_empty());
    }

    #[tokio::test]
    async fn test_retry_reconnects_after_dropped_connection() {
        let server = MockServer::start("pw").await.unwrap();
        server.drop_next_commands(2);
        let mut client = RconClient::new(server.config("pw"));

        let output = client.command("say hi").await.unwrap();
        assert_eq!(output, "ok: say hi");
        assert_eq!(server.connections_opened(), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let server = MockServer::start("pw").await.unwrap();
        server.drop_next_commands(10);
        let mut config = server.config("pw");
        config.max_retries = 3;
        let mut client = RconClient::new(config);

        let err = client.command("say hi").await.unwrap_err();
        match err {
            RconError::DeliveryFailed { attempts, .. } => assert_eq!(attempts, 3),
            other => panic!("unexpected error: {other}"),
        }
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_connection_refused_is_delivery_failure() {
        let server = MockServer::start("pw").await.unwrap();
        let mut config = server.config("pw");
        drop(server);
        config.max_retries = 2;

        let mut client = RconClient::new(config);
        let err = client.command("list").await.unwrap_err();
        assert!(matches!(err, RconError::DeliveryFailed { attempts: 2, .. }));
    }

    #[tokio::test]
    async fn test_throttle_pauses_every_n_commands() {
        let server = MockServer::start("pw").await.unwrap();
        let mut config = server.config("pw");
        config.throttle_every = 2;
        config.throttle_pause = Duration::from_millis(150);
        let mut client = RconClient::new(config);
        client.connect().await.unwrap();

        let start = Instant::now();
        client.command("list").await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(150));

        for _ in 0..3 {
            client.command("list").await.unwrap();
        }
        // Paused after the 2nd and the 4th command
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(server.commands().len(), 4);
    }

    #[tokio::test]
    async fn test_backoff_grows_with_attempt() {
        let server = MockServer::start("pw").await.unwrap();
        server.drop_next_commands(2);
        let mut config = server.config("pw");
        config.retry_delay = Duration::from_millis(100);
        let mut client = RconClient::new(config);

        let start = Instant::now();
        client.command("say hi").await.unwrap();
        // 100ms after the first failure, 200ms after the second
        assert!(start.elapsed() >= Duration::from_millis(300));
        assert_eq!(server.connections_opened(), 3);
    }

    #[test]
    fn test_request_id_wraps() {
        let mut client = RconClient::new(RconConfig::default());
        client.request_id = i32::MAX - 1;
        assert_eq!(client.next_request_id(), 1);
        assert_eq!(client.next_request_id(), 2);
    }
}
