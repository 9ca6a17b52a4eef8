//! In-process RCON server for tests

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use crate::client::RconConfig;
use crate::protocol::{self, AUTH_FAILURE_ID, Packet, PacketKind};

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

struct MockState {
    password: String,
    responder: Responder,
    commands: Mutex<Vec<String>>,
    drop_next: AtomicUsize,
    opened: AtomicUsize,
    closed: AtomicUsize,
}

/// Minimal RCON server: checks the password, records commands and answers
/// with `ok: <command>` unless a custom responder is installed.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    handle: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(password: &str) -> std::io::Result<Self> {
        Self::start_with(password, |cmd| format!("ok: {}", cmd)).await
    }

    pub async fn start_with<F>(password: &str, responder: F) -> std::io::Result<Self>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(MockState {
            password: password.to_string(),
            responder: Box::new(responder),
            commands: Mutex::new(Vec::new()),
            drop_next: AtomicUsize::new(0),
            opened: AtomicUsize::new(0),
            closed: AtomicUsize::new(0),
        });

        let accept_state = state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                accept_state.opened.fetch_add(1, Ordering::SeqCst);
                let conn_state = accept_state.clone();
                tokio::spawn(async move {
                    serve(stream, &conn_state).await;
                    conn_state.closed.fetch_add(1, Ordering::SeqCst);
                });
            }
        });

        Ok(Self { addr, state, handle })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Client configuration pointing at this server with fast retries.
    pub fn config(&self, password: &str) -> RconConfig {
        RconConfig {
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            password: password.to_string(),
            max_retries: 5,
            retry_delay: Duration::from_millis(5),
            connect_timeout: Duration::from_secs(2),
            io_timeout: Duration::from_millis(500),
            throttle_every: 500,
            throttle_pause: Duration::from_millis(1),
        }
    }

    /// Commands executed so far, in arrival order.
    pub fn commands(&self) -> Vec<String> {
        self.state
            .commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drop the connection instead of answering the next `n` commands.
    pub fn drop_next_commands(&self, n: usize) {
        self.state.drop_next.store(n, Ordering::SeqCst);
    }

    pub fn connections_opened(&self) -> usize {
        self.state.opened.load(Ordering::SeqCst)
    }

    pub fn connections_closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Wait (bounded) until at least `n` connections have been closed.
    pub async fn wait_for_closed(&self, n: usize) {
        for _ in 0..200 {
            if self.connections_closed() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve(mut stream: TcpStream, state: &MockState) {
    loop {
        let Ok(packet) = protocol::read_packet(&mut stream).await else {
            return;
        };

        let reply = match packet.kind {
            PacketKind::Auth => {
                let id = if packet.payload == state.password {
                    packet.request_id
                } else {
                    AUTH_FAILURE_ID
                };
                Packet::new(id, PacketKind::ExecCommand, "")
            }
            PacketKind::ExecCommand => {
                let dropped = state
                    .drop_next
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if dropped {
                    return;
                }
                state
                    .commands
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(packet.payload.clone());
                Packet::new(
                    packet.request_id,
                    PacketKind::ResponseValue,
                    (state.responder)(&packet.payload),
                )
            }
            _ => continue,
        };

        if protocol::write_packet(&mut stream, &reply).await.is_err() {
            return;
        }
    }
}
