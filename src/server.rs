//! WebSocket sync server.
//!
//! Architecture:
//! ```text
//! Client A ──┐                        ┌── writer task ──▶ Client A
//!             ├──▶ ClientHandler ──▶ CheckboxStore        ▲
//! Client B ──┘         │                  │               │
//!                 ConnectionRegistry ◀────┴── DiffScheduler (per window)
//! ```
//!
//! One task per connection reads frames and feeds the handler; a writer
//! task per connection drains its outbound channel into the WebSocket
//! sink. The diff scheduler broadcasts batched state changes through the
//! registry once per window. A faulted connection (bad frame, dead socket)
//! is closed and unregistered without disturbing the rest.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{ConnectionRegistry, Frame};
use crate::config::Config;
use crate::diff::{DiffScheduler, ShutdownHandle, ShutdownSignal};
use crate::handler::{ClientHandler, SyncContext};
use crate::store::CheckboxStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Number of cells in the shared array
    pub num_of_checkboxes: usize,
    /// Diff broadcast window in milliseconds
    pub broadcast_diff_window_ms: u64,
    /// Outbound frames buffered per connection
    pub frame_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            num_of_checkboxes: 1_000_000,
            broadcast_diff_window_ms: 1_000,
            frame_buffer: 256,
        }
    }
}

impl From<Config> for ServerConfig {
    fn from(config: Config) -> Self {
        Self {
            bind_addr: config.bind_addr,
            num_of_checkboxes: config.num_of_checkboxes,
            broadcast_diff_window_ms: config.broadcast_diff_window_ms,
            ..Self::default()
        }
    }
}

/// The sync server.
pub struct SyncServer {
    config: ServerConfig,
    ctx: Arc<SyncContext>,
    shutdown: ShutdownHandle,
    signal: ShutdownSignal,
}

impl SyncServer {
    /// Create a new server with the given configuration.
    ///
    /// The cell count must fit the wire protocol's 24-bit index space;
    /// `Config::from_env` already enforces this, so a wider value here is
    /// a programming error.
    pub fn new(config: ServerConfig) -> Self {
        assert!(
            config.num_of_checkboxes <= crate::protocol::MAX_INDEX as usize + 1,
            "cell count {} exceeds the 24-bit index range",
            config.num_of_checkboxes
        );
        let store = Arc::new(CheckboxStore::new(config.num_of_checkboxes));
        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = Arc::new(SyncContext::new(store, registry));
        let (shutdown, signal) = ShutdownHandle::new();
        Self { config, ctx, shutdown, signal }
    }

    /// Create with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default())
    }

    /// The shared collaborators (store + registry).
    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    /// Handle for requesting graceful shutdown from another task.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    pub fn bind_addr(&self) -> &str {
        &self.config.bind_addr
    }

    /// Run the accept loop and the diff scheduler until shutdown.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("sync server listening on {}", self.config.bind_addr);

        let scheduler = DiffScheduler::new(
            self.ctx.store.clone(),
            self.ctx.registry.clone(),
            Duration::from_millis(self.config.broadcast_diff_window_ms),
        );
        tokio::spawn(scheduler.run(self.signal.clone()));

        let mut signal = self.signal.clone();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, addr) = accepted?;
                    log::debug!("new TCP connection from {addr}");

                    let handler = ClientHandler::new(self.ctx.clone());
                    let frame_buffer = self.config.frame_buffer;
                    tokio::spawn(async move {
                        if let Err(e) =
                            handle_connection(stream, addr, handler, frame_buffer).await
                        {
                            log::error!("connection error from {addr}: {e}");
                        }
                    });
                }
                _ = signal.cancelled() => {
                    log::info!("sync server stopped");
                    return Ok(());
                }
            }
        }
    }
}

/// Handle a single WebSocket connection.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handler: ClientHandler,
    frame_buffer: usize,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let id = Uuid::new_v4();
    log::info!("WebSocket connection {id} established from {addr}");

    // Writer task: drains this connection's outbound channel into the
    // sink. It exits once every sender clone (registry + handshake) is
    // gone, which closes the socket.
    let (sender, mut frames) = mpsc::channel::<Frame>(frame_buffer);
    tokio::spawn(async move {
        while let Some(frame) = frames.recv().await {
            if ws_sender
                .send(Message::Binary(frame.to_vec().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    handler.on_connect(id, sender).await?;

    while let Some(msg) = ws_receiver.next().await {
        match msg {
            Ok(Message::Binary(data)) => {
                let bytes: Vec<u8> = data.into();
                if let Err(e) = handler.on_message(&bytes, id).await {
                    // Faulted connection: close it, leave the rest alone.
                    log::warn!("closing connection {id} from {addr}: {e}");
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                log::info!("connection {id} closed by peer");
                break;
            }
            // tungstenite answers pings at the protocol level
            Ok(_) => {}
            Err(e) => {
                log::warn!("WebSocket error on connection {id}: {e}");
                break;
            }
        }
    }

    handler.on_disconnect(id).await;
    Ok(())
}
