//! Inbound message dispatch.
//!
//! The transport layer hands this module opaque byte frames; it decodes
//! them, applies TOGGLEs to the store, and performs the INIT handshake for
//! new connections. Errors are scoped to the offending connection — the
//! server loop logs them and closes that one socket, nothing else.

use std::sync::Arc;

use crate::broadcast::{ConnectionId, ConnectionRegistry, FrameSender};
use crate::protocol::{ClientMessage, ProtocolError, ServerMessage};
use crate::store::{CheckboxStore, StoreError};

/// The collaborators wired up once at process start and injected into
/// every component. No ambient globals.
pub struct SyncContext {
    pub store: Arc<CheckboxStore>,
    pub registry: Arc<ConnectionRegistry>,
}

impl SyncContext {
    pub fn new(store: Arc<CheckboxStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }
}

/// Decodes client frames and mutates the store.
pub struct ClientHandler {
    ctx: Arc<SyncContext>,
}

impl ClientHandler {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        Self { ctx }
    }

    /// Register a new connection and send it the full current state.
    pub async fn on_connect(
        &self,
        id: ConnectionId,
        sender: FrameSender,
    ) -> Result<(), HandlerError> {
        self.ctx.registry.register(id, sender).await;

        let snapshot = self.ctx.store.snapshot().await;
        let frame = ServerMessage::init_from_cells(&snapshot).encode();
        self.ctx.registry.send_to(id, Arc::new(frame)).await?;
        log::info!("connection {id} initialized with {} cells", snapshot.len());
        Ok(())
    }

    /// Remove a connection on disconnect.
    pub async fn on_disconnect(&self, id: ConnectionId) {
        self.ctx.registry.unregister(id).await;
        log::info!("connection {id} unregistered");
    }

    /// Dispatch one inbound frame.
    ///
    /// The per-toggle TOGGLED broadcast of the pre-diff protocol is gone:
    /// the diff scheduler picks the write up at the next window boundary
    /// and fans it out batched.
    pub async fn on_message(
        &self,
        bytes: &[u8],
        from: ConnectionId,
    ) -> Result<(), HandlerError> {
        match ClientMessage::decode(bytes)? {
            ClientMessage::Toggle { index, value } => {
                log::debug!("connection {from}: toggle {index} -> {value}");
                self.ctx.store.set(index as usize, value).await?;
                Ok(())
            }
        }
    }
}

/// Errors surfaced to the connection loop.
///
/// None of these are process-fatal; each faults only the connection whose
/// frame produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    Protocol(ProtocolError),
    Store(StoreError),
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
            Self::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Protocol(e) => Some(e),
            Self::Store(e) => Some(e),
        }
    }
}

impl From<ProtocolError> for HandlerError {
    fn from(e: ProtocolError) -> Self {
        Self::Protocol(e)
    }
}

impl From<StoreError> for HandlerError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}
