//! Connection registry and concurrent fan-out.
//!
//! Each live connection is represented by the sending half of an mpsc
//! channel; the receiving half is drained by that connection's writer task
//! into its WebSocket sink. Broadcasting snapshots the registry, then
//! enqueues the frame on every connection without waiting: a connection
//! whose buffer is full or whose writer is gone is faulted and
//! unregistered, and never holds up delivery to its siblings. Delivery to
//! each sibling is an independent outcome, collected after the fan-out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::ProtocolError;

/// Opaque handle for one live connection.
pub type ConnectionId = Uuid;

/// An outbound byte frame, shared across all receiving connections.
pub type Frame = Arc<Vec<u8>>;

/// Sending half of a connection's outbound frame channel.
pub type FrameSender = mpsc::Sender<Frame>;

/// Point-in-time view of delivery counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryStats {
    pub frames_sent: u64,
    pub frames_dropped: u64,
    pub active_connections: usize,
}

/// Delivery counters, tracked via atomics so the fan-out path never takes
/// an extra lock.
#[derive(Default)]
struct AtomicRegistryStats {
    frames_sent: AtomicU64,
    frames_dropped: AtomicU64,
}

/// The set of live connections, shared by all broadcast operations for the
/// lifetime of the process.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<ConnectionId, FrameSender>>,
    stats: AtomicRegistryStats,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            stats: AtomicRegistryStats::default(),
        }
    }

    /// Add a connection. Registering an already-known id replaces its
    /// sender, so the operation is idempotent.
    pub async fn register(&self, id: ConnectionId, sender: FrameSender) {
        let mut connections = self.connections.write().await;
        connections.insert(id, sender);
    }

    /// Remove a connection. Returns whether it was present.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write().await;
        connections.remove(&id).is_some()
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Point-to-point send, used for the INIT handshake.
    ///
    /// A failed enqueue means the connection's writer task is gone or its
    /// buffer is already full right after the handshake; either way the
    /// connection is unregistered before the error is returned.
    pub async fn send_to(&self, id: ConnectionId, frame: Frame) -> Result<(), ProtocolError> {
        let sender = {
            let connections = self.connections.read().await;
            connections.get(&id).cloned()
        };
        let sender = sender.ok_or(ProtocolError::ConnectionClosed)?;

        if sender.try_send(frame).is_err() {
            self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
            self.unregister(id).await;
            return Err(ProtocolError::ConnectionClosed);
        }
        self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Send a frame to every registered connection except `exclude`.
    /// Returns the number of successful deliveries.
    ///
    /// Enqueues are non-blocking, so this always returns once every
    /// connection has been attempted; it never waits on a slow consumer.
    /// A connection that cannot accept the frame — writer gone, or buffer
    /// full because the client stopped draining — is faulted and
    /// unregistered after the fan-out completes; its writer task then
    /// closes the socket and the client may reconnect for a fresh INIT.
    /// No ordering is guaranteed between receivers.
    pub async fn broadcast(&self, frame: Frame, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<(ConnectionId, FrameSender)> = {
            let connections = self.connections.read().await;
            connections
                .iter()
                .filter(|(id, _)| Some(**id) != exclude)
                .map(|(id, sender)| (*id, sender.clone()))
                .collect()
        };

        let mut delivered = 0;
        let mut faulted = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(frame.clone()) {
                Ok(()) => {
                    delivered += 1;
                    self.stats.frames_sent.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Full(_)) => {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("dropping slow connection {id}: outbound buffer full");
                    faulted.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    log::warn!("dropping dead connection {id} during broadcast");
                    faulted.push(id);
                }
            }
        }
        for id in faulted {
            self.unregister(id).await;
        }
        delivered
    }

    /// Snapshot of the delivery counters.
    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            frames_sent: self.stats.frames_sent.load(Ordering::Relaxed),
            frames_dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
            active_connections: self.connection_count().await,
        }
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
