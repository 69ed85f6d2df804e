//! Windowed diff scheduler.
//!
//! Broadcasting every individual toggle does not scale once many clients
//! edit at once. Instead the scheduler snapshots the store once per
//! configured window, diffs against the previous snapshot, and broadcasts
//! at most two batched DIFF frames per tick (one for cells that turned on,
//! one for cells that turned off). A cell toggled on and back off inside
//! one window produces no traffic at all; that coalescing is the point of
//! the window, and the window length trades latency against bandwidth
//! rather than correctness.
//!
//! ```text
//! store ──snapshot──▶ compute_diff ──▶ DIFF(on) ─┐
//!            ▲                                    ├──▶ registry.broadcast
//!       previous tick                 DIFF(off) ──┘     (all connections)
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::broadcast::ConnectionRegistry;
use crate::protocol::ServerMessage;
use crate::store::CheckboxStore;

/// Changed-index sets between two snapshots, ascending within each list.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CellDiff {
    pub turned_on: Vec<u32>,
    pub turned_off: Vec<u32>,
}

impl CellDiff {
    pub fn is_empty(&self) -> bool {
        self.turned_on.is_empty() && self.turned_off.is_empty()
    }
}

/// Compare two snapshots index-by-index.
///
/// Both slices must have the store's fixed length; the scheduler only ever
/// diffs snapshots of the same store.
pub fn compute_diff(previous: &[u8], current: &[u8]) -> CellDiff {
    debug_assert_eq!(previous.len(), current.len());
    let mut diff = CellDiff::default();
    for (index, (&prev, &curr)) in previous.iter().zip(current.iter()).enumerate() {
        if prev != curr {
            if curr == 1 {
                diff.turned_on.push(index as u32);
            } else {
                diff.turned_off.push(index as u32);
            }
        }
    }
    diff
}

/// Signals the scheduler (and the accept loop) to stop.
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

/// Receiving side of the shutdown signal. Cloneable so every long-running
/// task can watch it independently.
#[derive(Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownHandle {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, ShutdownSignal { rx })
    }

    /// Request shutdown. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownSignal {
    /// Resolves once shutdown has been requested (or the handle is gone).
    pub async fn cancelled(&mut self) {
        while !*self.rx.borrow() {
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// The periodic diff-and-broadcast task.
///
/// Cycles between waiting out the window and broadcasting; runs until the
/// shutdown signal fires.
pub struct DiffScheduler {
    store: Arc<CheckboxStore>,
    registry: Arc<ConnectionRegistry>,
    window: Duration,
}

impl DiffScheduler {
    pub fn new(
        store: Arc<CheckboxStore>,
        registry: Arc<ConnectionRegistry>,
        window: Duration,
    ) -> Self {
        Self { store, registry, window }
    }

    /// Run the tick loop until `shutdown` fires.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        // First comparison basis is the all-zero state.
        let mut previous = vec![0u8; self.store.len()];

        let mut ticker = interval(self.window);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        log::info!("diff scheduler running, window {:?}", self.window);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick(&mut previous).await;
                }
                _ = shutdown.cancelled() => {
                    log::info!("diff scheduler stopped");
                    return;
                }
            }
        }
    }

    /// One scheduler tick: snapshot, diff, broadcast.
    ///
    /// DIFF frames go to every registered connection with no sender
    /// exclusion; the batch aggregates edits from arbitrarily many clients
    /// and re-applying an absolute (index, value) fact at its originator is
    /// idempotent.
    async fn tick(&self, previous: &mut Vec<u8>) {
        let current = self.store.snapshot().await;
        let diff = compute_diff(previous, &current);
        *previous = current;

        if diff.is_empty() {
            return;
        }
        log::debug!(
            "diff tick: {} on, {} off",
            diff.turned_on.len(),
            diff.turned_off.len()
        );

        if !diff.turned_on.is_empty() {
            let frame = ServerMessage::Diff { value: true, indices: diff.turned_on }.encode();
            self.registry.broadcast(Arc::new(frame), None).await;
        }
        if !diff.turned_off.is_empty() {
            let frame = ServerMessage::Diff { value: false, indices: diff.turned_off }.encode();
            self.registry.broadcast(Arc::new(frame), None).await;
        }
    }
}
