//! # checksync — windowed-diff checkbox synchronization
//!
//! Keeps a large shared array of binary cells ("checkboxes") synchronized
//! across many WebSocket clients. Clients send 4-byte TOGGLE frames; the
//! server coalesces every change inside a configurable window and fans out
//! at most two batched DIFF frames per tick, bounding broadcast volume to
//! O(connections × ticks) instead of O(connections × toggles).
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   TOGGLE (4 bytes)   ┌───────────────┐
//! │ SyncClient │ ───────────────────▶ │ ClientHandler  │──▶ CheckboxStore
//! │ (per user) │                      └───────────────┘        │ snapshot
//! └─────▲──────┘                                               ▼
//!       │        INIT / DIFF         ┌────────────────┐  ┌──────────────┐
//!       └─────────────────────────── │ ConnectionReg. │◀─│ DiffScheduler│
//!                                    │ (fan-out)      │  │ (per window) │
//!                                    └────────────────┘  └──────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`protocol`] — header-byte/uint24/bitmap codec and typed messages
//! - [`store`] — the shared cell array
//! - [`broadcast`] — connection registry and concurrent fan-out
//! - [`diff`] — periodic snapshot/diff/broadcast scheduler
//! - [`handler`] — inbound frame dispatch and the INIT handshake
//! - [`server`] — WebSocket accept loop and per-connection tasks
//! - [`client`] — WebSocket client emitting decoded [`client::SyncEvent`]s
//! - [`config`] — environment configuration (`CHECKSYNC_` prefix)

pub mod protocol;
pub mod store;
pub mod broadcast;
pub mod diff;
pub mod handler;
pub mod server;
pub mod client;
pub mod config;

// Re-exports for convenience
pub use protocol::{ClientMessage, ProtocolError, ServerMessage};
pub use store::{CheckboxStore, StoreError};
pub use broadcast::{ConnectionId, ConnectionRegistry, Frame, RegistryStats};
pub use diff::{compute_diff, CellDiff, DiffScheduler, ShutdownHandle, ShutdownSignal};
pub use handler::{ClientHandler, HandlerError, SyncContext};
pub use server::{ServerConfig, SyncServer};
pub use client::{ConnectionState, SyncClient, SyncEvent};
pub use config::{Config, ConfigError};
