//! Persistent transport engine.
//!
//! This module turns one inbound request/response exchange into a leg of a
//! durable, resumable logical connection.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   process_request   ┌──────────────────┐
//! │ HostContext  │────────────────────►│ ForeverTransport │
//! │ (req / resp) │◄──── write text ────│  receive loop    │
//! └──────────────┘                     └──────┬─────┬─────┘
//!                                   fetch(cursor) │     │ mark / register
//!                                   signal        ▼     ▼
//!                           ┌─────────────────────┐  ┌────────────────────┐
//!                           │ ReceivingConnection │  │ TransportHeartBeat │
//!                           └─────────────────────┘  └────────────────────┘
//! ```
//!
//! # Transport Lifecycle
//!
//! 1. `ForeverTransport::builder()...build()` - Bind to the exchange
//! 2. `ForeverTransport::process_request` - Send route, or connect and register
//! 3. Await the returned `ReceiveLoop` - Fetch, send, repeat
//! 4. `ForeverTransport::disconnect` - Idempotent teardown, from any path
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `builder` | Fluent transport construction |
//! | `forever` | Receive loop, send path, disconnect |
//! | `heartbeat` | Liveness registry |
//! | `observer` | Notification hooks |
//! | `options` | Transport kinds and timings |

// ============================================================================
// Submodules
// ============================================================================

/// Transport builder.
pub mod builder;

/// Transport engine.
pub mod forever;

/// Liveness registry.
pub mod heartbeat;

/// Notification hooks.
pub mod observer;

/// Configuration.
pub mod options;

// ============================================================================
// Re-exports
// ============================================================================

pub use builder::TransportBuilder;
pub use forever::{ForeverTransport, LoopOutcome, ReceiveLoop, TransportState};
pub use heartbeat::{TrackingDisconnect, TransportHeartBeat};
pub use observer::{NoopObserver, TransportObserver};
pub use options::{HeartbeatOptions, TransportKind, TransportOptions};
