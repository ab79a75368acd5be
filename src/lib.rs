//! Persistent Transport - resumable connections over request/response.
//!
//! This library turns a primitive request/response exchange (a long-held
//! HTTP response, a server-sent events stream, a long poll or a WebSocket)
//! into one leg of a durable logical connection: messages are pushed in
//! order, delivery resumes after a transient drop from the last message the
//! client saw, and silent transports are evicted.
//!
//! # Architecture
//!
//! The engine sits between two capabilities it does not implement itself:
//!
//! - **Host adapter**: turns an inbound exchange into a neutral
//!   [`HostContext`] (request, response, items)
//! - **Receiving connection**: the message store, consumed through
//!   [`ReceivingConnection`]
//!
//! Key design principles:
//!
//! - One [`ForeverTransport`] per exchange, one async receive loop per transport
//! - The delivery cursor is owned by the loop and advanced before each send
//! - [`disconnect`](ForeverTransport::disconnect) is idempotent across every path
//! - One shared [`TransportHeartBeat`] evicts transports that stop sending
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use persistent_transport::{
//!     ConnectionId, ForeverTransport, HostContext, InMemoryConnection, MemoryResponse,
//!     OwnedRequest, Result, TransportHeartBeat,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let heartbeat = TransportHeartBeat::with_defaults();
//!
//!     let request = OwnedRequest::from_uri("/echo/connect?connectionId=c1")?;
//!     let response = Arc::new(MemoryResponse::new());
//!     let context = HostContext::new(Arc::new(request), response.clone());
//!
//!     let transport = ForeverTransport::builder()
//!         .context(context)
//!         .heartbeat(heartbeat)
//!         .build()?;
//!
//!     let store = InMemoryConnection::new(transport.connection_id().clone());
//!     store.publish("hello");
//!     store.request_disconnect();
//!
//!     if let Some(receive_loop) = transport.process_request(Arc::new(store))? {
//!         let outcome = receive_loop.await?;
//!         println!("{outcome:?}: {:?}", response.frames());
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`connection`] | Receiving connection capability and in-memory store |
//! | [`error`] | Error types and [`Result`] alias |
//! | [`host`] | Neutral request/response capabilities |
//! | [`identifiers`] | Type-safe ID wrappers |
//! | [`protocol`] | Responses, signals and groups |
//! | [`relay`] | HTTP helper for cross-process relaying |
//! | [`serializer`] | Serialize-to-text capability |
//! | [`transport`] | Transport engine and liveness registry |

// ============================================================================
// Modules
// ============================================================================

/// Receiving connection capability.
///
/// - [`ReceivingConnection`] - fetch, signal, receive timeout
/// - [`InMemoryConnection`] - single-process message store
pub mod connection;

/// Error types and result aliases.
///
/// All fallible operations return [`Result<T>`] which uses [`Error`].
pub mod error;

/// Neutral host objects.
///
/// Host adapters build a [`HostContext`] from their substrate.
pub mod host;

/// Type-safe identifiers.
pub mod identifiers;

/// Wire-level data types.
pub mod protocol;

/// Cross-process relay helper.
pub mod relay;

/// Serialize-to-text capability.
pub mod serializer;

/// Transport engine.
///
/// Use [`ForeverTransport::builder()`] to bind a transport to an exchange.
pub mod transport;

// ============================================================================
// Re-exports
// ============================================================================

// Connection types
pub use connection::{InMemoryConnection, ReceivingConnection};

// Error types
pub use error::{Error, Result};

// Host types
pub use host::{HostContext, MemoryResponse, OwnedRequest, Params, Request, Response, WebSocketResponse};

// Identifier types
pub use identifiers::{ConnectionId, MessageId, TransportId};

// Protocol types
pub use protocol::{CommandType, Groups, PersistentResponse, SignalCommand};

// Relay types
pub use relay::HttpHelper;

// Serializer types
pub use serializer::{JsonSerializer, SerdeJsonSerializer};

// Transport types
pub use transport::{
    ForeverTransport, HeartbeatOptions, LoopOutcome, NoopObserver, ReceiveLoop, TrackingDisconnect,
    TransportBuilder, TransportHeartBeat, TransportKind, TransportObserver, TransportOptions,
    TransportState,
};
