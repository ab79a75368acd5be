//! Neutral request/response capabilities.
//!
//! The transport engine never sees a concrete substrate. Host adapters
//! turn an inbound exchange into a [`HostContext`] holding a [`Request`]
//! and a [`Response`], and that is all the engine consumes.
//!
//! # Substrates
//!
//! ```text
//! chunked HTTP ──┐
//! SSE stream  ───┼──► Host adapter ──► HostContext ──► ForeverTransport
//! WebSocket   ───┘
//! ```
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `context` | Per-exchange context and host items |
//! | `memory` | Frame-capturing response |
//! | `params` | Multi-valued name/value collection |
//! | `request` | Owned request |
//! | `websocket` | WebSocket-backed response |

// ============================================================================
// Imports
// ============================================================================

use async_trait::async_trait;

use crate::error::Result;

// ============================================================================
// Submodules
// ============================================================================

/// Per-exchange context.
pub mod context;

/// In-memory response.
pub mod memory;

/// Name/value collections.
pub mod params;

/// Owned request.
pub mod request;

/// WebSocket-backed response.
pub mod websocket;

// ============================================================================
// Re-exports
// ============================================================================

pub use context::{DEBUG_MODE, HostContext, SUPPORTS_WEB_SOCKETS};
pub use memory::MemoryResponse;
pub use params::Params;
pub use request::OwnedRequest;
pub use websocket::WebSocketResponse;

// ============================================================================
// Request
// ============================================================================

/// Read-only view of the inbound request.
pub trait Request: Send + Sync {
    /// Request path, without the query string.
    fn path(&self) -> &str;

    /// Query string parameters.
    fn query_string(&self) -> &Params;

    /// Request headers.
    fn headers(&self) -> &Params;

    /// Form fields from a url-encoded body.
    fn form(&self) -> &Params;

    /// Request cookies.
    fn cookies(&self) -> &Params;

    /// Looks a field up in the query string, then in the form.
    fn query_string_or_form(&self, name: &str) -> Option<String> {
        self.query_string()
            .get(name)
            .or_else(|| self.form().get(name))
    }
}

// ============================================================================
// Response
// ============================================================================

/// Outbound channel of the exchange.
///
/// Methods take `&self`: the response is shared between the receive loop
/// and the liveness registry.
#[async_trait]
pub trait Response: Send + Sync {
    /// Enables or disables output buffering.
    fn set_buffering(&self, enabled: bool);

    /// Returns `false` once the client's connection has gone away.
    fn is_client_connected(&self) -> bool;

    /// Writes text to the client.
    ///
    /// # Errors
    ///
    /// Returns a connection error if the write fails.
    async fn write(&self, data: &str) -> Result<()>;
}
