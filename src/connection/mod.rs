//! Receiving connection capability.
//!
//! The message store behind a logical connection is an external
//! collaborator. The transport consumes it only through
//! [`ReceivingConnection`]: fetch the next delivery after a cursor, hand
//! over control signals, and tune the fetch timeout.
//!
//! [`InMemoryConnection`] is a complete single-process implementation.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::identifiers::MessageId;
use crate::protocol::{PersistentResponse, SignalCommand};

// ============================================================================
// Submodules
// ============================================================================

/// In-memory message store.
pub mod memory;

// ============================================================================
// Re-exports
// ============================================================================

pub use memory::InMemoryConnection;

// ============================================================================
// ReceivingConnection
// ============================================================================

/// Source of deliveries for one logical connection.
#[async_trait]
pub trait ReceivingConnection: Send + Sync {
    /// Fetches the next delivery.
    ///
    /// With `Some(cursor)`, only messages after the cursor are eligible;
    /// with `None`, the fetch is unfiltered. Suspends until data exists,
    /// a disconnect is requested, or the receive timeout elapses; never
    /// returns an empty non-timeout response.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    async fn receive(&self, last_message_id: Option<MessageId>) -> Result<PersistentResponse>;

    /// Hands a control signal to the store without waiting.
    fn send_command(&self, command: SignalCommand);

    /// Returns the current receive timeout.
    fn receive_timeout(&self) -> Duration;

    /// Sets how long [`receive`](Self::receive) may suspend.
    fn set_receive_timeout(&self, timeout: Duration);
}
