//! Transport notifications.
//!
//! Each transport gets its observer at construction time. Instance
//! notifications (`connected`, `received`, `disconnected`, `error`) and the
//! instrumentation hooks (`sending`, `receiving`) share one trait; every
//! method defaults to a no-op.

use crate::error::Error;
use crate::identifiers::ConnectionId;

/// Receives lifecycle and instrumentation callbacks from a transport.
///
/// Callbacks run inline on the receive loop; keep them short.
pub trait TransportObserver: Send + Sync {
    /// A fresh (non-resuming) connect was accepted.
    fn on_connected(&self, _connection_id: &ConnectionId) {}

    /// The client posted a message through the send route.
    fn on_received(&self, _connection_id: &ConnectionId, _data: &str) {}

    /// The transport disconnected. Fires at most once per instance.
    fn on_disconnected(&self, _connection_id: &ConnectionId) {}

    /// The receive loop faulted.
    fn on_error(&self, _connection_id: &ConnectionId, _error: &Error) {}

    /// Raw serialized text about to be written.
    fn on_sending(&self, _payload: &str) {}

    /// Raw inbound text from the send route.
    fn on_receiving(&self, _payload: &str) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl TransportObserver for NoopObserver {}
