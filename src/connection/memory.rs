//! In-memory message store for one logical connection.
//!
//! Messages get identifiers starting at 1, strictly increasing. Each
//! [`receive`](ReceivingConnection::receive) returns the oldest message
//! after the cursor, so a loop that feeds the returned ID back as the next
//! cursor sees every message exactly once and in order.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::{Instant, timeout_at};
use tracing::debug;

use crate::error::Result;
use crate::identifiers::{ConnectionId, MessageId};
use crate::protocol::{PersistentResponse, SignalCommand};

use super::ReceivingConnection;

// ============================================================================
// Constants
// ============================================================================

/// Receive timeout until a transport overrides it.
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(120);

// ============================================================================
// Types
// ============================================================================

/// One stored message.
#[derive(Debug, Clone)]
struct StoredMessage {
    id: MessageId,
    payload: Value,
}

/// Mutable store state, guarded as a unit.
#[derive(Debug, Default)]
struct StoreState {
    /// Messages in identifier order.
    messages: Vec<StoredMessage>,
    /// The server asked for the logical connection to end.
    disconnect_requested: bool,
    /// Every signal received, in arrival order.
    commands: Vec<SignalCommand>,
    /// Deadline after which server-side state may be reaped.
    expires_at: Option<Instant>,
    /// Current fetch timeout.
    receive_timeout: Duration,
}

struct Inner {
    connection_id: ConnectionId,
    state: Mutex<StoreState>,
    /// Wakes suspended fetches on publish or disconnect request.
    changed: Notify,
}

// ============================================================================
// InMemoryConnection
// ============================================================================

/// Single-process [`ReceivingConnection`].
///
/// Cheap to clone; clones share the same store.
///
/// # Example
///
/// ```ignore
/// let store = InMemoryConnection::new(connection_id);
/// store.publish("hello");
/// let response = store.receive(None).await?;
/// assert_eq!(response.payload, "hello");
/// ```
#[derive(Clone)]
pub struct InMemoryConnection {
    inner: Arc<Inner>,
}

impl fmt::Debug for InMemoryConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("InMemoryConnection")
            .field("connection_id", &self.inner.connection_id)
            .field("messages", &state.messages.len())
            .field("disconnect_requested", &state.disconnect_requested)
            .finish_non_exhaustive()
    }
}

impl InMemoryConnection {
    /// Creates an empty store.
    #[must_use]
    pub fn new(connection_id: ConnectionId) -> Self {
        Self {
            inner: Arc::new(Inner {
                connection_id,
                state: Mutex::new(StoreState {
                    receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
                    ..StoreState::default()
                }),
                changed: Notify::new(),
            }),
        }
    }

    /// Returns the logical connection this store serves.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.inner.connection_id
    }

    /// Appends a message and wakes suspended fetches.
    pub fn publish(&self, payload: impl Into<Value>) -> MessageId {
        let id = {
            let mut state = self.inner.state.lock();
            let id = state
                .messages
                .last()
                .map_or(MessageId::new(1), |m| m.id.next());
            state.messages.push(StoredMessage {
                id,
                payload: payload.into(),
            });
            id
        };

        debug!(connection_id = %self.inner.connection_id, message_id = %id, "Message published");
        self.inner.changed.notify_waiters();
        id
    }

    /// Marks the logical connection as terminated by the server.
    ///
    /// Pending messages are still delivered; the last one carries the
    /// disconnect flag.
    pub fn request_disconnect(&self) {
        self.inner.state.lock().disconnect_requested = true;
        debug!(connection_id = %self.inner.connection_id, "Disconnect requested");
        self.inner.changed.notify_waiters();
    }

    /// Returns the identifier of the newest message.
    #[must_use]
    pub fn latest_message_id(&self) -> Option<MessageId> {
        self.inner.state.lock().messages.last().map(|m| m.id)
    }

    /// Returns the number of stored messages.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().messages.len()
    }

    /// Returns `true` if nothing has been published.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns every signal received so far.
    #[must_use]
    pub fn commands(&self) -> Vec<SignalCommand> {
        self.inner.state.lock().commands.clone()
    }

    /// Returns when server-side state may be reaped, if a disconnect arrived.
    #[must_use]
    pub fn expires_at(&self) -> Option<Instant> {
        self.inner.state.lock().expires_at
    }

    /// Returns `true` once the disconnect expiry has passed.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_at()
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// Returns the next delivery after the cursor, if one is ready.
    fn try_next(&self, cursor: Option<MessageId>) -> Option<PersistentResponse> {
        let state = self.inner.state.lock();

        let start = match cursor {
            None => 0,
            Some(cursor) => state.messages.partition_point(|m| m.id <= cursor),
        };

        match state.messages.get(start) {
            Some(message) => {
                let is_last = start + 1 == state.messages.len();
                let response = PersistentResponse::new(message.id, message.payload.clone());
                if state.disconnect_requested && is_last {
                    Some(response.with_disconnect())
                } else {
                    Some(response)
                }
            }
            None if state.disconnect_requested => Some(
                PersistentResponse::new(cursor.unwrap_or(MessageId::ZERO), Value::Null)
                    .with_disconnect(),
            ),
            None => None,
        }
    }
}

#[async_trait]
impl ReceivingConnection for InMemoryConnection {
    async fn receive(&self, last_message_id: Option<MessageId>) -> Result<PersistentResponse> {
        let deadline = Instant::now().checked_add(self.receive_timeout());

        loop {
            // Register interest before checking so a publish in between is not lost.
            let changed = self.inner.changed.notified();

            if let Some(response) = self.try_next(last_message_id) {
                return Ok(response);
            }

            match deadline {
                Some(deadline) => {
                    if timeout_at(deadline, changed).await.is_err() {
                        let cursor = last_message_id.unwrap_or(MessageId::ZERO);
                        return Ok(PersistentResponse::timed_out(cursor));
                    }
                }
                None => changed.await,
            }
        }
    }

    fn send_command(&self, command: SignalCommand) {
        let mut state = self.inner.state.lock();
        if command.is_disconnect() {
            state.expires_at = Instant::now().checked_add(command.expires_after);
        }
        state.commands.push(command);
        debug!(
            connection_id = %self.inner.connection_id,
            kind = ?command.kind,
            expires_after_secs = command.expires_after.as_secs(),
            "Signal received"
        );
    }

    fn receive_timeout(&self) -> Duration {
        self.inner.state.lock().receive_timeout
    }

    fn set_receive_timeout(&self, timeout: Duration) {
        self.inner.state.lock().receive_timeout = timeout;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    fn store() -> InMemoryConnection {
        InMemoryConnection::new(ConnectionId::new("c1").unwrap())
    }

    #[test]
    fn test_ids_start_at_one_and_increase() {
        let store = store();
        assert!(store.is_empty());
        assert_eq!(store.publish("a"), MessageId::new(1));
        assert_eq!(store.publish("b"), MessageId::new(2));
        assert_eq!(store.latest_message_id(), Some(MessageId::new(2)));
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_unfiltered_fetch_returns_oldest() {
        let store = store();
        store.publish("a");
        store.publish("b");
        let response = store.receive(None).await.unwrap();
        assert_eq!(response.message_id, MessageId::new(1));
        assert_eq!(response.payload, json!("a"));
    }

    #[tokio::test]
    async fn test_cursor_skips_delivered() {
        let store = store();
        store.publish("a");
        store.publish("b");
        store.publish("c");
        let response = store.receive(Some(MessageId::new(2))).await.unwrap();
        assert_eq!(response.message_id, MessageId::new(3));
        assert_eq!(response.payload, json!("c"));
    }

    #[tokio::test]
    async fn test_receive_suspends_until_publish() {
        let store = store();
        let reader = store.clone();
        let handle = tokio::spawn(async move { reader.receive(None).await });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        store.publish("late");
        let response = handle.await.unwrap().unwrap();
        assert_eq!(response.payload, json!("late"));
    }

    #[tokio::test]
    async fn test_publish_wakes_pending_fetch() {
        use tokio_test::{assert_pending, assert_ready_ok, task};

        let store = store();
        let mut fetch = task::spawn(store.receive(None));
        assert_pending!(fetch.poll());

        store.publish("wake");
        assert!(fetch.is_woken());
        let response = assert_ready_ok!(fetch.poll());
        assert_eq!(response.payload, json!("wake"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_receive_timeout_yields_keep_alive() {
        let store = store();
        store.set_receive_timeout(Duration::from_secs(5));
        let response = store.receive(Some(MessageId::new(7))).await.unwrap();
        assert!(response.timed_out);
        assert!(response.is_empty());
        assert_eq!(response.message_id, MessageId::new(7));
    }

    #[tokio::test]
    async fn test_disconnect_flag_on_last_pending() {
        let store = store();
        store.publish("a");
        store.publish("b");
        store.request_disconnect();

        let first = store.receive(None).await.unwrap();
        assert!(!first.disconnect);
        let second = store.receive(Some(first.message_id)).await.unwrap();
        assert!(second.disconnect);
        assert_eq!(second.payload, json!("b"));
    }

    #[tokio::test]
    async fn test_disconnect_with_nothing_pending() {
        let store = store();
        store.publish("a");
        store.request_disconnect();
        let response = store.receive(Some(MessageId::new(1))).await.unwrap();
        assert!(response.disconnect);
        assert!(response.is_empty());
        assert_eq!(response.message_id, MessageId::new(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_command_sets_expiry() {
        let store = store();
        assert!(store.expires_at().is_none());

        store.send_command(SignalCommand::disconnect(Duration::from_secs(60)));
        assert_eq!(store.commands().len(), 1);
        assert!(!store.is_expired());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(store.is_expired());
    }

    #[test]
    fn test_receive_timeout_property() {
        let store = store();
        assert_eq!(store.receive_timeout(), DEFAULT_RECEIVE_TIMEOUT);
        store.set_receive_timeout(Duration::from_secs(86_400));
        assert_eq!(store.receive_timeout(), Duration::from_secs(86_400));
    }
}
