//! Response message written to the client.
//!
//! A [`PersistentResponse`] is what the receiving connection yields for
//! each fetch and what the transport serializes onto the outbound channel.
//! Carrying the message ID lets the client reconnect with `messageId`
//! and resume after it.

// ============================================================================
// Imports
// ============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::identifiers::MessageId;

// ============================================================================
// PersistentResponse
// ============================================================================

/// One batch of delivery for a logical connection.
///
/// # Format
///
/// ```json
/// {
///   "messageId": 12,
///   "payload": "hello",
///   "disconnect": false
/// }
/// ```
///
/// `disconnect` and `timedOut` are omitted when `false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentResponse {
    /// Identifier of the last message included in this response.
    pub message_id: MessageId,

    /// Opaque message payload.
    #[serde(default)]
    pub payload: Value,

    /// The server considers the logical connection terminated.
    #[serde(default, skip_serializing_if = "is_false")]
    pub disconnect: bool,

    /// The fetch hit its receive timeout without new data (keep-alive).
    #[serde(default, skip_serializing_if = "is_false")]
    pub timed_out: bool,
}

impl PersistentResponse {
    /// Creates a response carrying one payload.
    #[inline]
    #[must_use]
    pub fn new(message_id: MessageId, payload: impl Into<Value>) -> Self {
        Self {
            message_id,
            payload: payload.into(),
            disconnect: false,
            timed_out: false,
        }
    }

    /// Creates an empty keep-alive response that leaves the cursor unchanged.
    #[inline]
    #[must_use]
    pub fn timed_out(message_id: MessageId) -> Self {
        Self {
            message_id,
            payload: Value::Null,
            disconnect: false,
            timed_out: true,
        }
    }

    /// Marks the response as the last one for the logical connection.
    #[inline]
    #[must_use]
    pub fn with_disconnect(mut self) -> Self {
        self.disconnect = true;
        self
    }

    /// Returns `true` if the response carries no payload.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_null()
    }
}

#[inline]
fn is_false(value: &bool) -> bool {
    !*value
}

// ============================================================================
// Tests
// ============================================================================
