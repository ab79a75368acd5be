//! Control signals sent to the receiving connection.
//!
//! Signals are fire-and-forget: the transport hands them over and never
//! waits for an acknowledgment.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// How long server-side state survives after a disconnect signal.
pub const DEFAULT_DISCONNECT_EXPIRY: Duration = Duration::from_secs(30 * 60);

// ============================================================================
// CommandType
// ============================================================================

/// Kind of control command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub enum CommandType {
    /// Expire the logical connection's server-side state.
    Disconnect,
}

// ============================================================================
// SignalCommand
// ============================================================================

/// A control command with an expiry.
///
/// # Format
///
/// ```json
/// { "type": "disconnect", "expiresAfterMs": 1800000 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCommand {
    /// Command kind.
    #[serde(rename = "type")]
    pub kind: CommandType,

    /// How long the command stays in effect.
    #[serde(rename = "expiresAfterMs", with = "duration_ms")]
    pub expires_after: Duration,
}

impl SignalCommand {
    /// Creates a disconnect command with the given expiry.
    #[inline]
    #[must_use]
    pub const fn disconnect(expires_after: Duration) -> Self {
        Self {
            kind: CommandType::Disconnect,
            expires_after,
        }
    }

    /// Returns `true` if this is a disconnect command.
    #[inline]
    #[must_use]
    pub fn is_disconnect(&self) -> bool {
        self.kind == CommandType::Disconnect
    }
}

impl Default for SignalCommand {
    fn default() -> Self {
        Self::disconnect(DEFAULT_DISCONNECT_EXPIRY)
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ============================================================================
// Tests
// ============================================================================
