//! Transport and heartbeat configuration.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use persistent_transport::{TransportKind, TransportOptions};
//!
//! let options = TransportOptions::for_kind(TransportKind::ServerSentEvents)
//!     .with_disconnect_threshold(Duration::from_secs(10));
//! options.validate()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::borrow::Cow;
use std::fmt;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::DEFAULT_DISCONNECT_EXPIRY;

// ============================================================================
// Constants
// ============================================================================

/// Silence tolerated before the heartbeat evicts a transport.
pub const DEFAULT_DISCONNECT_THRESHOLD: Duration = Duration::from_secs(5);

/// Receive timeout applied for the lifetime of a receive loop.
///
/// Long enough that the fetch effectively never times out.
pub const STREAMING_RECEIVE_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Period between heartbeat sweeps.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Preamble written by server-sent events transports on initialization.
const SSE_PREAMBLE: &str = "data: initialized\n\n";

// ============================================================================
// TransportKind
// ============================================================================

/// Concrete substrate a transport instance runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TransportKind {
    /// One long-held response, frames written as-is.
    #[default]
    Streaming,
    /// `text/event-stream` response, each frame wrapped as an SSE event.
    ServerSentEvents,
    /// One delivery per exchange; the client polls again.
    LongPolling,
    /// WebSocket-backed response, one text message per frame.
    WebSockets,
}

impl TransportKind {
    /// Returns the wire name used in the `transport` query parameter.
    #[inline]
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::ServerSentEvents => "serverSentEvents",
            Self::LongPolling => "longPolling",
            Self::WebSockets => "webSockets",
        }
    }

    /// Parses a wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "streaming" | "foreverFrame" => Some(Self::Streaming),
            "serverSentEvents" => Some(Self::ServerSentEvents),
            "longPolling" => Some(Self::LongPolling),
            "webSockets" => Some(Self::WebSockets),
            _ => None,
        }
    }

    /// Text written once before the receive loop starts.
    #[inline]
    #[must_use]
    pub const fn preamble(&self) -> Option<&'static str> {
        match self {
            Self::ServerSentEvents => Some(SSE_PREAMBLE),
            _ => None,
        }
    }

    /// Wraps serialized text for the substrate.
    #[must_use]
    pub fn frame<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            Self::ServerSentEvents => Cow::Owned(format!("data: {text}\n\n")),
            _ => Cow::Borrowed(text),
        }
    }

    /// Returns `true` if the exchange ends after one delivery.
    #[inline]
    #[must_use]
    pub const fn is_single_response(&self) -> bool {
        matches!(self, Self::LongPolling)
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TransportOptions
// ============================================================================

/// Per-instance transport settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransportOptions {
    /// Substrate variant.
    pub kind: TransportKind,

    /// Silence tolerated before eviction.
    pub disconnect_threshold: Duration,

    /// Receive timeout set on the receiving connection at initialization.
    pub receive_timeout: Duration,

    /// Expiry carried by the disconnect signal.
    pub disconnect_expiry: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportOptions {
    /// Creates streaming options with default timings.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            kind: TransportKind::Streaming,
            disconnect_threshold: DEFAULT_DISCONNECT_THRESHOLD,
            receive_timeout: STREAMING_RECEIVE_TIMEOUT,
            disconnect_expiry: DEFAULT_DISCONNECT_EXPIRY,
        }
    }

    /// Creates options for a transport kind with default timings.
    #[inline]
    #[must_use]
    pub const fn for_kind(kind: TransportKind) -> Self {
        let mut options = Self::new();
        options.kind = kind;
        options
    }

    /// Sets the transport kind.
    #[inline]
    #[must_use]
    pub fn with_kind(mut self, kind: TransportKind) -> Self {
        self.kind = kind;
        self
    }

    /// Sets the eviction threshold.
    #[inline]
    #[must_use]
    pub fn with_disconnect_threshold(mut self, threshold: Duration) -> Self {
        self.disconnect_threshold = threshold;
        self
    }

    /// Sets the receive timeout applied to the receiving connection.
    #[inline]
    #[must_use]
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    /// Sets the disconnect signal expiry.
    #[inline]
    #[must_use]
    pub fn with_disconnect_expiry(mut self, expiry: Duration) -> Self {
        self.disconnect_expiry = expiry;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any duration is zero.
    pub fn validate(&self) -> Result<()> {
        if self.disconnect_threshold.is_zero() {
            return Err(Error::config("disconnect threshold must be greater than zero"));
        }
        if self.receive_timeout.is_zero() {
            return Err(Error::config("receive timeout must be greater than zero"));
        }
        if self.disconnect_expiry.is_zero() {
            return Err(Error::config("disconnect expiry must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// HeartbeatOptions
// ============================================================================

/// Liveness registry settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatOptions {
    /// Period between sweeps.
    pub interval: Duration,
}

impl Default for HeartbeatOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatOptions {
    /// Creates options with the default sweep interval.
    #[inline]
    #[must_use]
    pub const fn new() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
        }
    }

    /// Sets the sweep interval.
    #[inline]
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Validates the options.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(Error::config("heartbeat interval must be greater than zero"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
