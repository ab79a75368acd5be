//! Per-exchange host context.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use super::{Request, Response};

// ============================================================================
// Constants
// ============================================================================

/// Item key: the host can upgrade this exchange to a WebSocket.
pub const SUPPORTS_WEB_SOCKETS: &str = "supportsWebSockets";

/// Item key: the host runs with debugging enabled.
pub const DEBUG_MODE: &str = "debugMode";

// ============================================================================
// HostContext
// ============================================================================

/// Neutral view of one inbound exchange.
///
/// Host adapters build this from their substrate; the transport only
/// touches the capability traits.
pub struct HostContext {
    /// Inbound request.
    request: Arc<dyn Request>,
    /// Outbound channel.
    response: Arc<dyn Response>,
    /// Authenticated principal, if any.
    user: Option<String>,
    /// Host-specific values.
    items: Mutex<FxHashMap<String, Value>>,
}

impl fmt::Debug for HostContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostContext")
            .field("path", &self.request.path())
            .field("user", &self.user)
            .field("items", &self.items.lock().len())
            .finish_non_exhaustive()
    }
}

impl HostContext {
    /// Creates a context from a request and response.
    #[must_use]
    pub fn new(request: Arc<dyn Request>, response: Arc<dyn Response>) -> Self {
        Self {
            request,
            response,
            user: None,
            items: Mutex::new(FxHashMap::default()),
        }
    }

    /// Sets the authenticated principal.
    #[inline]
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Sets a host item, builder style.
    #[inline]
    #[must_use]
    pub fn with_item(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set_item(key, value);
        self
    }

    /// Returns the inbound request.
    #[inline]
    #[must_use]
    pub fn request(&self) -> &dyn Request {
        self.request.as_ref()
    }

    /// Returns the outbound channel.
    #[inline]
    #[must_use]
    pub fn response(&self) -> &dyn Response {
        self.response.as_ref()
    }

    /// Returns the authenticated principal.
    #[inline]
    #[must_use]
    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Returns a host item.
    #[must_use]
    pub fn item(&self, key: &str) -> Option<Value> {
        self.items.lock().get(key).cloned()
    }

    /// Sets a host item.
    pub fn set_item(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.items.lock().insert(key.into(), value.into());
    }

    /// Returns `true` if the host advertised WebSocket support.
    #[must_use]
    pub fn supports_web_sockets(&self) -> bool {
        self.flag(SUPPORTS_WEB_SOCKETS)
    }

    /// Returns `true` if the host runs in debug mode.
    #[must_use]
    pub fn debug_mode(&self) -> bool {
        self.flag(DEBUG_MODE)
    }

    fn flag(&self, key: &str) -> bool {
        self.items
            .lock()
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

// ============================================================================
// Tests
// ============================================================================
