//! Builder pattern for transport construction.
//!
//! Provides a fluent API for binding a [`ForeverTransport`] to an exchange.
//!
//! # Example
//!
//! ```ignore
//! use persistent_transport::{ForeverTransport, TransportKind, TransportOptions};
//!
//! let transport = ForeverTransport::builder()
//!     .context(context)
//!     .heartbeat(Arc::clone(&heartbeat))
//!     .options(TransportOptions::for_kind(TransportKind::ServerSentEvents))
//!     .shutdown(shutdown.child_token())
//!     .build()?;
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::host::HostContext;
use crate::serializer::{JsonSerializer, SerdeJsonSerializer};

use super::forever::{Bindings, ForeverTransport};
use super::heartbeat::TransportHeartBeat;
use super::observer::{NoopObserver, TransportObserver};
use super::options::TransportOptions;

// ============================================================================
// TransportBuilder
// ============================================================================

/// Builder for a [`ForeverTransport`].
///
/// Use [`ForeverTransport::builder()`] to create one. The host context and
/// the liveness registry are required; everything else has a default.
pub struct TransportBuilder {
    /// Exchange to bind to.
    context: Option<Arc<HostContext>>,
    /// Shared liveness registry.
    heartbeat: Option<Arc<TransportHeartBeat>>,
    /// Outbound encoding.
    serializer: Arc<dyn JsonSerializer>,
    /// Notification sink.
    observer: Arc<dyn TransportObserver>,
    /// Timings and substrate.
    options: TransportOptions,
    /// Host shutdown.
    shutdown: CancellationToken,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TransportBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("context", &self.context.is_some())
            .field("heartbeat", &self.heartbeat.is_some())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// TransportBuilder Implementation
// ============================================================================

impl TransportBuilder {
    /// Creates a builder with default serializer, observer and options.
    #[must_use]
    pub fn new() -> Self {
        Self {
            context: None,
            heartbeat: None,
            serializer: Arc::new(SerdeJsonSerializer),
            observer: Arc::new(NoopObserver),
            options: TransportOptions::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Sets the exchange the transport serves.
    #[inline]
    #[must_use]
    pub fn context(mut self, context: impl Into<Arc<HostContext>>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Sets the liveness registry.
    #[inline]
    #[must_use]
    pub fn heartbeat(mut self, heartbeat: Arc<TransportHeartBeat>) -> Self {
        self.heartbeat = Some(heartbeat);
        self
    }

    /// Sets the outbound serializer.
    #[inline]
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn JsonSerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Sets the notification observer.
    #[inline]
    #[must_use]
    pub fn observer(mut self, observer: Arc<dyn TransportObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Sets the transport options.
    #[inline]
    #[must_use]
    pub fn options(mut self, options: TransportOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the token that cancels the receive loop on host shutdown.
    #[inline]
    #[must_use]
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Builds the transport.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] if the context or heartbeat is missing, or the
    ///   options are invalid
    /// - [`Error::InvalidArgument`] if the request has no `connectionId`
    ///   or a non-numeric `messageId`
    pub fn build(self) -> Result<ForeverTransport> {
        self.options.validate()?;

        let context = self
            .context
            .ok_or_else(|| Error::config("host context is required"))?;

        let heartbeat = self
            .heartbeat
            .ok_or_else(|| Error::config("heartbeat is required"))?;

        ForeverTransport::from_bindings(Bindings {
            context,
            heartbeat,
            serializer: self.serializer,
            observer: self.observer,
            options: self.options,
            shutdown: self.shutdown,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
