//! WebSocket-backed response.
//!
//! Wraps the write half of a `tokio-tungstenite` stream as a [`Response`].
//! Each write becomes one text message. The read half is driven by
//! [`pump_inbound`], which forwards client text messages to the transport
//! as "received" notifications.
//!
//! # Wiring
//!
//! ```ignore
//! let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
//! let (response, inbound) = WebSocketResponse::split(ws);
//! let context = HostContext::new(Arc::new(request), response.clone());
//! let transport = ForeverTransport::builder().context(context)...build()?;
//!
//! tokio::spawn(pump_inbound(inbound, response, transport.clone()));
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::Request as HandshakeRequest;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::transport::ForeverTransport;

use super::Response;
use super::request::OwnedRequest;

// ============================================================================
// WebSocketResponse
// ============================================================================

/// A [`Response`] that writes text messages to a WebSocket.
pub struct WebSocketResponse<S> {
    /// Write half.
    sink: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    /// Cleared on remote close or write failure.
    connected: AtomicBool,
}

impl<S> fmt::Debug for WebSocketResponse<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketResponse")
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl<S> WebSocketResponse<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Splits a WebSocket into a response and its inbound half.
    #[must_use]
    pub fn split(ws: WebSocketStream<S>) -> (Arc<Self>, SplitStream<WebSocketStream<S>>) {
        let (sink, stream) = ws.split();
        let response = Arc::new(Self {
            sink: Mutex::new(sink),
            connected: AtomicBool::new(true),
        });
        (response, stream)
    }

    /// Marks the client as gone.
    pub fn mark_closed(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            debug!("WebSocket client gone");
        }
    }

    /// Sends a close frame and marks the client as gone.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WebSocket`] if the close frame cannot be sent.
    pub async fn close(&self) -> Result<()> {
        self.mark_closed();
        self.sink.lock().await.close().await?;
        Ok(())
    }
}

#[async_trait]
impl<S> Response for WebSocketResponse<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    fn set_buffering(&self, enabled: bool) {
        // Every message is flushed on send.
        trace!(enabled, "Buffering ignored for WebSocket");
    }

    fn is_client_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn write(&self, data: &str) -> Result<()> {
        if !self.is_client_connected() {
            return Err(Error::ConnectionClosed);
        }

        let sent = self
            .sink
            .lock()
            .await
            .send(Message::text(data.to_owned()))
            .await;

        if let Err(e) = sent {
            self.mark_closed();
            return Err(e.into());
        }
        Ok(())
    }
}

// ============================================================================
// Inbound
// ============================================================================

/// Forwards inbound text messages to `transport` until the client closes.
///
/// Marks `response` closed when the stream ends, so the receive loop
/// disconnects on its next iteration.
///
/// # Errors
///
/// Returns [`Error::WebSocket`] if reading fails.
pub async fn pump_inbound<S>(
    mut inbound: SplitStream<WebSocketStream<S>>,
    response: Arc<WebSocketResponse<S>>,
    transport: ForeverTransport,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let result = loop {
        let Some(message) = inbound.next().await else {
            break Ok(());
        };

        match message {
            Ok(Message::Text(text)) => transport.raise_received(text.as_str()),
            Ok(Message::Close(frame)) => {
                debug!(
                    connection_id = %transport.connection_id(),
                    ?frame,
                    "WebSocket closed by client"
                );
                break Ok(());
            }
            Ok(Message::Binary(data)) => {
                warn!(bytes = data.len(), "Ignoring binary WebSocket message");
            }
            Ok(_) => {}
            Err(e) => {
                warn!(connection_id = %transport.connection_id(), error = %e, "WebSocket read failed");
                break Err(Error::from(e));
            }
        }
    };

    response.mark_closed();
    result
}

/// Builds an [`OwnedRequest`] from a WebSocket upgrade request.
///
/// # Errors
///
/// Returns [`Error::InvalidArgument`] if the request target cannot be parsed.
pub fn request_from_handshake(request: &HandshakeRequest) -> Result<OwnedRequest> {
    let mut owned = OwnedRequest::from_uri(&request.uri().to_string())?;
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            owned = owned.with_header(name.as_str(), value);
        }
    }
    Ok(owned)
}

// ============================================================================
// Tests
// ============================================================================
