//! Persistent transport engine.
//!
//! A [`ForeverTransport`] drives one logical connection over one inbound
//! exchange: it decides between the send route and a connect, runs the
//! receive loop over the [`ReceivingConnection`], serializes outbound
//! responses, and emits the disconnect signal.
//!
//! # Receive Loop
//!
//! ```text
//!            ┌──────────────────────────────────────┐
//!            ▼                                      │
//!   disconnected / client gone? ──yes──► disconnect() ► Disconnected
//!            │ no
//!            ▼
//!   fetch(cursor)  ◄── shutdown ──► Cancelled
//!            │      ◄── disconnect() wakes the fetch
//!            ▼
//!   cursor = response.message_id
//!   send(response)
//!            │
//!   response.disconnect? ──yes──► disconnect() ► Completed
//!   single response?     ──yes──► Completed
//!            └──────────────────────────────────────┘
//! ```
//!
//! The loop owns the delivery cursor and advances it before the send.
//! A send that fails after reaching the wire can therefore skip at most
//! one message on resume.

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::connection::ReceivingConnection;
use crate::error::{Error, Result};
use crate::host::HostContext;
use crate::identifiers::{ConnectionId, MessageId, TransportId};
use crate::protocol::{Groups, SignalCommand};
use crate::serializer::JsonSerializer;

use super::builder::TransportBuilder;
use super::heartbeat::{TrackingDisconnect, TransportHeartBeat};
use super::observer::TransportObserver;
use super::options::{TransportKind, TransportOptions};

// ============================================================================
// Constants
// ============================================================================

/// Path suffix of the send route.
pub const SEND_SUFFIX: &str = "/send";

/// Query parameter carrying the logical connection identity.
pub const CONNECTION_ID_FIELD: &str = "connectionId";

/// Query parameter carrying the resume cursor.
pub const MESSAGE_ID_FIELD: &str = "messageId";

/// Query or form field carrying the group list.
pub const GROUPS_FIELD: &str = "groups";

/// Form field carrying the payload of the send route.
pub const DATA_FIELD: &str = "data";

// ============================================================================
// Types
// ============================================================================

/// Deferred receive loop returned by [`ForeverTransport::process_request`].
///
/// Resolves to `Err(Error::Cancelled)` on host shutdown and to the fault on
/// a fetch failure or a send failure while the client is still connected.
pub type ReceiveLoop = BoxFuture<'static, Result<LoopOutcome>>;

/// How a receive loop ended normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopOutcome {
    /// The client went away or the transport was disconnected.
    Disconnected,
    /// The server ended the connection, or the single response was sent.
    Completed,
}

/// Life cycle of a transport instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportState {
    /// Built, no request processed yet.
    #[default]
    Idle,
    /// Fresh connect accepted.
    Connecting,
    /// Receive loop running.
    Streaming,
    /// Ended through the disconnect path.
    Disconnected,
    /// Ended by a fetch or send failure.
    Faulted,
    /// Ended by a server-side disconnect or a single-response exchange.
    Completed,
    /// Ended by host shutdown.
    Cancelled,
}

impl TransportState {
    /// Returns `true` for states no transition leaves.
    #[inline]
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Disconnected | Self::Faulted | Self::Completed | Self::Cancelled
        )
    }
}

/// Everything a transport is built from.
pub(super) struct Bindings {
    pub(super) context: Arc<HostContext>,
    pub(super) heartbeat: Arc<TransportHeartBeat>,
    pub(super) serializer: Arc<dyn JsonSerializer>,
    pub(super) observer: Arc<dyn TransportObserver>,
    pub(super) options: TransportOptions,
    pub(super) shutdown: CancellationToken,
}

// ============================================================================
// Registration
// ============================================================================

/// Keeps a transport in the liveness registry while the receive loop lives.
struct Registration {
    heartbeat: Arc<TransportHeartBeat>,
    id: TransportId,
}

impl Registration {
    fn new(heartbeat: Arc<TransportHeartBeat>, transport: Arc<dyn TrackingDisconnect>) -> Self {
        let id = transport.transport_id();
        heartbeat.add_connection(transport);
        Self { heartbeat, id }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.heartbeat.remove_connection(self.id);
    }
}

// ============================================================================
// TransportInner
// ============================================================================

struct TransportInner {
    id: TransportId,
    connection_id: ConnectionId,
    groups: Groups,
    context: Arc<HostContext>,
    options: TransportOptions,
    serializer: Arc<dyn JsonSerializer>,
    observer: Arc<dyn TransportObserver>,
    heartbeat: Arc<TransportHeartBeat>,
    /// Host shutdown.
    shutdown: CancellationToken,
    /// Set once a request has been processed.
    connection: Mutex<Option<Arc<dyn ReceivingConnection>>>,
    /// Delivery cursor.
    last_message_id: Mutex<Option<MessageId>>,
    /// Write-once.
    disconnected: AtomicBool,
    state: Mutex<TransportState>,
    /// Cancelled by teardown to wake a suspended fetch.
    wake: CancellationToken,
}

impl TransportInner {
    fn state(&self) -> TransportState {
        *self.state.lock()
    }

    /// Moves to `next` unless the current state is terminal.
    fn transition(&self, next: TransportState) -> bool {
        let mut state = self.state.lock();
        if state.is_terminal() {
            return false;
        }
        debug!(transport_id = %self.id, from = ?*state, to = ?next, "Transport state");
        *state = next;
        true
    }

    fn is_disconnected(&self) -> bool {
        self.disconnected.load(Ordering::Acquire)
    }

    fn is_send_request(&self) -> bool {
        self.context.request().path().ends_with(SEND_SUFFIX)
    }

    /// Idempotent disconnect.
    fn teardown(&self) {
        if self
            .disconnected
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        self.wake.cancel();

        info!(
            transport_id = %self.id,
            connection_id = %self.connection_id,
            "Transport disconnected"
        );
        self.observer.on_disconnected(&self.connection_id);

        let connection = self.connection.lock().clone();
        if let Some(connection) = connection {
            connection.send_command(SignalCommand::disconnect(self.options.disconnect_expiry));
        }
    }

    fn raise_received(&self, data: &str) {
        self.observer.on_receiving(data);
        debug!(connection_id = %self.connection_id, bytes = data.len(), "Message received");
        self.observer.on_received(&self.connection_id, data);
    }

    /// Serializes, marks liveness, then writes.
    async fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        let text = self.serializer.stringify(&value)?;

        self.heartbeat.mark_connection(self.id);
        self.observer.on_sending(&text);
        trace!(transport_id = %self.id, bytes = text.len(), "Sending");

        let frame = self.options.kind.frame(&text);
        self.context.response().write(&frame).await
    }

    /// Runs a write, routing a failure on a departed client through the
    /// disconnect path.
    ///
    /// Returns `Some` when the loop must end.
    async fn write_or_disconnect(
        &self,
        write: impl Future<Output = Result<()>>,
    ) -> Result<Option<LoopOutcome>> {
        match self.cancellable(write).await {
            Ok(()) => Ok(None),
            Err(e) if !e.is_cancelled() && !self.context.response().is_client_connected() => {
                debug!(transport_id = %self.id, error = %e, "Client gone during write");
                self.teardown();
                Ok(Some(LoopOutcome::Disconnected))
            }
            Err(e) => Err(e),
        }
    }

    /// Runs `future` unless host shutdown comes first.
    async fn cancellable<T>(&self, future: impl Future<Output = Result<T>>) -> Result<T> {
        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(Error::Cancelled),
            result = future => result,
        }
    }

    async fn run(
        self: Arc<Self>,
        connection: Arc<dyn ReceivingConnection>,
        _registration: Registration,
    ) -> Result<LoopOutcome> {
        let result = self.receive_loop(connection.as_ref()).await;

        match &result {
            Ok(LoopOutcome::Disconnected) => {
                self.transition(TransportState::Disconnected);
            }
            Ok(LoopOutcome::Completed) => {
                self.transition(TransportState::Completed);
                debug!(transport_id = %self.id, "Receive loop completed");
            }
            Err(e) if e.is_cancelled() => {
                self.transition(TransportState::Cancelled);
                debug!(transport_id = %self.id, "Receive loop cancelled");
            }
            Err(e) => {
                self.transition(TransportState::Faulted);
                warn!(
                    transport_id = %self.id,
                    connection_id = %self.connection_id,
                    error = %e,
                    "Receive loop faulted"
                );
                self.observer.on_error(&self.connection_id, e);
            }
        }

        result
    }

    async fn receive_loop(&self, connection: &dyn ReceivingConnection) -> Result<LoopOutcome> {
        let response = self.context.response();
        response.set_buffering(false);
        connection.set_receive_timeout(self.options.receive_timeout);

        let mut preamble = self.options.kind.preamble();

        loop {
            if self.is_disconnected() || !response.is_client_connected() {
                self.teardown();
                return Ok(LoopOutcome::Disconnected);
            }

            if let Some(text) = preamble.take() {
                if let Some(outcome) = self.write_or_disconnect(response.write(text)).await? {
                    return Ok(outcome);
                }
            }

            let cursor = *self.last_message_id.lock();
            let fetched = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => return Err(Error::Cancelled),
                () = self.wake.cancelled() => continue,
                fetched = connection.receive(cursor) => fetched?,
            };

            *self.last_message_id.lock() = Some(fetched.message_id);
            if let Some(outcome) = self.write_or_disconnect(self.send(&fetched)).await? {
                return Ok(outcome);
            }

            if fetched.disconnect {
                debug!(
                    transport_id = %self.id,
                    message_id = %fetched.message_id,
                    "Server ended the connection"
                );
                self.teardown();
                return Ok(LoopOutcome::Completed);
            }

            if self.options.kind.is_single_response() {
                return Ok(LoopOutcome::Completed);
            }
        }
    }
}

impl TrackingDisconnect for TransportInner {
    fn transport_id(&self) -> TransportId {
        self.id
    }

    fn connection_id(&self) -> &ConnectionId {
        &self.connection_id
    }

    fn is_alive(&self) -> bool {
        self.context.response().is_client_connected()
    }

    fn disconnect_threshold(&self) -> Duration {
        self.options.disconnect_threshold
    }

    fn disconnect(&self) {
        self.teardown();
    }
}

// ============================================================================
// ForeverTransport
// ============================================================================

/// One transport instance bound to one inbound exchange.
///
/// Cheap to clone; clones share the same instance.
///
/// # Example
///
/// ```ignore
/// let transport = ForeverTransport::builder()
///     .context(context)
///     .heartbeat(Arc::clone(&heartbeat))
///     .build()?;
///
/// if let Some(receive_loop) = transport.process_request(connection)? {
///     tokio::spawn(receive_loop);
/// }
/// ```
#[derive(Clone)]
pub struct ForeverTransport {
    inner: Arc<TransportInner>,
}

impl fmt::Debug for ForeverTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeverTransport")
            .field("id", &self.inner.id)
            .field("connection_id", &self.inner.connection_id)
            .field("kind", &self.inner.options.kind)
            .field("state", &self.inner.state())
            .field("last_message_id", &self.last_message_id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// ForeverTransport - Construction
// ============================================================================

impl ForeverTransport {
    /// Creates a builder.
    #[inline]
    #[must_use]
    pub fn builder() -> TransportBuilder {
        TransportBuilder::new()
    }

    /// Binds a transport to the exchange in `bindings.context`.
    ///
    /// Reads `connectionId`, `messageId` and `groups` from the request.
    pub(super) fn from_bindings(bindings: Bindings) -> Result<Self> {
        let Bindings {
            context,
            heartbeat,
            serializer,
            observer,
            options,
            shutdown,
        } = bindings;

        let request = context.request();

        let connection_id = request
            .query_string()
            .get(CONNECTION_ID_FIELD)
            .and_then(ConnectionId::new)
            .ok_or_else(|| Error::invalid_argument("missing connectionId"))?;

        let last_message_id = request
            .query_string()
            .get(MESSAGE_ID_FIELD)
            .filter(|value| !value.trim().is_empty())
            .map(|value| value.parse::<MessageId>())
            .transpose()?;

        let groups = Groups::parse(request.query_string_or_form(GROUPS_FIELD).as_deref());

        let inner = TransportInner {
            id: TransportId::next(),
            connection_id,
            groups,
            context,
            options,
            serializer,
            observer,
            heartbeat,
            shutdown,
            connection: Mutex::new(None),
            last_message_id: Mutex::new(last_message_id),
            disconnected: AtomicBool::new(false),
            state: Mutex::new(TransportState::Idle),
            wake: CancellationToken::new(),
        };

        debug!(
            transport_id = %inner.id,
            connection_id = %inner.connection_id,
            kind = %inner.options.kind,
            resume_from = ?last_message_id,
            groups = inner.groups.len(),
            "Transport created"
        );

        Ok(Self {
            inner: Arc::new(inner),
        })
    }
}

// ============================================================================
// ForeverTransport - Accessors
// ============================================================================

impl ForeverTransport {
    /// Returns the registry key of this instance.
    #[inline]
    #[must_use]
    pub fn id(&self) -> TransportId {
        self.inner.id
    }

    /// Returns the logical connection identity.
    #[inline]
    #[must_use]
    pub fn connection_id(&self) -> &ConnectionId {
        &self.inner.connection_id
    }

    /// Returns the groups named by the exchange.
    #[inline]
    #[must_use]
    pub fn groups(&self) -> &Groups {
        &self.inner.groups
    }

    /// Returns the substrate variant.
    #[inline]
    #[must_use]
    pub fn kind(&self) -> TransportKind {
        self.inner.options.kind
    }

    /// Returns the host context.
    #[inline]
    #[must_use]
    pub fn context(&self) -> &HostContext {
        &self.inner.context
    }

    /// Returns the delivery cursor.
    #[must_use]
    pub fn last_message_id(&self) -> Option<MessageId> {
        *self.inner.last_message_id.lock()
    }

    /// Returns the life cycle state.
    #[must_use]
    pub fn state(&self) -> TransportState {
        self.inner.state()
    }

    /// Returns `true` once [`disconnect`](Self::disconnect) has run.
    #[inline]
    #[must_use]
    pub fn is_disconnected(&self) -> bool {
        self.inner.is_disconnected()
    }
}

// ============================================================================
// ForeverTransport - Operations
// ============================================================================

impl ForeverTransport {
    /// Processes the exchange.
    ///
    /// On the send route, raises "received" with the `data` form field and
    /// returns `None`. Otherwise raises "connected" for a fresh connect,
    /// registers with the liveness registry and returns the receive loop.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if this instance already started a
    /// receive loop.
    pub fn process_request(
        &self,
        connection: Arc<dyn ReceivingConnection>,
    ) -> Result<Option<ReceiveLoop>> {
        let inner = &self.inner;

        if inner.is_send_request() {
            let data = inner
                .context
                .request()
                .form()
                .get(DATA_FIELD)
                .unwrap_or_default();
            inner.raise_received(&data);
            return Ok(None);
        }

        if inner.state() != TransportState::Idle {
            return Err(Error::protocol("transport already processed a request"));
        }

        *inner.connection.lock() = Some(Arc::clone(&connection));

        if self.last_message_id().is_none() {
            inner.transition(TransportState::Connecting);
            info!(
                transport_id = %inner.id,
                connection_id = %inner.connection_id,
                kind = %inner.options.kind,
                "Transport connected"
            );
            inner.observer.on_connected(&inner.connection_id);
        }
        inner.transition(TransportState::Streaming);

        let registration = Registration::new(
            Arc::clone(&inner.heartbeat),
            Arc::clone(inner) as Arc<dyn TrackingDisconnect>,
        );

        Ok(Some(Box::pin(
            Arc::clone(inner).run(connection, registration),
        )))
    }

    /// Serializes `value` and writes it to the client.
    ///
    /// Refreshes the liveness timestamp before the write.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub async fn send<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        self.inner.send(value).await
    }

    /// Disconnects the transport.
    ///
    /// Raises "disconnected" and issues the disconnect signal once;
    /// later calls do nothing. Wakes a suspended receive loop.
    pub fn disconnect(&self) {
        self.inner.teardown();
    }

    /// Raises "received" for a message the client sent.
    pub fn raise_received(&self, data: &str) {
        self.inner.raise_received(data);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde_json::{Value, json};
    use tokio::sync::mpsc;

    use crate::connection::InMemoryConnection;
    use crate::host::{MemoryResponse, OwnedRequest};
    use crate::protocol::PersistentResponse;
    use crate::transport::observer::recording::{Observed, RecordingObserver};
    use crate::transport::options::STREAMING_RECEIVE_TIMEOUT;

    // ------------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------------

    type Script = mpsc::UnboundedSender<Result<PersistentResponse>>;

    /// Connection that yields whatever the test pushes, one per fetch.
    struct ScriptedConnection {
        responses: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<PersistentResponse>>>,
        cursors: Mutex<Vec<Option<MessageId>>>,
        commands: Mutex<Vec<SignalCommand>>,
        receive_timeout: Mutex<Duration>,
    }

    impl ScriptedConnection {
        fn new() -> (Arc<Self>, Script) {
            let (tx, rx) = mpsc::unbounded_channel();
            let connection = Arc::new(Self {
                responses: tokio::sync::Mutex::new(rx),
                cursors: Mutex::new(Vec::new()),
                commands: Mutex::new(Vec::new()),
                receive_timeout: Mutex::new(Duration::from_secs(120)),
            });
            (connection, tx)
        }

        fn cursors(&self) -> Vec<Option<MessageId>> {
            self.cursors.lock().clone()
        }

        fn commands(&self) -> Vec<SignalCommand> {
            self.commands.lock().clone()
        }
    }

    #[async_trait]
    impl ReceivingConnection for ScriptedConnection {
        async fn receive(&self, last_message_id: Option<MessageId>) -> Result<PersistentResponse> {
            self.cursors.lock().push(last_message_id);
            match self.responses.lock().await.recv().await {
                Some(response) => response,
                None => std::future::pending().await,
            }
        }

        fn send_command(&self, command: SignalCommand) {
            self.commands.lock().push(command);
        }

        fn receive_timeout(&self) -> Duration {
            *self.receive_timeout.lock()
        }

        fn set_receive_timeout(&self, timeout: Duration) {
            *self.receive_timeout.lock() = timeout;
        }
    }

    struct Fixture {
        transport: ForeverTransport,
        response: Arc<MemoryResponse>,
        observer: Arc<RecordingObserver>,
        heartbeat: Arc<TransportHeartBeat>,
        shutdown: CancellationToken,
    }

    fn fixture(request: OwnedRequest, options: TransportOptions) -> Fixture {
        let response = Arc::new(MemoryResponse::new());
        let observer = Arc::new(RecordingObserver::default());
        let heartbeat = TransportHeartBeat::with_defaults();
        let shutdown = CancellationToken::new();

        let context = HostContext::new(Arc::new(request), response.clone());
        let transport = ForeverTransport::builder()
            .context(context)
            .heartbeat(Arc::clone(&heartbeat))
            .observer(observer.clone())
            .options(options)
            .shutdown(shutdown.clone())
            .build()
            .unwrap();

        Fixture {
            transport,
            response,
            observer,
            heartbeat,
            shutdown,
        }
    }

    fn connect_request(connection_id: &str) -> OwnedRequest {
        OwnedRequest::new("/echo/connect").with_query(CONNECTION_ID_FIELD, connection_id)
    }

    fn streaming(connection_id: &str) -> Fixture {
        fixture(connect_request(connection_id), TransportOptions::default())
    }

    fn decode(frame: &str) -> PersistentResponse {
        serde_json::from_str(frame).unwrap()
    }

    fn message(id: u64, payload: impl Into<Value>) -> Result<PersistentResponse> {
        Ok(PersistentResponse::new(MessageId::new(id), payload))
    }

    // ------------------------------------------------------------------------
    // Scenarios
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_connect_stream_then_server_disconnect() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();

        let receive_loop = f.transport.process_request(connection.clone()).unwrap().unwrap();
        assert_eq!(f.observer.events(), vec![Observed::Connected("c1".into())]);
        assert!(connection.cursors().is_empty());
        assert_eq!(f.transport.state(), TransportState::Streaming);
        assert!(f.heartbeat.is_tracked(f.transport.id()));

        let handle = tokio::spawn(receive_loop);

        script.send(message(1, "hello")).unwrap();
        f.response.wait_for_frames(1).await;
        assert_eq!(decode(&f.response.frames()[0]).payload, json!("hello"));
        assert_eq!(f.transport.last_message_id(), Some(MessageId::new(1)));

        script
            .send(Ok(PersistentResponse::new(MessageId::new(2), "bye").with_disconnect()))
            .unwrap();
        let outcome = handle.await.unwrap().unwrap();

        assert_eq!(outcome, LoopOutcome::Completed);
        assert_eq!(f.transport.state(), TransportState::Completed);
        let frames = f.response.frames();
        assert_eq!(frames.len(), 2);
        assert_eq!(decode(&frames[1]).payload, json!("bye"));
        assert!(f.transport.is_disconnected());
        assert_eq!(connection.commands(), vec![SignalCommand::default()]);
        assert_eq!(connection.cursors(), vec![None, Some(MessageId::new(1))]);
        assert_eq!(f.observer.count(|e| matches!(e, Observed::Disconnected(_))), 1);
        assert!(!f.heartbeat.is_tracked(f.transport.id()));
    }

    #[tokio::test]
    async fn test_send_route_raises_received() {
        let request = OwnedRequest::new("/echo/send")
            .with_query(CONNECTION_ID_FIELD, "c1")
            .with_form(DATA_FIELD, "ping");
        let f = fixture(request, TransportOptions::default());
        let (connection, _script) = ScriptedConnection::new();

        let receive_loop = f.transport.process_request(connection.clone()).unwrap();

        assert!(receive_loop.is_none());
        assert_eq!(
            f.observer.events(),
            vec![
                Observed::Receiving("ping".into()),
                Observed::Received("c1".into(), "ping".into()),
            ]
        );
        assert!(connection.cursors().is_empty());
        assert!(!f.heartbeat.is_tracked(f.transport.id()));
        assert_eq!(f.transport.state(), TransportState::Idle);
    }

    #[tokio::test]
    async fn test_send_route_without_data() {
        let request = OwnedRequest::new("/echo/send").with_query(CONNECTION_ID_FIELD, "c1");
        let f = fixture(request, TransportOptions::default());
        let (connection, _script) = ScriptedConnection::new();

        assert!(f.transport.process_request(connection).unwrap().is_none());
        assert!(f.observer.events().contains(&Observed::Received("c1".into(), String::new())));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let f = streaming("c1");
        let (connection, _script) = ScriptedConnection::new();
        let receive_loop = f.transport.process_request(connection.clone()).unwrap().unwrap();
        let handle = tokio::spawn(receive_loop);

        let callers: Vec<_> = (0..8)
            .map(|_| {
                let transport = f.transport.clone();
                tokio::spawn(async move { transport.disconnect() })
            })
            .collect();
        for caller in callers {
            caller.await.unwrap();
        }
        f.transport.disconnect();

        assert_eq!(handle.await.unwrap().unwrap(), LoopOutcome::Disconnected);
        assert_eq!(connection.commands().len(), 1);
        assert_eq!(f.observer.count(|e| matches!(e, Observed::Disconnected(_))), 1);
        assert_eq!(f.transport.state(), TransportState::Disconnected);
    }

    #[tokio::test]
    async fn test_client_gone_before_first_fetch() {
        let f = streaming("c1");
        let (connection, _script) = ScriptedConnection::new();
        f.response.disconnect_client();

        let receive_loop = f.transport.process_request(connection.clone()).unwrap().unwrap();
        let outcome = receive_loop.await.unwrap();

        assert_eq!(outcome, LoopOutcome::Disconnected);
        assert!(connection.cursors().is_empty());
        assert_eq!(connection.commands().len(), 1);
        assert!(f.response.frames().is_empty());
    }

    #[tokio::test]
    async fn test_client_gone_between_messages() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        script.send(message(1, "a")).unwrap();
        f.response.wait_for_frames(1).await;
        f.response.disconnect_client();
        script.send(message(2, "b")).unwrap();

        // The in-flight fetch completes and its write fails on the closed client.
        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, LoopOutcome::Disconnected);
        assert_eq!(f.transport.state(), TransportState::Disconnected);
        assert!(f.transport.is_disconnected());
        assert_eq!(connection.commands().len(), 1);
        assert_eq!(f.observer.count(|e| matches!(e, Observed::Disconnected(_))), 1);
        assert_eq!(f.observer.count(|e| matches!(e, Observed::Error(_))), 0);
        assert_eq!(f.transport.last_message_id(), Some(MessageId::new(2)));
    }

    #[tokio::test]
    async fn test_write_fault_with_client_present_still_faults() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        f.response.set_fail_writes(true);
        script.send(message(1, "a")).unwrap();

        assert!(handle.await.unwrap().is_err());
        assert_eq!(f.transport.state(), TransportState::Faulted);
        assert!(!f.transport.is_disconnected());
        assert!(connection.commands().is_empty());
    }

    #[tokio::test]
    async fn test_resume_skips_connected_notification() {
        let request = connect_request("c1").with_query(MESSAGE_ID_FIELD, "5");
        let f = fixture(request, TransportOptions::default());
        let (connection, script) = ScriptedConnection::new();

        let receive_loop = f.transport.process_request(connection.clone()).unwrap().unwrap();
        assert!(f.observer.events().is_empty());
        assert_eq!(f.transport.last_message_id(), Some(MessageId::new(5)));

        let handle = tokio::spawn(receive_loop);
        script
            .send(Ok(PersistentResponse::new(MessageId::new(6), "x").with_disconnect()))
            .unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(connection.cursors(), vec![Some(MessageId::new(5))]);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_loop() {
        let f = streaming("c1");
        let (connection, _script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        tokio::task::yield_now().await;
        f.shutdown.cancel();

        let error = handle.await.unwrap().unwrap_err();
        assert!(error.is_cancelled());
        assert_eq!(f.transport.state(), TransportState::Cancelled);
        assert!(!f.transport.is_disconnected());
        assert!(connection.commands().is_empty());
        assert!(!f.heartbeat.is_tracked(f.transport.id()));
    }

    #[tokio::test]
    async fn test_fetch_fault_propagates() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        script.send(Err(Error::connection("store unavailable"))).unwrap();

        let error = handle.await.unwrap().unwrap_err();
        assert!(error.is_connection_error());
        assert!(!error.is_cancelled());
        assert_eq!(f.transport.state(), TransportState::Faulted);
        assert_eq!(f.observer.count(|e| matches!(e, Observed::Error(_))), 1);
        assert!(connection.commands().is_empty());
    }

    #[tokio::test]
    async fn test_write_fault_advances_cursor() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        f.response.set_fail_writes(true);
        script.send(message(3, "lost")).unwrap();

        assert!(handle.await.unwrap().is_err());
        assert_eq!(f.transport.last_message_id(), Some(MessageId::new(3)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_eviction_wakes_loop() {
        let f = fixture(
            connect_request("c1"),
            TransportOptions::new().with_disconnect_threshold(Duration::from_secs(5)),
        );
        let (connection, _script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(f.heartbeat.beat(), 1);

        assert_eq!(handle.await.unwrap().unwrap(), LoopOutcome::Disconnected);
        assert_eq!(connection.commands().len(), 1);
        assert_eq!(f.transport.state(), TransportState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_marks_liveness() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection).unwrap().unwrap());

        tokio::task::yield_now().await;
        tokio::time::advance(Duration::from_secs(3)).await;
        script
            .send(Ok(PersistentResponse::timed_out(MessageId::ZERO)))
            .unwrap();
        f.response.wait_for_frames(1).await;

        assert_eq!(
            f.heartbeat.last_marked(f.transport.id()),
            Some(tokio::time::Instant::now())
        );
        assert!(decode(&f.response.frames()[0]).timed_out);

        f.transport.disconnect();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_loop_initializes_response_and_connection() {
        let f = streaming("c1");
        let (connection, script) = ScriptedConnection::new();
        assert!(f.response.is_buffering());

        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());
        script.send(message(1, "a")).unwrap();
        f.response.wait_for_frames(1).await;

        assert!(!f.response.is_buffering());
        assert_eq!(connection.receive_timeout(), STREAMING_RECEIVE_TIMEOUT);

        f.transport.disconnect();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_server_sent_events_framing() {
        let f = fixture(
            connect_request("c1"),
            TransportOptions::for_kind(TransportKind::ServerSentEvents),
        );
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection).unwrap().unwrap());

        script
            .send(Ok(PersistentResponse::new(MessageId::new(1), "x").with_disconnect()))
            .unwrap();
        handle.await.unwrap().unwrap();

        let frames = f.response.frames();
        assert_eq!(frames[0], "data: initialized\n\n");
        let event = frames[1]
            .strip_prefix("data: ")
            .and_then(|rest| rest.strip_suffix("\n\n"))
            .unwrap();
        assert_eq!(decode(event).payload, json!("x"));
    }

    #[tokio::test]
    async fn test_long_polling_completes_after_one_send() {
        let f = fixture(
            connect_request("c1"),
            TransportOptions::for_kind(TransportKind::LongPolling),
        );
        let (connection, script) = ScriptedConnection::new();
        let handle = tokio::spawn(f.transport.process_request(connection.clone()).unwrap().unwrap());

        script.send(message(1, "only")).unwrap();
        script.send(message(2, "next poll")).unwrap();

        assert_eq!(handle.await.unwrap().unwrap(), LoopOutcome::Completed);
        assert_eq!(f.response.frame_count(), 1);
        assert!(!f.transport.is_disconnected());
        assert!(connection.commands().is_empty());
    }

    #[tokio::test]
    async fn test_explicit_send() {
        let f = streaming("c1");
        f.transport.send(&json!({ "hub": "chat" })).await.unwrap();

        assert_eq!(f.response.frames(), vec![r#"{"hub":"chat"}"#.to_owned()]);
        assert_eq!(
            f.observer.events(),
            vec![Observed::Sending(r#"{"hub":"chat"}"#.into())]
        );
    }

    #[tokio::test]
    async fn test_second_process_request_rejected() {
        let f = streaming("c1");
        let (connection, _script) = ScriptedConnection::new();
        let _loop = f.transport.process_request(connection.clone()).unwrap();

        let Err(error) = f.transport.process_request(connection) else {
            panic!("second process_request accepted");
        };
        assert!(matches!(error, Error::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_disconnect_before_processing_sends_no_signal() {
        let f = streaming("c1");
        f.transport.disconnect();
        assert!(f.transport.is_disconnected());

        let (connection, _script) = ScriptedConnection::new();
        let outcome = f
            .transport
            .process_request(connection.clone())
            .unwrap()
            .unwrap()
            .await
            .unwrap();

        assert_eq!(outcome, LoopOutcome::Disconnected);
        assert!(connection.cursors().is_empty());
        assert!(connection.commands().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_loop_unregisters() {
        let f = streaming("c1");
        let (connection, _script) = ScriptedConnection::new();
        let receive_loop = f.transport.process_request(connection).unwrap().unwrap();
        assert_eq!(f.heartbeat.connection_count(), 1);

        drop(receive_loop);
        assert_eq!(f.heartbeat.connection_count(), 0);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!TransportState::Idle.is_terminal());
        assert!(!TransportState::Streaming.is_terminal());
        assert!(TransportState::Disconnected.is_terminal());
        assert!(TransportState::Faulted.is_terminal());
        assert!(TransportState::Completed.is_terminal());
        assert!(TransportState::Cancelled.is_terminal());
    }

    // ------------------------------------------------------------------------
    // Ordering and resume over the in-memory store
    // ------------------------------------------------------------------------

    fn run_against_store(payloads: &[u32], resume_from: Option<u64>) -> Vec<PersistentResponse> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let mut request = connect_request("c1");
            if let Some(cursor) = resume_from {
                request = request.with_query(MESSAGE_ID_FIELD, cursor.to_string());
            }
            let f = fixture(request, TransportOptions::default());

            let store = InMemoryConnection::new(f.transport.connection_id().clone());
            for payload in payloads {
                store.publish(*payload);
            }
            store.request_disconnect();

            let outcome = f
                .transport
                .process_request(Arc::new(store.clone()))
                .unwrap()
                .unwrap()
                .await
                .unwrap();
            assert_eq!(outcome, LoopOutcome::Completed);
            assert_eq!(store.commands().len(), 1);

            f.response.frames().iter().map(|frame| decode(frame)).collect()
        })
    }

    proptest! {
        #[test]
        fn test_uninterrupted_loop_delivers_in_order(
            payloads in proptest::collection::vec(any::<u32>(), 1..40)
        ) {
            let delivered = run_against_store(&payloads, None);

            let ids: Vec<u64> = delivered.iter().map(|r| r.message_id.as_u64()).collect();
            let expected: Vec<u64> = (1..=payloads.len() as u64).collect();
            prop_assert_eq!(ids, expected);

            let received: Vec<Value> = delivered.iter().map(|r| r.payload.clone()).collect();
            let sent: Vec<Value> = payloads.iter().map(|p| json!(p)).collect();
            prop_assert_eq!(received, sent);
        }

        #[test]
        fn test_resume_delivers_only_after_cursor(
            (count, cursor) in (1u64..30).prop_flat_map(|n| (Just(n), 0..=n))
        ) {
            let payloads: Vec<u32> = (0..count as u32).collect();
            let delivered = run_against_store(&payloads, Some(cursor));

            let ids: Vec<u64> = delivered
                .iter()
                .filter(|r| !r.is_empty())
                .map(|r| r.message_id.as_u64())
                .collect();
            let expected: Vec<u64> = (cursor + 1..=count).collect();
            prop_assert_eq!(ids, expected);
        }
    }
}
