//! WebSocket stream server.
//!
//! Serves persistent connections over WebSockets, backed by in-memory
//! stores. Every connected client receives a tick each second; text sent
//! by a client is echoed back through its store.
//!
//! Usage:
//!   cargo run --example stream_server [-- --debug]
//!
//! Then connect with any WebSocket client:
//!   ws://127.0.0.1:8080/echo/connect?connectionId=c1
//!   ws://127.0.0.1:8080/echo/connect?connectionId=c1&messageId=3   (resume)
//!   ws://127.0.0.1:8080/echo/connect?connectionId=c1&transport=longPolling

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use persistent_transport::host::SUPPORTS_WEB_SOCKETS;
use persistent_transport::host::websocket::{pump_inbound, request_from_handshake};
use persistent_transport::{
    ConnectionId, ForeverTransport, HeartbeatOptions, HostContext, InMemoryConnection,
    OwnedRequest, Request as _, TransportHeartBeat, TransportKind, TransportObserver,
    TransportOptions, WebSocketResponse,
};

// ============================================================================
// Constants
// ============================================================================

const ADDRESS: &str = "127.0.0.1:8080";
const TICK_INTERVAL: Duration = Duration::from_secs(1);
const TRANSPORT_FIELD: &str = "transport";

// ============================================================================
// Types
// ============================================================================

/// Message stores by logical connection.
#[derive(Default, Clone)]
struct Stores {
    inner: Arc<Mutex<FxHashMap<ConnectionId, InMemoryConnection>>>,
}

impl Stores {
    fn get_or_create(&self, connection_id: &ConnectionId) -> InMemoryConnection {
        self.inner
            .lock()
            .entry(connection_id.clone())
            .or_insert_with(|| InMemoryConnection::new(connection_id.clone()))
            .clone()
    }

    fn get(&self, connection_id: &ConnectionId) -> Option<InMemoryConnection> {
        self.inner.lock().get(connection_id).cloned()
    }

    fn publish_all(&self, payload: &str) {
        self.inner.lock().retain(|_, store| !store.is_expired());
        for store in self.inner.lock().values() {
            store.publish(payload);
        }
    }
}

/// Logs lifecycle notifications and echoes received text.
struct EchoObserver {
    stores: Stores,
}

impl TransportObserver for EchoObserver {
    fn on_connected(&self, connection_id: &ConnectionId) {
        info!(%connection_id, "Client connected");
    }

    fn on_received(&self, connection_id: &ConnectionId, data: &str) {
        if let Some(store) = self.stores.get(connection_id) {
            store.publish(format!("echo: {data}"));
        }
    }

    fn on_disconnected(&self, connection_id: &ConnectionId) {
        info!(%connection_id, "Client disconnected");
    }
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let debug = std::env::args().any(|a| a == "--debug");
    init_logging(debug);

    let shutdown = CancellationToken::new();
    let heartbeat = TransportHeartBeat::new(HeartbeatOptions::default())?;
    let sweeper = heartbeat.start(shutdown.clone());

    let stores = Stores::default();
    tokio::spawn(publish_ticks(stores.clone(), shutdown.clone()));

    let listener = TcpListener::bind(ADDRESS).await?;
    info!(address = ADDRESS, "Listening");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let heartbeat = Arc::clone(&heartbeat);
                let stores = stores.clone();
                let shutdown = shutdown.child_token();
                tokio::spawn(async move {
                    if let Err(e) = serve(stream, heartbeat, stores, shutdown).await {
                        warn!(%peer, error = %e, "Exchange failed");
                    }
                });
            }
        }
    }

    info!("Shutting down");
    shutdown.cancel();
    sweeper.await?;
    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn init_logging(debug: bool) {
    let filter = if debug {
        "persistent_transport=debug,stream_server=debug"
    } else {
        "persistent_transport=info,stream_server=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();
}

async fn publish_ticks(stores: Stores, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    let mut tick = 0u64;
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                tick += 1;
                stores.publish_all(&format!("tick {tick}"));
            }
        }
    }
}

/// Picks the framing from the `transport` query parameter.
fn requested_kind(request: &OwnedRequest) -> TransportKind {
    match request.query_string().get(TRANSPORT_FIELD) {
        None => TransportKind::WebSockets,
        Some(name) => TransportKind::from_name(&name).unwrap_or_else(|| {
            warn!(transport = %name, "Unknown transport, using webSockets");
            TransportKind::WebSockets
        }),
    }
}

async fn serve(
    stream: TcpStream,
    heartbeat: Arc<TransportHeartBeat>,
    stores: Stores,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let mut handshake = None;
    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        handshake = Some(request_from_handshake(request));
        Ok(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let request = handshake.ok_or_else(|| anyhow::anyhow!("handshake callback not invoked"))??;

    let kind = requested_kind(&request);

    let (response, inbound) = WebSocketResponse::split(ws);
    let context = HostContext::new(Arc::new(request), response.clone())
        .with_item(SUPPORTS_WEB_SOCKETS, true);

    let transport = ForeverTransport::builder()
        .context(context)
        .heartbeat(heartbeat)
        .observer(Arc::new(EchoObserver {
            stores: stores.clone(),
        }))
        .options(TransportOptions::for_kind(kind))
        .shutdown(shutdown)
        .build()?;

    let store = stores.get_or_create(transport.connection_id());
    tokio::spawn(pump_inbound(inbound, response.clone(), transport.clone()));

    if let Some(receive_loop) = transport.process_request(Arc::new(store))? {
        match receive_loop.await {
            Ok(outcome) => info!(connection_id = %transport.connection_id(), ?outcome, "Loop finished"),
            Err(e) if e.is_cancelled() => info!(connection_id = %transport.connection_id(), "Loop cancelled"),
            Err(e) => error!(connection_id = %transport.connection_id(), error = %e, "Loop faulted"),
        }
    }

    response.close().await.ok();
    Ok(())
}
