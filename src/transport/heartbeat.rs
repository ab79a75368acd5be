//! Liveness registry for active transports.
//!
//! Every receive loop registers its transport here. Sends refresh the
//! transport's liveness timestamp; a periodic sweep disconnects transports
//! that stayed silent past their threshold or whose client went away.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │          TransportHeartBeat             │
//! │  ┌─────────────────────────────────┐   │
//! │  │ TransportId=1 → (t1, marked@)   │   │
//! │  │ TransportId=2 → (t2, marked@)   │   │
//! │  │ TransportId=3 → (t3, marked@)   │   │
//! │  └─────────────────────────────────┘   │
//! │        ▲ mark (send path)               │
//! │        │ beat (every interval)          │
//! └─────────────────────────────────────────┘
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::Result;
use crate::identifiers::{ConnectionId, TransportId};

use super::options::HeartbeatOptions;

// ============================================================================
// TrackingDisconnect
// ============================================================================

/// What the registry needs from a transport.
pub trait TrackingDisconnect: Send + Sync {
    /// Registry key.
    fn transport_id(&self) -> TransportId;

    /// Logical connection served by the transport.
    fn connection_id(&self) -> &ConnectionId;

    /// Returns `false` once the client's connection has dropped.
    fn is_alive(&self) -> bool;

    /// Silence tolerated before eviction.
    fn disconnect_threshold(&self) -> Duration;

    /// Idempotent teardown.
    fn disconnect(&self);
}

// ============================================================================
// Types
// ============================================================================

/// Registry entry.
struct Tracked {
    transport: Arc<dyn TrackingDisconnect>,
    /// Refreshed on every send; per-entry so marking only needs a read lock.
    last_marked: Mutex<Instant>,
}

// ============================================================================
// TransportHeartBeat
// ============================================================================

/// Shared registry of active transports.
///
/// Thread-safe; registration, marking and sweeping may run concurrently
/// from unrelated receive loops.
///
/// # Example
///
/// ```ignore
/// let heartbeat = TransportHeartBeat::new(HeartbeatOptions::default())?;
/// let sweeper = heartbeat.start(shutdown.clone());
/// // ... build transports with `heartbeat` ...
/// shutdown.cancel();
/// sweeper.await?;
/// ```
pub struct TransportHeartBeat {
    /// Sweep settings.
    options: HeartbeatOptions,

    /// Active transports by ID.
    connections: RwLock<FxHashMap<TransportId, Tracked>>,
}

impl fmt::Debug for TransportHeartBeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHeartBeat")
            .field("options", &self.options)
            .field("connection_count", &self.connection_count())
            .finish()
    }
}

// ============================================================================
// TransportHeartBeat - Constructor
// ============================================================================

impl TransportHeartBeat {
    /// Creates an empty registry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the options are invalid.
    pub fn new(options: HeartbeatOptions) -> Result<Arc<Self>> {
        options.validate()?;
        Ok(Arc::new(Self {
            options,
            connections: RwLock::new(FxHashMap::default()),
        }))
    }

    /// Creates an empty registry with default options.
    #[must_use]
    pub fn with_defaults() -> Arc<Self> {
        Arc::new(Self {
            options: HeartbeatOptions::default(),
            connections: RwLock::new(FxHashMap::default()),
        })
    }
}

// ============================================================================
// TransportHeartBeat - Registration
// ============================================================================

impl TransportHeartBeat {
    /// Registers a transport and marks it alive.
    ///
    /// Re-registering the same ID replaces the entry.
    pub fn add_connection(&self, transport: Arc<dyn TrackingDisconnect>) {
        let id = transport.transport_id();
        debug!(
            transport_id = %id,
            connection_id = %transport.connection_id(),
            "Transport registered"
        );
        self.connections.write().insert(
            id,
            Tracked {
                transport,
                last_marked: Mutex::new(Instant::now()),
            },
        );
    }

    /// Refreshes a transport's liveness timestamp.
    ///
    /// Returns `false` if the transport is not registered.
    pub fn mark_connection(&self, id: TransportId) -> bool {
        let connections = self.connections.read();
        match connections.get(&id) {
            Some(tracked) => {
                *tracked.last_marked.lock() = Instant::now();
                trace!(transport_id = %id, "Transport marked");
                true
            }
            None => false,
        }
    }

    /// Unregisters a transport without disconnecting it.
    ///
    /// Returns `true` if it was registered.
    pub fn remove_connection(&self, id: TransportId) -> bool {
        let removed = self.connections.write().remove(&id).is_some();
        if removed {
            debug!(transport_id = %id, "Transport unregistered");
        }
        removed
    }

    /// Returns `true` if the transport is registered.
    #[inline]
    #[must_use]
    pub fn is_tracked(&self, id: TransportId) -> bool {
        self.connections.read().contains_key(&id)
    }

    /// Returns when the transport was last marked.
    #[must_use]
    pub fn last_marked(&self, id: TransportId) -> Option<Instant> {
        self.connections
            .read()
            .get(&id)
            .map(|tracked| *tracked.last_marked.lock())
    }

    /// Returns the number of registered transports.
    #[inline]
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }
}

// ============================================================================
// TransportHeartBeat - Sweep
// ============================================================================

impl TransportHeartBeat {
    /// Runs one sweep and returns how many transports were evicted.
    ///
    /// A transport is evicted when its client is gone or when the time
    /// since its last mark exceeds its threshold. Evicted transports are
    /// unregistered first, then disconnected outside the lock.
    pub fn beat(&self) -> usize {
        let now = Instant::now();

        let evicted: Vec<Arc<dyn TrackingDisconnect>> = {
            let mut connections = self.connections.write();
            let stale: Vec<TransportId> = connections
                .iter()
                .filter(|(_, tracked)| {
                    let silent_for = now.saturating_duration_since(*tracked.last_marked.lock());
                    !tracked.transport.is_alive()
                        || silent_for > tracked.transport.disconnect_threshold()
                })
                .map(|(id, _)| *id)
                .collect();

            stale
                .iter()
                .filter_map(|id| connections.remove(id))
                .map(|tracked| tracked.transport)
                .collect()
        };

        for transport in &evicted {
            info!(
                transport_id = %transport.transport_id(),
                connection_id = %transport.connection_id(),
                alive = transport.is_alive(),
                "Evicting stale transport"
            );
            transport.disconnect();
        }

        evicted.len()
    }

    /// Spawns the periodic sweep task.
    ///
    /// The task stops when `shutdown` is cancelled.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let heartbeat = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = interval(heartbeat.options.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(interval_ms = heartbeat.options.interval.as_millis() as u64, "Heartbeat started");

            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        let evicted = heartbeat.beat();
                        if evicted > 0 {
                            debug!(evicted, remaining = heartbeat.connection_count(), "Heartbeat sweep");
                        }
                    }
                }
            }

            debug!("Heartbeat stopped");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
