//! Fan-out of one message to many connections.
//!
//! A broadcast takes a registry snapshot, filters it, and spawns one delivery
//! task per target. A stalled peer therefore only blocks its own delivery.
//! Failed writes are logged and counted; the connection stays registered
//! until its read loop notices the failure.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::registry::{ConnectionHandle, ConnectionId, ConnectionRegistry};

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastStats {
    pub broadcasts: u64,
    pub deliveries: u64,
    pub failed_deliveries: u64,
}

/// Stats tracked via atomics so delivery tasks never take a lock for them.
#[derive(Default)]
struct AtomicBroadcastStats {
    broadcasts: AtomicU64,
    deliveries: AtomicU64,
    failed_deliveries: AtomicU64,
}

/// Which registered connections a broadcast reaches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Audience<'a> {
    /// Skip this connection (the originator of the message).
    pub exclude: Option<ConnectionId>,
    /// Only connections subscribed to this event name.
    pub event: Option<&'a str>,
}

impl<'a> Audience<'a> {
    /// Every registered connection.
    pub fn everyone() -> Self {
        Self::default()
    }

    /// Connections subscribed to `event`.
    pub fn subscribers(event: &'a str) -> Self {
        Self {
            exclude: None,
            event: Some(event),
        }
    }

    /// Everyone except `sender`.
    pub fn excluding(sender: ConnectionId) -> Self {
        Self {
            exclude: Some(sender),
            event: None,
        }
    }

    pub fn admits(&self, conn: &ConnectionHandle) -> bool {
        if self.exclude == Some(conn.id()) {
            return false;
        }
        match self.event {
            Some(name) => conn.subscriptions().contains(name),
            None => true,
        }
    }
}

/// In-flight deliveries of one broadcast.
///
/// Dropping this detaches the tasks; they still run to completion.
#[derive(Debug)]
pub struct Fanout {
    targets: Vec<ConnectionId>,
    tasks: Vec<JoinHandle<bool>>,
}

impl Fanout {
    /// Connections a delivery was started for.
    pub fn targets(&self) -> &[ConnectionId] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Wait for every delivery; returns how many succeeded.
    pub async fn join(self) -> usize {
        let mut delivered = 0;
        for task in self.tasks {
            if matches!(task.await, Ok(true)) {
                delivered += 1;
            }
        }
        delivered
    }
}

/// Broadcast engine over a shared [`ConnectionRegistry`].
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    stats: Arc<AtomicBroadcastStats>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(AtomicBroadcastStats::default()),
        }
    }

    /// Deliver `message` to every connection the audience admits.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn broadcast(&self, message: impl Into<Arc<str>>, audience: Audience<'_>) -> Fanout {
        let message: Arc<str> = message.into();
        self.stats.broadcasts.fetch_add(1, Ordering::Relaxed);

        // Snapshot releases the registry lock before any write starts.
        let targets: Vec<ConnectionHandle> = self
            .registry
            .snapshot()
            .await
            .into_iter()
            .filter(|conn| audience.admits(conn))
            .collect();

        let ids = targets.iter().map(ConnectionHandle::id).collect();
        let tasks = targets
            .into_iter()
            .map(|conn| {
                let message = Arc::clone(&message);
                let stats = Arc::clone(&self.stats);
                tokio::spawn(async move {
                    match conn.send(message.to_string()).await {
                        Ok(()) => {
                            stats.deliveries.fetch_add(1, Ordering::Relaxed);
                            true
                        }
                        Err(e) => {
                            stats.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                            log::error!("Broadcast to {} failed: {e}", conn.id());
                            false
                        }
                    }
                })
            })
            .collect();

        Fanout { targets: ids, tasks }
    }

    /// Deliver to every connection, optionally only subscribers of `event`.
    pub async fn broadcast_to(&self, message: impl Into<Arc<str>>, event: Option<&str>) -> Fanout {
        let audience = Audience {
            exclude: None,
            event,
        };
        self.broadcast(message, audience).await
    }

    /// Deliver to every connection except `sender`.
    pub async fn broadcast_excluding(&self, message: impl Into<Arc<str>>, sender: ConnectionId) -> Fanout {
        self.broadcast(message, Audience::excluding(sender)).await
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Lock-free snapshot of the counters.
    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            broadcasts: self.stats.broadcasts.load(Ordering::Relaxed),
            deliveries: self.stats.deliveries.load(Ordering::Relaxed),
            failed_deliveries: self.stats.failed_deliveries.load(Ordering::Relaxed),
        }
    }
}
