//! Registry of live browser connections.
//!
//! A connection is present exactly while the relay can read from and write to
//! it. `register`, `unregister` and `snapshot` share one mutex, so a broadcast
//! never sees a connection halfway through teardown. The lock covers map
//! access only and is released before any network write.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::{Sink, SinkExt};
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::error::RelayError;

/// Writable half of a connection, carrying complete text messages.
pub type Outbound = Pin<Box<dyn Sink<String, Error = RelayError> + Send>>;

/// Build an [`Outbound`] backed by an unbounded channel.
///
/// Useful for hosts that drive connections themselves, and for tests.
pub fn channel_outbound() -> (Outbound, mpsc::UnboundedReceiver<String>) {
    let (tx, rx) = mpsc::unbounded_channel::<String>();
    let sink = futures_util::sink::unfold(tx, |tx, text: String| async move {
        tx.send(text).map_err(|_| RelayError::ConnectionClosed)?;
        Ok::<_, RelayError>(tx)
    });
    (Box::pin(sink), rx)
}

/// Opaque identity of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.simple())
    }
}

/// Event names one connection wants delivered to it.
///
/// Only the owning read loop mutates the set; broadcasts read it.
#[derive(Debug, Clone, Default)]
pub struct Subscriptions {
    names: Arc<RwLock<HashSet<String>>>,
}

impl Subscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the name was not already present.
    pub fn subscribe(&self, name: &str) -> bool {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }

    /// Removing an absent name is a no-op. Returns `true` if it was present.
    pub fn unsubscribe(&self, name: &str) -> bool {
        self.names
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }

    pub fn len(&self) -> usize {
        self.names.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&self) {
        self.names.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

/// A registered connection: identity, writer and subscription state.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: Arc<Mutex<Outbound>>,
    subscriptions: Subscriptions,
}

impl ConnectionHandle {
    fn new(outbound: Outbound) -> Self {
        Self {
            id: ConnectionId::new(),
            outbound: Arc::new(Mutex::new(outbound)),
            subscriptions: Subscriptions::new(),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn subscriptions(&self) -> &Subscriptions {
        &self.subscriptions
    }

    /// Write one message to this connection.
    ///
    /// Concurrent senders queue on the connection's writer lock, so a slow
    /// peer only delays writes to itself.
    pub async fn send(&self, message: String) -> Result<(), RelayError> {
        let mut outbound = self.outbound.lock().await;
        outbound.send(message).await
    }

    /// Flush and close the writer.
    pub async fn close(&self) -> Result<(), RelayError> {
        let mut outbound = self.outbound.lock().await;
        outbound.close().await
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

/// The set of live connections.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, ConnectionHandle>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and return its handle.
    pub async fn register(&self, outbound: Outbound) -> ConnectionHandle {
        let handle = ConnectionHandle::new(outbound);
        let mut connections = self.connections.lock().await;
        connections.insert(handle.id, handle.clone());
        handle
    }

    /// Remove a connection. Removing an absent id is a no-op.
    ///
    /// Returns `true` if the connection was registered.
    pub async fn unregister(&self, id: ConnectionId) -> bool {
        let removed = self.connections.lock().await.remove(&id);
        match removed {
            Some(handle) => {
                handle.subscriptions.clear();
                true
            }
            None => false,
        }
    }

    /// Consistent copy of every registered connection at this instant.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        self.connections.lock().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.lock().await.contains_key(&id)
    }
}
