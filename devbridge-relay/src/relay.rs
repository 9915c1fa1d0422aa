//! The relay: per-connection read loops plus host-originated broadcasts.
//!
//! ```text
//! browser ──► FrameAssembler ──► MessageKind ──┬──► Broadcaster ──► other browsers
//!                                              ├──► Host (reload, notify)
//!                                              └──► DispatcherAdapter ──► same browser
//! host ──► window_reload / notify ──► Broadcaster
//! ```
//!
//! Messages from one connection are handled strictly in arrival order.
//! Nothing is ordered across connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures_util::Stream;
use serde_json::Value;

use crate::broadcast::{Audience, Broadcaster, Fanout};
use crate::dispatch::{Dispatcher, DispatcherAdapter};
use crate::error::RelayError;
use crate::frame::FrameAssembler;
use crate::host::Host;
use crate::protocol::{self, EventNotify, MessageKind};
use crate::registry::{ConnectionHandle, ConnectionRegistry, Outbound};

/// Relay statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub broadcasts: u64,
    pub deliveries: u64,
    pub failed_deliveries: u64,
}

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    total_messages: AtomicU64,
}

/// What the relay did with one complete message.
#[derive(Debug)]
pub enum Handled {
    Reloaded(Fanout),
    AppReloaded(Fanout),
    Ignored,
    Emitted(Fanout),
    Subscribed(String),
    Unsubscribed(String),
    Dispatched(Option<String>),
}

/// Message relay between browser connections and the native host.
pub struct Relay {
    registry: Arc<ConnectionRegistry>,
    broadcaster: Broadcaster,
    dispatcher: DispatcherAdapter,
    host: Arc<dyn Host>,
    counters: Counters,
}

impl Relay {
    pub fn new(host: Arc<dyn Host>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        Self {
            broadcaster: Broadcaster::new(Arc::clone(&registry)),
            registry,
            dispatcher: DispatcherAdapter::new(dispatcher),
            host,
            counters: Counters::default(),
        }
    }

    /// Run one connection until its read side fails or closes.
    ///
    /// Registers the connection, handles every complete message in order,
    /// and unregisters it on the way out.
    pub async fn serve_connection<S>(&self, mut frames: S, outbound: Outbound) -> Result<(), RelayError>
    where
        S: Stream<Item = Result<String, RelayError>> + Unpin,
    {
        let conn = self.registry.register(outbound).await;
        self.counters.total_connections.fetch_add(1, Ordering::Relaxed);
        self.counters.active_connections.fetch_add(1, Ordering::Relaxed);
        log::debug!("Websocket client {} connected", conn.id());

        let mut assembler = FrameAssembler::new();
        let result = loop {
            match assembler.next_message(&mut frames).await {
                Ok(Some(message)) => {
                    if let Err(e) = self.handle_message(&conn, message).await {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.registry.unregister(conn.id()).await;
        self.counters.active_connections.fetch_sub(1, Ordering::Relaxed);
        if let Err(e) = conn.close().await {
            log::debug!("Closing websocket client {} failed: {e}", conn.id());
        }

        match &result {
            Ok(()) => log::debug!("Websocket client {} disconnected", conn.id()),
            Err(e) => log::debug!("Websocket client {} dropped: {e}", conn.id()),
        }
        result
    }

    /// Classify and act on one complete message from `conn`.
    ///
    /// Only a failed reply write is returned as an error.
    pub async fn handle_message(&self, conn: &ConnectionHandle, message: String) -> Result<Handled, RelayError> {
        self.counters.total_messages.fetch_add(1, Ordering::Relaxed);

        let kind = MessageKind::classify(&message);
        let handled = match kind {
            MessageKind::Reload => Handled::Reloaded(self.window_reload().await),
            MessageKind::ReloadApp => Handled::AppReloaded(self.window_reload_app().await),
            MessageKind::Drag => {
                log::debug!("Ignoring drag from {}: not supported in browsers", conn.id());
                Handled::Ignored
            }
            MessageKind::EventEmit(payload) => Handled::Emitted(self.relay_event(payload, conn).await),
            MessageKind::EventBind(name) => {
                conn.subscriptions().subscribe(name);
                Handled::Subscribed(name.to_string())
            }
            MessageKind::EventUnbind(name) => {
                conn.subscriptions().unsubscribe(name);
                Handled::Unsubscribed(name.to_string())
            }
            MessageKind::Dispatch(_) => Handled::Dispatched(self.dispatcher.dispatch(message, conn).await?),
        };
        Ok(handled)
    }

    /// Rebroadcast a browser event to every other connection and the host.
    ///
    /// Malformed JSON only skips the host notification; other browsers still
    /// receive the raw payload.
    async fn relay_event(&self, payload: &str, sender: &ConnectionHandle) -> Fanout {
        let fanout = self
            .broadcaster
            .broadcast_excluding(protocol::rebroadcast_frame(payload), sender.id())
            .await;

        match EventNotify::decode(payload) {
            Ok(event) => self.host.notify(&event.name, &event.data),
            Err(e) => log::error!("Malformed event from {}: {e}", sender.id()),
        }
        fanout
    }

    /// Reload every browser, then the native window.
    pub async fn window_reload(&self) -> Fanout {
        let fanout = self.broadcaster.broadcast(protocol::RELOAD, Audience::everyone()).await;
        self.host.window_reload();
        fanout
    }

    /// Reload the whole app in every browser, then natively.
    pub async fn window_reload_app(&self) -> Fanout {
        let fanout = self
            .broadcaster
            .broadcast(protocol::RELOAD_APP, Audience::everyone())
            .await;
        self.host.window_reload_app();
        fanout
    }

    /// Send a host-originated event to every browser subscribed to `name`.
    pub async fn notify(&self, name: &str, data: Vec<Value>) -> Result<Fanout, RelayError> {
        let frame = protocol::notify_frame(&EventNotify::new(name, data))?;
        Ok(self.broadcaster.broadcast(frame, Audience::subscribers(name)).await)
    }

    /// Close every registered connection. Each read loop unregisters its
    /// connection once the peer acknowledges.
    pub async fn close_all(&self) -> usize {
        let connections = self.registry.snapshot().await;
        for conn in &connections {
            if let Err(e) = conn.close().await {
                log::debug!("Closing websocket client {} failed: {e}", conn.id());
            }
        }
        connections.len()
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn stats(&self) -> RelayStats {
        let broadcast = self.broadcaster.stats();
        RelayStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            total_messages: self.counters.total_messages.load(Ordering::Relaxed),
            broadcasts: broadcast.broadcasts,
            deliveries: broadcast.deliveries,
            failed_deliveries: broadcast.failed_deliveries,
        }
    }
}
