//! WebSocket client for the relay, mirroring the browser runtime.
//!
//! Provides:
//! - One connection attempt at a time on a fixed interval (no backoff)
//! - Outgoing queue while disconnected, flushed oldest first on connect
//! - Event rebinding after every reconnect
//! - Inbound reload / notify / callback messages as [`ClientEvent`]s

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::error::RelayError;
use crate::protocol::{self, EventNotify, Inbound};

pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_millis(500);

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the relay client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Connection established; queued messages have been flushed.
    Connected,
    /// Connection lost; retrying on the reconnect interval.
    Reconnecting,
    Reload,
    ReloadApp,
    Notify(EventNotify),
    /// Reply to a dispatch request, without its `c` prefix.
    Callback(String),
}

/// Messages written while disconnected.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    queue: VecDeque<String>,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: String) {
        self.queue.push_back(message);
    }

    /// Take every queued message, oldest first.
    pub fn drain(&mut self) -> Vec<String> {
        self.queue.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay socket, usually from [`discover_endpoint`]
    pub endpoint: Url,
    /// Delay between connection attempts
    pub reconnect_interval: Duration,
}

impl ClientConfig {
    pub fn new(endpoint: Url) -> Self {
        Self {
            endpoint,
            reconnect_interval: DEFAULT_RECONNECT_INTERVAL,
        }
    }
}

/// Derive the relay endpoint the way a page does.
///
/// Uses the script's own origin when it has a host, else the page location.
/// `https` selects `wss`; anything else `ws`.
pub fn discover_endpoint(script_origin: Option<&str>, page_location: &str, ipc_path: &str) -> Result<Url, RelayError> {
    let origin = script_origin
        .and_then(|origin| Url::parse(origin).ok())
        .filter(|url| url.host_str().is_some_and(|host| !host.is_empty()));
    let base = match origin {
        Some(url) => url,
        None => Url::parse(page_location)?,
    };

    let host = base
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| RelayError::InvalidEndpoint(format!("no host in {base}")))?;
    let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
    let authority = match base.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    Ok(Url::parse(&format!("{scheme}://{authority}{ipc_path}"))?)
}

/// Writer, queue and tracked events; one lock so a flush cannot interleave
/// with a send.
#[derive(Default)]
struct Link {
    writer: Option<mpsc::UnboundedSender<String>>,
    queue: OutgoingQueue,
    subscriptions: BTreeSet<String>,
}

struct Shared {
    state: RwLock<ConnectionState>,
    link: Mutex<Link>,
}

impl Shared {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Send now if connected, else queue.
    async fn send(&self, message: String) {
        let mut link = self.link.lock().await;
        let message = match &link.writer {
            Some(writer) => match writer.send(message) {
                Ok(()) => return,
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };
        link.writer = None;
        link.queue.push(message);
    }

    /// Install a fresh writer: flush the queue, then rebind events.
    async fn attach(&self, writer: mpsc::UnboundedSender<String>) -> usize {
        let mut link = self.link.lock().await;
        let queued = link.queue.drain();
        let flushed = queued.len();
        for message in queued {
            let _ = writer.send(message);
        }
        for name in &link.subscriptions {
            let _ = writer.send(protocol::bind_frame(name));
        }
        link.writer = Some(writer);
        self.set_state(ConnectionState::Connected).await;
        flushed
    }

    async fn detach(&self) {
        self.link.lock().await.writer = None;
        self.set_state(ConnectionState::Disconnected).await;
    }
}

/// The relay client.
pub struct RelayClient {
    config: ClientConfig,
    shared: Arc<Shared>,
    event_tx: mpsc::Sender<ClientEvent>,
    event_rx: Option<mpsc::Receiver<ClientEvent>>,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RelayClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            shared: Arc::new(Shared {
                state: RwLock::new(ConnectionState::Disconnected),
                link: Mutex::new(Link::default()),
            }),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
            task: None,
        }
    }

    /// Take the event receiver (can only be called once).
    ///
    /// The channel holds 256 events; further events are dropped with a
    /// warning until the receiver catches up.
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<ClientEvent>> {
        self.event_rx.take()
    }

    /// Start the reconnect loop. Calling it again has no effect.
    pub fn start(&mut self) {
        if self.task.is_some() {
            return;
        }
        let supervisor = Supervisor {
            config: self.config.clone(),
            shared: Arc::clone(&self.shared),
            events: self.event_tx.clone(),
        };
        self.task = Some(tokio::spawn(supervisor.run(self.shutdown_tx.subscribe())));
    }

    /// Send a raw dispatch request; queued while disconnected.
    pub async fn call(&self, request: impl Into<String>) {
        self.shared.send(request.into()).await;
    }

    /// Emit an event to every other browser and the host.
    pub async fn emit(&self, name: &str, data: Vec<Value>) -> Result<(), RelayError> {
        let frame = protocol::emit_frame(&EventNotify::new(name, data))?;
        self.shared.send(frame).await;
        Ok(())
    }

    /// Ask for `name` notifications. Remembered across reconnects.
    pub async fn subscribe(&self, name: &str) {
        let mut link = self.shared.link.lock().await;
        if link.subscriptions.insert(name.to_string()) {
            if let Some(writer) = &link.writer {
                let _ = writer.send(protocol::bind_frame(name));
            }
        }
    }

    pub async fn unsubscribe(&self, name: &str) {
        let mut link = self.shared.link.lock().await;
        if link.subscriptions.remove(name) {
            if let Some(writer) = &link.writer {
                let _ = writer.send(protocol::unbind_frame(name));
            }
        }
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.shared.state.read().await
    }

    /// Number of messages waiting for a connection.
    pub async fn queue_len(&self) -> usize {
        self.shared.link.lock().await.queue.len()
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.shared.link.lock().await.subscriptions.iter().cloned().collect()
    }

    pub fn endpoint(&self) -> &Url {
        &self.config.endpoint
    }

    /// Stop reconnecting and close the current connection.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for RelayClient {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}

/// Background task owning the connect / serve / retry cycle.
struct Supervisor {
    config: ClientConfig,
    shared: Arc<Shared>,
    events: mpsc::Sender<ClientEvent>,
}

impl Supervisor {
    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let endpoint = self.config.endpoint.clone();
        let mut ticker = tokio::time::interval(self.config.reconnect_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            self.shared.set_state(ConnectionState::Connecting).await;
            log::debug!("Connecting to {endpoint}");
            let stream = match tokio_tungstenite::connect_async(endpoint.as_str()).await {
                Ok((stream, _)) => stream,
                Err(e) => {
                    log::debug!("Connect to {endpoint} failed: {e}");
                    self.shared.set_state(ConnectionState::Disconnected).await;
                    continue;
                }
            };

            let stopped = tokio::select! {
                _ = self.serve(stream) => false,
                _ = shutdown.changed() => true,
            };
            self.shared.detach().await;
            if stopped {
                break;
            }

            log::info!("Disconnected from {endpoint}, reconnecting");
            self.emit(ClientEvent::Reconnecting);
            ticker.reset();
        }

        self.shared.set_state(ConnectionState::Disconnected).await;
    }

    async fn serve(&self, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (mut ws_tx, mut ws_rx) = stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();

        let flushed = self.shared.attach(out_tx).await;
        log::info!("Connected to {} ({flushed} queued messages flushed)", self.config.endpoint);

        let writer = async {
            while let Some(text) = out_rx.recv().await {
                if ws_tx.send(Message::text(text)).await.is_err() {
                    break;
                }
            }
        };

        let reader = async {
            self.emit(ClientEvent::Connected);
            while let Some(message) = ws_rx.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text.as_str().to_owned(),
                    Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => continue,
                    },
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                if let Some(event) = inbound_event(&text) {
                    self.emit(event);
                }
            }
        };

        tokio::select! {
            _ = writer => {}
            _ = reader => {}
        }
    }

    /// Hand an event to the application without stalling the connection.
    /// Events are dropped while the receiver is full or was never taken.
    fn emit(&self, event: ClientEvent) {
        match self.events.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                log::warn!("Client event channel full, dropping {event:?}");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

fn inbound_event(text: &str) -> Option<ClientEvent> {
    match Inbound::parse(text) {
        Ok(Inbound::Reload) => Some(ClientEvent::Reload),
        Ok(Inbound::ReloadApp) => Some(ClientEvent::ReloadApp),
        Ok(Inbound::Notify(event)) => Some(ClientEvent::Notify(event)),
        Ok(Inbound::Callback(payload)) => Some(ClientEvent::Callback(payload)),
        Ok(Inbound::Unknown(raw)) => {
            log::warn!("Unknown message from relay: {raw}");
            None
        }
        Err(e) => {
            log::error!("Malformed notification from relay: {e}");
            None
        }
    }
}
