//! # devbridge-relay: Development-mode WebSocket relay
//!
//! Keeps browser tabs pointed at a dev server in step with the native
//! application: reloads, events and method calls all travel over one
//! WebSocket per tab.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     WebSocket      ┌──────────────────────────────┐
//! │ Browser tab │ ◄────────────────► │ DevServer (/wails/ipc)       │
//! │ RelayClient │     text frames    │  FrameAssembler              │
//! └─────────────┘                    │  MessageKind::classify       │
//!                                    └──────┬──────────────┬────────┘
//!                                           │              │
//!                                           ▼              ▼
//!                                    ┌─────────────┐ ┌─────────────┐
//!                                    │ Broadcaster │ │ Dispatcher  │
//!                                    │ (fan-out)   │ │ Adapter     │
//!                                    └──────┬──────┘ └─────────────┘
//!                                           │
//!                                    ┌──────┴──────┐
//!                                    │ Connection  │ ◄── Host: reload, notify
//!                                    │ Registry    │
//!                                    └─────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`frame`]: reassembly of fragmented `C{"…"}` messages
//! - [`protocol`]: message classification and wire frames
//! - [`registry`]: live connections and their event subscriptions
//! - [`broadcast`]: concurrent fan-out with sender exclusion and filtering
//! - [`dispatch`]: bridge to the application's request handler
//! - [`relay`]: per-connection read loop and host entry points
//! - [`server`]: axum listener, reload side channel, frontend routing
//! - [`client`]: reconnecting client with an outgoing queue

pub mod error;
pub mod frame;
pub mod protocol;
pub mod registry;
pub mod broadcast;
pub mod dispatch;
pub mod host;
pub mod relay;
pub mod proxy;
pub mod server;
pub mod client;

// Re-exports for convenience
pub use error::{DispatchError, RelayError};
pub use frame::FrameAssembler;
pub use protocol::{EventNotify, Inbound, MessageKind};
pub use registry::{channel_outbound, ConnectionHandle, ConnectionId, ConnectionRegistry, Outbound, Subscriptions};
pub use broadcast::{Audience, BroadcastStats, Broadcaster, Fanout};
pub use dispatch::{Dispatcher, DispatcherAdapter, NullDispatcher};
pub use host::{Headless, Host};
pub use relay::{Handled, Relay, RelayStats};
pub use server::{DevServer, ServerConfig, ServerHandle};
pub use client::{discover_endpoint, ClientConfig, ClientEvent, ConnectionState, OutgoingQueue, RelayClient};
