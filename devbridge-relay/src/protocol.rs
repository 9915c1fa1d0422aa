//! Text protocol spoken between browser tabs and the relay.
//!
//! Wire format (every message is a single text payload):
//! ```text
//! ┌──────────────┬───────────────────────────────┬───────────────┐
//! │ prefix       │ meaning                       │ direction     │
//! ├──────────────┼───────────────────────────────┼───────────────┤
//! │ reload       │ reload current page (exact)   │ both          │
//! │ reloadapp    │ reload whole app (exact)      │ both          │
//! │ drag         │ native drag, ignored (exact)  │ browser → host│
//! │ EE           │ event broadcast {name, data}  │ browser → host│
//! │ EB           │ subscribe to event name       │ browser → host│
//! │ EX           │ unsubscribe from event name   │ browser → host│
//! │ n            │ notify {name, data}           │ host → browser│
//! │ c            │ callback result               │ host → browser│
//! │ (other)      │ dispatcher request            │ browser → host│
//! └──────────────┴───────────────────────────────┴───────────────┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::RelayError;

pub const RELOAD: &str = "reload";
pub const RELOAD_APP: &str = "reloadapp";
pub const DRAG: &str = "drag";

pub const EVENT_EMIT_PREFIX: &str = "EE";
pub const EVENT_BIND_PREFIX: &str = "EB";
pub const EVENT_UNBIND_PREFIX: &str = "EX";

pub const NOTIFY_PREFIX: char = 'n';
pub const CALLBACK_PREFIX: char = 'c';

/// Path the IPC socket is served on.
pub const DEFAULT_IPC_PATH: &str = "/wails/ipc";

/// Classification of a complete message received from a browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind<'a> {
    Reload,
    ReloadApp,
    /// Native drag is not possible from a browser; dropped silently.
    Drag,
    /// Event emitted by a browser; payload is the JSON `{name, data}` object.
    EventEmit(&'a str),
    /// Subscribe the sending connection to an event name.
    EventBind(&'a str),
    /// Unsubscribe the sending connection from an event name.
    EventUnbind(&'a str),
    /// Anything else, handed to the dispatcher verbatim.
    Dispatch(&'a str),
}

impl<'a> MessageKind<'a> {
    /// Classify a complete message. Pure: no state is touched.
    pub fn classify(message: &'a str) -> Self {
        match message {
            RELOAD => return Self::Reload,
            RELOAD_APP => return Self::ReloadApp,
            DRAG => return Self::Drag,
            _ => {}
        }

        if message.len() > 2 {
            if let Some(payload) = message.strip_prefix(EVENT_EMIT_PREFIX) {
                return Self::EventEmit(payload);
            }
            if let Some(name) = message.strip_prefix(EVENT_BIND_PREFIX) {
                return Self::EventBind(name);
            }
            if let Some(name) = message.strip_prefix(EVENT_UNBIND_PREFIX) {
                return Self::EventUnbind(name);
            }
        }

        Self::Dispatch(message)
    }
}

/// Event notification body, shared by `EE` and `n` messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventNotify {
    pub name: String,
    #[serde(default)]
    pub data: Vec<Value>,
}

impl EventNotify {
    pub fn new(name: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    pub fn encode(&self) -> Result<String, RelayError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, RelayError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// `n{...}` frame for a host-originated notification.
pub fn notify_frame(notify: &EventNotify) -> Result<String, RelayError> {
    Ok(format!("{NOTIFY_PREFIX}{}", notify.encode()?))
}

/// Rewrite a browser `EE` payload into the `n` frame other browsers receive.
pub fn rebroadcast_frame(event_payload: &str) -> String {
    format!("{NOTIFY_PREFIX}{event_payload}")
}

/// `EE{...}` frame emitted by a client.
pub fn emit_frame(notify: &EventNotify) -> Result<String, RelayError> {
    Ok(format!("{EVENT_EMIT_PREFIX}{}", notify.encode()?))
}

pub fn bind_frame(name: &str) -> String {
    format!("{EVENT_BIND_PREFIX}{name}")
}

pub fn unbind_frame(name: &str) -> String {
    format!("{EVENT_UNBIND_PREFIX}{name}")
}

/// Message received by a client from the relay.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Reload,
    ReloadApp,
    Notify(EventNotify),
    Callback(String),
    Unknown(String),
}

impl Inbound {
    pub fn parse(message: &str) -> Result<Self, RelayError> {
        match message {
            RELOAD => return Ok(Self::Reload),
            RELOAD_APP => return Ok(Self::ReloadApp),
            _ => {}
        }

        if let Some(payload) = message.strip_prefix(NOTIFY_PREFIX) {
            return Ok(Self::Notify(EventNotify::decode(payload)?));
        }
        if let Some(payload) = message.strip_prefix(CALLBACK_PREFIX) {
            return Ok(Self::Callback(payload.to_string()));
        }
        Ok(Self::Unknown(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_exact_control_messages() {
        assert_eq!(MessageKind::classify("reload"), MessageKind::Reload);
        assert_eq!(MessageKind::classify("reloadapp"), MessageKind::ReloadApp);
        assert_eq!(MessageKind::classify("drag"), MessageKind::Drag);
    }

    #[test]
    fn test_control_messages_need_exact_match() {
        assert_eq!(MessageKind::classify("reload "), MessageKind::Dispatch("reload "));
        assert_eq!(MessageKind::classify("dragging"), MessageKind::Dispatch("dragging"));
        assert_eq!(MessageKind::classify("Reload"), MessageKind::Dispatch("Reload"));
    }

    #[test]
    fn test_event_prefixes() {
        assert_eq!(
            MessageKind::classify(r#"EE{"name":"ping","data":[]}"#),
            MessageKind::EventEmit(r#"{"name":"ping","data":[]}"#)
        );
        assert_eq!(MessageKind::classify("EBfoo"), MessageKind::EventBind("foo"));
        assert_eq!(MessageKind::classify("EXfoo"), MessageKind::EventUnbind("foo"));
    }

    #[test]
    fn test_bare_prefix_is_dispatched() {
        // Length must exceed two before the prefix is looked at.
        assert_eq!(MessageKind::classify("EB"), MessageKind::Dispatch("EB"));
        assert_eq!(MessageKind::classify("EE"), MessageKind::Dispatch("EE"));
        assert_eq!(MessageKind::classify(""), MessageKind::Dispatch(""));
    }

    #[test]
    fn test_generic_dispatch_is_verbatim() {
        let call = r#"C{"name":"main.App.Greet","args":["x"],"callbackID":"cb1"}"#;
        assert_eq!(MessageKind::classify(call), MessageKind::Dispatch(call));
    }

    #[test]
    fn test_notify_frame() {
        let notify = EventNotify::new("tick", vec![json!(1), json!("two")]);
        let frame = notify_frame(&notify).unwrap();
        assert_eq!(frame, r#"n{"name":"tick","data":[1,"two"]}"#);
    }

    #[test]
    fn test_rebroadcast_frame_keeps_payload_bytes() {
        assert_eq!(rebroadcast_frame(r#"{"name":"x"}"#), r#"n{"name":"x"}"#);
    }

    #[test]
    fn test_event_notify_missing_data_defaults_empty() {
        let notify = EventNotify::decode(r#"{"name":"ping"}"#).unwrap();
        assert_eq!(notify.name, "ping");
        assert!(notify.data.is_empty());
    }

    #[test]
    fn test_event_notify_malformed() {
        assert!(EventNotify::decode("{not json").is_err());
        assert!(EventNotify::decode(r#"{"data":[]}"#).is_err());
    }

    #[test]
    fn test_inbound_parse() {
        assert_eq!(Inbound::parse("reload").unwrap(), Inbound::Reload);
        assert_eq!(Inbound::parse("reloadapp").unwrap(), Inbound::ReloadApp);
        assert_eq!(
            Inbound::parse(r#"n{"name":"ping","data":[true]}"#).unwrap(),
            Inbound::Notify(EventNotify::new("ping", vec![json!(true)]))
        );
        assert_eq!(
            Inbound::parse(r#"c{"callbackid":"1","result":2}"#).unwrap(),
            Inbound::Callback(r#"{"callbackid":"1","result":2}"#.to_string())
        );
        assert_eq!(
            Inbound::parse("zzz").unwrap(),
            Inbound::Unknown("zzz".to_string())
        );
    }

    #[test]
    fn test_inbound_bad_notify() {
        assert!(Inbound::parse("n{broken").is_err());
    }

    #[test]
    fn test_subscription_frames() {
        assert_eq!(bind_frame("foo"), "EBfoo");
        assert_eq!(unbind_frame("foo"), "EXfoo");
        let emit = emit_frame(&EventNotify::new("a", vec![])).unwrap();
        assert_eq!(emit, r#"EE{"name":"a","data":[]}"#);
    }
}
