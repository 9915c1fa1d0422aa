//! Error types shared by the relay, the listener and the client.

use thiserror::Error;

/// Errors raised by the relay and its transports.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The underlying socket failed while reading or writing.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The peer (or the local writer task) is gone.
    #[error("Connection closed")]
    ConnectionClosed,

    /// A frame arrived that is not valid UTF-8 text.
    #[error("Frame is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// JSON payload could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The listener could not bind its address.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Forwarding to the frontend dev server failed.
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// A relay endpoint could not be derived from the given location.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for RelayError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => RelayError::ConnectionClosed,
            other => RelayError::Transport(other.to_string()),
        }
    }
}

impl From<axum::Error> for RelayError {
    fn from(e: axum::Error) -> Self {
        RelayError::Transport(e.to_string())
    }
}

impl From<url::ParseError> for RelayError {
    fn from(e: url::ParseError) -> Self {
        RelayError::InvalidEndpoint(e.to_string())
    }
}

/// Error returned by an application dispatcher.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("{0}")]
    Failed(String),
}
