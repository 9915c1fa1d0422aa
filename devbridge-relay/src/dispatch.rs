//! Adapter between the relay and the application's method-call dispatcher.

use std::sync::Arc;

use crate::error::{DispatchError, RelayError};
use crate::registry::{ConnectionHandle, ConnectionId};

/// The application's request/response handler.
///
/// Called on a blocking thread, one request at a time per connection.
pub trait Dispatcher: Send + Sync + 'static {
    /// Handle one raw request. `Ok(None)` or an empty string means no reply.
    fn process_message(&self, message: &str, origin: ConnectionId) -> Result<Option<String>, DispatchError>;
}

impl<F> Dispatcher for F
where
    F: Fn(&str, ConnectionId) -> Result<Option<String>, DispatchError> + Send + Sync + 'static,
{
    fn process_message(&self, message: &str, origin: ConnectionId) -> Result<Option<String>, DispatchError> {
        self(message, origin)
    }
}

/// Dispatcher that answers nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullDispatcher;

impl Dispatcher for NullDispatcher {
    fn process_message(&self, message: &str, origin: ConnectionId) -> Result<Option<String>, DispatchError> {
        log::debug!("No dispatcher for request from {origin} ({} bytes)", message.len());
        Ok(None)
    }
}

/// Runs the dispatcher and writes its reply back to the requesting connection.
#[derive(Clone)]
pub struct DispatcherAdapter {
    dispatcher: Arc<dyn Dispatcher>,
}

impl DispatcherAdapter {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Dispatch `message` on behalf of `conn`.
    ///
    /// Returns the reply that was written, if any. Handler errors are logged
    /// and produce no reply; only a failed write is returned as an error.
    pub async fn dispatch(&self, message: String, conn: &ConnectionHandle) -> Result<Option<String>, RelayError> {
        let dispatcher = Arc::clone(&self.dispatcher);
        let origin = conn.id();
        let outcome = tokio::task::spawn_blocking(move || dispatcher.process_message(&message, origin)).await;

        let reply = match outcome {
            Ok(Ok(Some(reply))) if !reply.is_empty() => reply,
            Ok(Ok(_)) => return Ok(None),
            Ok(Err(e)) => {
                log::error!("Dispatch error from {origin}: {e}");
                return Ok(None);
            }
            Err(e) => {
                log::error!("Dispatcher panicked handling request from {origin}: {e}");
                return Ok(None);
            }
        };

        conn.send(reply.clone()).await?;
        Ok(Some(reply))
    }
}
