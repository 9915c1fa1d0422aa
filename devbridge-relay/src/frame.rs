//! Reassembly of application messages from transport frames.
//!
//! Browsers may split a large dispatcher call across several frames. Only
//! messages that open with `C{"` are treated as possibly fragmented: frames
//! are concatenated until the accumulated text ends with `"}`. Every other
//! frame is a complete message on its own.
//!
//! There is no size limit and no timeout. A peer that never closes the
//! object stalls its own read loop and nothing else.

use futures_util::{Stream, StreamExt};

use crate::error::RelayError;

/// Marker opening a JSON-object call that may span frames.
pub const FRAGMENT_MARKER: &str = "C{\"";

/// Suffix closing a fragmented call.
pub const FRAGMENT_TERMINATOR: &str = "\"}";

/// Per-connection reassembly state.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    pending: Option<String>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one frame. Returns a message once it is complete.
    pub fn push(&mut self, frame: &str) -> Option<String> {
        match self.pending.take() {
            Some(mut buffer) => {
                buffer.push_str(frame);
                self.finish_or_hold(buffer)
            }
            None if frame.starts_with(FRAGMENT_MARKER) => self.finish_or_hold(frame.to_string()),
            None => Some(frame.to_string()),
        }
    }

    fn finish_or_hold(&mut self, buffer: String) -> Option<String> {
        if buffer.ends_with(FRAGMENT_TERMINATOR) {
            Some(buffer)
        } else {
            self.pending = Some(buffer);
            None
        }
    }

    /// Whether a fragmented message is partially buffered.
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Bytes currently held for an incomplete message.
    pub fn pending_len(&self) -> usize {
        self.pending.as_ref().map_or(0, String::len)
    }

    /// Drop any partial message.
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Pull frames from `frames` until one complete message is available.
    ///
    /// Returns `Ok(None)` when the stream ends. A read error or end of stream
    /// in the middle of a fragmented message discards the partial buffer.
    pub async fn next_message<S>(&mut self, frames: &mut S) -> Result<Option<String>, RelayError>
    where
        S: Stream<Item = Result<String, RelayError>> + Unpin,
    {
        loop {
            match frames.next().await {
                Some(Ok(frame)) => {
                    if let Some(message) = self.push(&frame) {
                        return Ok(Some(message));
                    }
                }
                Some(Err(e)) => {
                    if self.is_pending() {
                        log::debug!("Discarding {} buffered bytes after read error", self.pending_len());
                    }
                    self.reset();
                    return Err(e);
                }
                None => {
                    self.reset();
                    return Ok(None);
                }
            }
        }
    }
}
