//! Native host callbacks.
//!
//! The relay keeps the webview-hosted application in step with the browser
//! tabs by forwarding reloads and browser-originated events to it.

use serde_json::Value;

/// The native side of the application.
pub trait Host: Send + Sync + 'static {
    /// Reload the current page in the native window.
    fn window_reload(&self);

    /// Reload the whole application.
    fn window_reload_app(&self);

    /// Deliver an event emitted by a browser to native listeners.
    fn notify(&self, name: &str, data: &[Value]);
}

/// Host with no native window; every callback is a no-op.
#[derive(Debug, Default, Clone, Copy)]
pub struct Headless;

impl Host for Headless {
    fn window_reload(&self) {}

    fn window_reload_app(&self) {}

    fn notify(&self, _name: &str, _data: &[Value]) {}
}
