//! Host callbacks for running without a native window.

use devbridge_relay::Host;
use log::info;
use serde_json::Value;

/// Logs every native-side callback.
pub struct LoggingHost;

impl Host for LoggingHost {
    fn window_reload(&self) {
        info!("Window reload");
    }

    fn window_reload_app(&self) {
        info!("App reload");
    }

    fn notify(&self, name: &str, data: &[Value]) {
        info!("Event '{name}' from browser: {}", Value::Array(data.to_vec()));
    }
}
