//! devbridge: development relay host.
//!
//! Starts the dev server, logs native-side callbacks, and reads console
//! commands that drive host-originated reloads and notifications.

mod console;
mod host;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use devbridge_relay::protocol::DEFAULT_IPC_PATH;
use devbridge_relay::{DevServer, NullDispatcher, RelayError, ServerConfig};
use log::info;
use url::Url;

use host::LoggingHost;

#[derive(Parser, Debug)]
#[command(name = "devbridge")]
#[command(about = "Relay reloads, events and calls between browser tabs and a native app")]
struct Args {
    /// Address to listen on
    #[arg(long, env = "DEVBRIDGE_BIND", default_value = "127.0.0.1:34115")]
    bind: String,

    /// Path of the browser IPC socket
    #[arg(long, env = "DEVBRIDGE_IPC_PATH", default_value = DEFAULT_IPC_PATH)]
    ipc_path: String,

    /// Directory of built frontend assets
    #[arg(long, env = "DEVBRIDGE_ASSET_DIR")]
    asset_dir: Option<PathBuf>,

    /// Frontend dev server to proxy non-IPC requests to
    #[arg(long, env = "DEVBRIDGE_FRONTEND_URL")]
    frontend_url: Option<Url>,
}

impl Args {
    fn into_config(self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            ipc_path: self.ipc_path,
            asset_dir: self.asset_dir,
            frontend_dev_server_url: self.frontend_url,
        }
    }
}

async fn run(args: Args) -> Result<(), RelayError> {
    let config = args.into_config();
    let ipc_path = config.ipc_path.clone();
    let server = DevServer::new(config, Arc::new(LoggingHost), Arc::new(NullDispatcher));
    let relay = Arc::clone(server.relay());
    let handle = server.start().await?;
    info!("Browser IPC at ws://{}{ipc_path}", handle.local_addr());
    info!("Type 'help' for console commands");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
        _ = console::run(relay) => info!("Console quit"),
    }

    info!("Shutting down...");
    handle.shutdown().await
}

#[tokio::main]
async fn main() {
    env_logger::init();

    info!("Starting devbridge...");

    if let Err(e) = run(Args::parse()).await {
        log::error!("{e}");
        std::process::exit(1);
    }
}
