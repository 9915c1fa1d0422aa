//! Console commands for host-originated reloads and notifications.
//!
//! ```text
//! reload                  reload every browser and the window
//! reloadapp               reload the whole app
//! notify <name> [json]    send an event to subscribed browsers
//! stats                   print relay counters
//! quit                    shut down
//! ```

use std::sync::Arc;

use devbridge_relay::Relay;
use log::{debug, error, info};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Reload,
    ReloadApp,
    Notify { name: String, data: Vec<Value> },
    Stats,
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Usage: notify <name> [json]")]
    MissingEventName,

    #[error("Invalid event data: {0}")]
    InvalidData(String),
}

impl Command {
    /// Parse one console line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, CommandError> {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        let command = match word {
            "" => return Ok(None),
            "reload" => Command::Reload,
            "reloadapp" => Command::ReloadApp,
            "stats" => Command::Stats,
            "help" | "?" => Command::Help,
            "quit" | "exit" => Command::Quit,
            "notify" => {
                let (name, json) = match rest.split_once(char::is_whitespace) {
                    Some((name, json)) => (name, json.trim()),
                    None => (rest, ""),
                };
                if name.is_empty() {
                    return Err(CommandError::MissingEventName);
                }
                Command::Notify {
                    name: name.to_string(),
                    data: parse_data(json)?,
                }
            }
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }
}

/// A JSON array is the argument list; any other value is a single argument.
fn parse_data(json: &str) -> Result<Vec<Value>, CommandError> {
    if json.is_empty() {
        return Ok(Vec::new());
    }
    match serde_json::from_str(json) {
        Ok(Value::Array(items)) => Ok(items),
        Ok(value) => Ok(vec![value]),
        Err(e) => Err(CommandError::InvalidData(e.to_string())),
    }
}

/// Read commands from stdin until `quit`.
///
/// At end of input the console goes quiet and the server keeps running.
pub async fn run(relay: Arc<Relay>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("Console input closed");
                std::future::pending::<()>().await;
                return;
            }
            Err(e) => {
                error!("Console read error: {e}");
                std::future::pending::<()>().await;
                return;
            }
        };

        match Command::parse(&line) {
            Ok(Some(Command::Quit)) => return,
            Ok(Some(command)) => execute(&relay, command).await,
            Ok(None) => {}
            Err(e) => error!("{e}"),
        }
    }
}

async fn execute(relay: &Relay, command: Command) {
    match command {
        Command::Reload => {
            let fanout = relay.window_reload().await;
            info!("Reload sent to {} browser(s)", fanout.len());
        }
        Command::ReloadApp => {
            let fanout = relay.window_reload_app().await;
            info!("App reload sent to {} browser(s)", fanout.len());
        }
        Command::Notify { name, data } => match relay.notify(&name, data).await {
            Ok(fanout) => info!("Event '{name}' sent to {} subscriber(s)", fanout.len()),
            Err(e) => error!("Cannot send event '{name}': {e}"),
        },
        Command::Stats => info!("{:?}", relay.stats()),
        Command::Help => info!("Commands: reload | reloadapp | notify <name> [json] | stats | quit"),
        Command::Quit => {}
    }
}
