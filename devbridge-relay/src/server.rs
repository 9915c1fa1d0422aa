//! Development HTTP listener: the IPC socket, the reload side channel, and
//! fallback routing to the frontend.
//!
//! ```text
//! GET  /wails/ipc        ──► Relay (one read loop per browser tab)
//! GET  /wails/reload     ──► Relay::window_reload        (204)
//! GET  /wails/reloadapp  ──► Relay::window_reload_app    (204)
//! GET  /wails/assetdir   ──► asset directory as text     (no dev server only)
//! *                      ──► frontend dev server proxy, or the asset service
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::future::ready;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceExt;
use tower_http::services::ServeDir;
use url::Url;

use crate::dispatch::Dispatcher;
use crate::error::RelayError;
use crate::host::Host;
use crate::protocol::DEFAULT_IPC_PATH;
use crate::proxy::{self, FrontendProxy};
use crate::registry::Outbound;
use crate::relay::Relay;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Path of the browser IPC socket
    pub ipc_path: String,
    /// Directory served when no frontend dev server is configured
    pub asset_dir: Option<PathBuf>,
    /// Frontend dev server that non-IPC traffic is proxied to
    pub frontend_dev_server_url: Option<Url>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:34115".to_string(),
            ipc_path: DEFAULT_IPC_PATH.to_string(),
            asset_dir: None,
            frontend_dev_server_url: None,
        }
    }
}

#[derive(Clone)]
struct AppState {
    relay: Arc<Relay>,
    proxy: Option<FrontendProxy>,
    assets: Router,
    asset_dir: Option<PathBuf>,
}

/// The development server.
pub struct DevServer {
    config: ServerConfig,
    relay: Arc<Relay>,
    assets: Option<Router>,
}

impl DevServer {
    pub fn new(config: ServerConfig, host: Arc<dyn Host>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            config,
            relay: Arc::new(Relay::new(host, dispatcher)),
            assets: None,
        }
    }

    /// Serve non-IPC requests with `assets` instead of the static directory.
    pub fn with_asset_service(mut self, assets: Router) -> Self {
        self.assets = Some(assets);
        self
    }

    /// The relay, for host-originated reloads and notifications.
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Result<Router, RelayError> {
        if !self.config.ipc_path.starts_with('/') {
            return Err(RelayError::InvalidEndpoint(format!(
                "IPC path must start with '/': {}",
                self.config.ipc_path
            )));
        }

        let proxy = self
            .config
            .frontend_dev_server_url
            .clone()
            .map(FrontendProxy::new)
            .transpose()?;
        let assets = self.assets.clone().unwrap_or_else(|| match &self.config.asset_dir {
            Some(dir) => Router::new().fallback_service(ServeDir::new(dir)),
            None => Router::new().fallback(|| async { StatusCode::NOT_FOUND }),
        });

        let serves_assetdir = proxy.is_none();
        let state = AppState {
            relay: Arc::clone(&self.relay),
            proxy,
            assets,
            asset_dir: self.config.asset_dir.clone(),
        };

        let mut router = Router::new()
            .route(&self.config.ipc_path, get(ipc_handler))
            .route("/wails/reload", get(reload_handler))
            .route("/wails/reloadapp", get(reload_app_handler));
        if serves_assetdir {
            router = router.route("/wails/assetdir", get(assetdir_handler));
        }
        Ok(router.fallback(fallback_handler).with_state(state))
    }

    /// Bind and start serving in the background.
    ///
    /// Bind failure is the only fatal error.
    pub async fn start(&self) -> Result<ServerHandle, RelayError> {
        let router = self.router()?;
        let bind_error = |source| RelayError::Bind {
            addr: self.config.bind_addr.clone(),
            source,
        };
        let listener = TcpListener::bind(&self.config.bind_addr).await.map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;

        log::info!("Dev server listening on {local_addr}");
        if let Some(url) = &self.config.frontend_dev_server_url {
            log::info!("Proxying frontend requests to {url}");
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .map_err(|e| RelayError::Transport(e.to_string()))
        });

        Ok(ServerHandle {
            local_addr,
            relay: Arc::clone(&self.relay),
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Serve until the listener fails.
    pub async fn run(&self) -> Result<(), RelayError> {
        self.start().await?.wait().await
    }
}

/// Handle returned by [`DevServer::start`].
pub struct ServerHandle {
    local_addr: SocketAddr,
    relay: Arc<Relay>,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<(), RelayError>>,
}

impl ServerHandle {
    /// The bound address, useful when binding port 0.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections, wait for in-flight requests, then close
    /// every upgraded IPC socket.
    pub async fn shutdown(mut self) -> Result<(), RelayError> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        let relay = Arc::clone(&self.relay);
        let result = self.wait().await;
        let closed = relay.close_all().await;
        log::info!("Dev server stopped, {closed} connections closed");
        result
    }

    async fn wait(self) -> Result<(), RelayError> {
        self.task
            .await
            .map_err(|e| RelayError::Transport(e.to_string()))?
    }
}

async fn ipc_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state.relay))
}

/// Adapt an upgraded socket to the relay's text stream and sink.
async fn serve_socket(socket: WebSocket, relay: Arc<Relay>) {
    let (ws_tx, ws_rx) = socket.split();

    let frames = ws_rx
        .take_while(|message| ready(!matches!(message, Ok(Message::Close(_)))))
        .filter_map(|message| ready(frame_text(message)));
    let outbound: Outbound = Box::pin(
        ws_tx
            .with(|text: String| ready(Ok::<_, axum::Error>(Message::Text(text.into()))))
            .sink_map_err(RelayError::from),
    );

    let _ = relay.serve_connection(Box::pin(frames), outbound).await;
}

fn frame_text(message: Result<Message, axum::Error>) -> Option<Result<String, RelayError>> {
    match message {
        Ok(Message::Text(text)) => Some(Ok(text.as_str().to_owned())),
        Ok(Message::Binary(data)) => Some(String::from_utf8(data.to_vec()).map_err(RelayError::from)),
        Ok(_) => None,
        Err(e) => Some(Err(e.into())),
    }
}

async fn reload_handler(State(state): State<AppState>) -> StatusCode {
    state.relay.window_reload().await;
    StatusCode::NO_CONTENT
}

async fn reload_app_handler(State(state): State<AppState>) -> StatusCode {
    state.relay.window_reload_app().await;
    StatusCode::NO_CONTENT
}

async fn assetdir_handler(State(state): State<AppState>) -> String {
    state
        .asset_dir
        .as_ref()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default()
}

fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.eq_ignore_ascii_case("websocket"))
}

async fn fallback_handler(State(state): State<AppState>, request: Request) -> Response {
    let upgrade = is_websocket_upgrade(request.headers());
    match (&state.proxy, upgrade) {
        (Some(frontend), true) => {
            let (mut parts, _body) = request.into_parts();
            let target = match frontend.websocket_target(&parts.uri) {
                Ok(target) => target,
                Err(e) => return (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
            };
            match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
                Ok(ws) => ws.on_upgrade(move |socket| proxy::bridge(socket, target)),
                Err(rejection) => rejection.into_response(),
            }
        }
        (None, true) => StatusCode::NOT_IMPLEMENTED.into_response(),
        (Some(frontend), false) => frontend.forward(request).await,
        (None, false) => match state.assets.clone().oneshot(request).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::NullDispatcher;
    use crate::host::Headless;
    use axum::body::Body;

    fn server(config: ServerConfig) -> DevServer {
        DevServer::new(config, Arc::new(Headless), Arc::new(NullDispatcher))
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:34115");
        assert_eq!(config.ipc_path, "/wails/ipc");
        assert!(config.asset_dir.is_none());
        assert!(config.frontend_dev_server_url.is_none());
    }

    #[test]
    fn test_router_rejects_relative_ipc_path() {
        let config = ServerConfig {
            ipc_path: "wails/ipc".to_string(),
            ..ServerConfig::default()
        };
        assert!(matches!(server(config).router(), Err(RelayError::InvalidEndpoint(_))));
    }

    #[test]
    fn test_websocket_upgrade_detection() {
        let mut headers = HeaderMap::new();
        assert!(!is_websocket_upgrade(&headers));
        headers.insert(header::UPGRADE, "WebSocket".parse().unwrap());
        assert!(is_websocket_upgrade(&headers));
    }

    #[tokio::test]
    async fn test_reload_endpoint_returns_no_content() {
        let router = server(ServerConfig::default()).router().unwrap();
        let request = axum::http::Request::builder().uri("/wails/reload").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_assetdir_absent_with_frontend_server() {
        let config = ServerConfig {
            frontend_dev_server_url: Some(Url::parse("http://127.0.0.1:9").unwrap()),
            ..ServerConfig::default()
        };
        let router = server(config).router().unwrap();
        let request = axum::http::Request::builder().uri("/wails/assetdir").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        // Falls through to the proxy, which cannot reach the discard port.
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn test_unconfigured_assets_are_not_found() {
        let router = server(ServerConfig::default()).router().unwrap();
        let request = axum::http::Request::builder().uri("/index.html").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_custom_asset_service() {
        let assets = Router::new().route("/index.html", get(|| async { "hello" }));
        let router = server(ServerConfig::default())
            .with_asset_service(assets)
            .router()
            .unwrap();
        let request = axum::http::Request::builder().uri("/index.html").body(Body::empty()).unwrap();
        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_bind_failure_is_reported() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let config = ServerConfig {
            bind_addr: taken.local_addr().unwrap().to_string(),
            ..ServerConfig::default()
        };
        let result = server(config).start().await;
        assert!(matches!(result, Err(RelayError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let config = ServerConfig {
            bind_addr: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let handle = server(config).start().await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        handle.shutdown().await.unwrap();
    }
}
