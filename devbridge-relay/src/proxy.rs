//! Reverse proxy to a separately running frontend dev server.
//!
//! Plain requests are replayed with `reqwest`; WebSocket upgrades (a bundler's
//! hot-reload socket, for instance) are bridged frame by frame.

use axum::body::Body;
use axum::extract::ws::{Message as ClientMessage, WebSocket};
use axum::extract::Request;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use url::Url;

use crate::error::RelayError;

/// Largest request body forwarded upstream.
const MAX_BODY_BYTES: usize = 64 * 1024 * 1024;

/// Hop-by-hop headers that must not be forwarded.
const HOP_HEADERS: [header::HeaderName; 5] = [
    header::CONNECTION,
    header::HOST,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TE,
];

#[derive(Clone)]
pub struct FrontendProxy {
    base: Url,
    client: reqwest::Client,
}

impl FrontendProxy {
    pub fn new(base: Url) -> Result<Self, RelayError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| RelayError::Proxy(e.to_string()))?;
        Ok(Self { base, client })
    }

    /// Replay `request` against the dev server. Upstream failure is a 502.
    pub async fn forward(&self, request: Request) -> Response {
        match self.try_forward(request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Frontend proxy error: {e}");
                (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
            }
        }
    }

    async fn try_forward(&self, request: Request) -> Result<Response, RelayError> {
        let (parts, body) = request.into_parts();
        let target = upstream_url(&self.base, &parts.uri, false)?;
        let body = axum::body::to_bytes(body, MAX_BODY_BYTES)
            .await
            .map_err(|e| RelayError::Proxy(e.to_string()))?;

        let upstream = self
            .client
            .request(parts.method, target)
            .headers(strip_hop_headers(&parts.headers))
            .body(body)
            .send()
            .await
            .map_err(|e| RelayError::Proxy(e.to_string()))?;

        let mut builder = Response::builder().status(upstream.status());
        for (name, value) in strip_hop_headers(upstream.headers()).iter() {
            builder = builder.header(name, value);
        }
        let bytes = upstream
            .bytes()
            .await
            .map_err(|e| RelayError::Proxy(e.to_string()))?;
        builder
            .body(Body::from(bytes))
            .map_err(|e| RelayError::Proxy(e.to_string()))
    }

    /// Where an upgrade for `uri` should be bridged to.
    pub fn websocket_target(&self, uri: &Uri) -> Result<Url, RelayError> {
        upstream_url(&self.base, uri, true)
    }
}

fn strip_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = headers.clone();
    for name in &HOP_HEADERS {
        forwarded.remove(name);
    }
    forwarded
}

/// Map a request URI onto the dev server, switching to `ws`/`wss` for upgrades.
pub fn upstream_url(base: &Url, uri: &Uri, websocket: bool) -> Result<Url, RelayError> {
    let mut target = base.clone();
    target.set_path(uri.path());
    target.set_query(uri.query());
    if websocket {
        let scheme = if base.scheme() == "https" { "wss" } else { "ws" };
        target
            .set_scheme(scheme)
            .map_err(|()| RelayError::InvalidEndpoint(format!("cannot use {scheme} for {base}")))?;
    }
    Ok(target)
}

/// Pump frames between a browser socket and the dev server until either side closes.
pub async fn bridge(client: WebSocket, target: Url) {
    let upstream = match tokio_tungstenite::connect_async(target.as_str()).await {
        Ok((stream, _)) => stream,
        Err(e) => {
            log::error!("Cannot reach frontend socket {target}: {e}");
            return;
        }
    };
    log::debug!("Bridging websocket to {target}");

    let (mut client_tx, mut client_rx) = client.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let to_upstream = async {
        while let Some(Ok(message)) = client_rx.next().await {
            let forwarded = match message {
                ClientMessage::Text(text) => UpstreamMessage::text(text.as_str().to_owned()),
                ClientMessage::Binary(data) => UpstreamMessage::binary(data),
                ClientMessage::Close(_) => break,
                _ => continue,
            };
            if upstream_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        let _ = upstream_tx.close().await;
    };

    let to_client = async {
        while let Some(Ok(message)) = upstream_rx.next().await {
            let forwarded = match message {
                UpstreamMessage::Text(text) => ClientMessage::Text(text.as_str().to_owned().into()),
                UpstreamMessage::Binary(data) => ClientMessage::Binary(data),
                UpstreamMessage::Close(_) => break,
                _ => continue,
            };
            if client_tx.send(forwarded).await.is_err() {
                break;
            }
        }
        let _ = client_tx.close().await;
    };

    tokio::select! {
        _ = to_upstream => {}
        _ = to_client => {}
    }
    log::debug!("Websocket bridge to {target} closed");
}
