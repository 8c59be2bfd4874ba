//! Accept loop and URL-template routing for the three upgrade endpoints,
//! plus `/health` and CORS preflight handled without ever attempting an
//! upgrade.
//!
//! Mirrors the accept-loop shape used for socket clients elsewhere in
//! this codebase — `listener.accept()` in a loop, one task spawned per
//! connection — adapted from a Unix-domain listener to a TCP listener
//! fronting a WebSocket upgrade instead of a raw framing protocol.

use std::cell::{Cell, RefCell};
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{Method, StatusCode};

use crate::connection;
use crate::notify::NotificationSink;
use crate::registry::Registry;
use crate::ws;

enum Route {
    Broadcast { stream_id: String },
    Watch { stream_id: String, viewer_id: String },
    Chat { stream_id: String },
}

fn parse_route(path: &str) -> Option<Route> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        ["broadcast", stream_id] => Some(Route::Broadcast {
            stream_id: (*stream_id).to_string(),
        }),
        ["watch", stream_id, viewer_id] => Some(Route::Watch {
            stream_id: (*stream_id).to_string(),
            viewer_id: (*viewer_id).to_string(),
        }),
        ["chat", stream_id] => Some(Route::Chat {
            stream_id: (*stream_id).to_string(),
        }),
        _ => None,
    }
}

fn with_cors<B>(mut resp: Response<B>) -> Response<B> {
    let headers = resp.headers_mut();
    headers.insert("access-control-allow-origin", "*".parse().expect("static header value"));
    headers.insert(
        "access-control-allow-methods",
        "GET, POST, OPTIONS".parse().expect("static header value"),
    );
    headers.insert(
        "access-control-allow-headers",
        "Content-Type".parse().expect("static header value"),
    );
    resp
}

/// Binds `port` and serves connections until this future is dropped or
/// the process is signaled to shut down.
///
/// # Errors
///
/// Returns an error if the port cannot be bound.
pub async fn serve(port: u16, registry: Arc<Registry>, notifier: Arc<dyn NotificationSink>) -> Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    log::info!("listening on :{port}");
    serve_listener(listener, registry, notifier).await
}

/// Runs the accept loop against an already-bound listener. Split out of
/// [`serve`] so tests can bind an ephemeral port and drive the real
/// accept/route/upgrade path end to end.
async fn serve_listener(listener: TcpListener, registry: Arc<Registry>, notifier: Arc<dyn NotificationSink>) -> Result<()> {
    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                log::error!("accept error: {e}");
                continue;
            }
        };
        let registry = registry.clone();
        let notifier = notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, addr, registry, notifier).await {
                log::debug!("connection from {addr} ended: {e:#}");
            }
        });
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    registry: Arc<Registry>,
    notifier: Arc<dyn NotificationSink>,
) -> Result<()> {
    ws::tune(&stream)?;

    let route_slot: RefCell<Option<Route>> = RefCell::new(None);
    let responded_directly = Cell::new(false);

    let callback = |req: &Request, response: Response<()>| -> Result<Response<()>, ErrorResponse> {
        let path = req.uri().path();

        if req.method() == Method::OPTIONS {
            responded_directly.set(true);
            return Err(with_cors(
                Response::builder().status(StatusCode::OK).body(None).expect("valid response"),
            ));
        }
        if path == "/health" {
            responded_directly.set(true);
            return Err(with_cors(
                Response::builder()
                    .status(StatusCode::OK)
                    .body(Some("OK".to_string()))
                    .expect("valid response"),
            ));
        }

        match parse_route(path) {
            Some(route) => {
                *route_slot.borrow_mut() = Some(route);
                Ok(with_cors(response))
            }
            None => Err(with_cors(
                Response::builder()
                    .status(StatusCode::NOT_FOUND)
                    .body(Some("not found".to_string()))
                    .expect("valid response"),
            )),
        }
    };

    let ws_stream = match tokio_tungstenite::accept_hdr_async_with_config(stream, callback, Some(ws::config())).await {
        Ok(stream) => stream,
        Err(_) if responded_directly.get() => return Ok(()),
        Err(e) => return Err(anyhow::anyhow!("handshake failed for {addr}: {e}")),
    };

    let route = route_slot
        .into_inner()
        .context("upgrade succeeded without a matched route")?;

    match route {
        Route::Broadcast { stream_id } => {
            connection::run_broadcaster(ws_stream, stream_id, registry, notifier).await
        }
        Route::Watch { stream_id, viewer_id } => {
            connection::run_viewer(ws_stream, stream_id, viewer_id, registry).await
        }
        Route::Chat { stream_id } => connection::run_chat(ws_stream, stream_id, registry).await,
    }
}
