//! HTTP exporter serving the published poll state.
//!
//! Routes:
//!
//! - `GET /metrics`: Prometheus text exposition of the current snapshot
//!   plus exporter meta metrics; `503` until the first poll succeeds.
//! - `GET /health`: small JSON document with the poll status; always
//!   `200` so liveness probes do not follow the node's health.
//!
//! Handlers only read the current [`PollState`]; they never talk to the
//! node and never wait for a poll.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::time::Duration;
use std::{convert::Infallible, sync::Arc};

use bytes::Bytes;
use http_body_util::Full;
use hyper::{
    Method, Request, Response, StatusCode,
    body::Incoming,
    header::{self, HeaderValue},
    server::conn::http1,
    service::service_fn,
};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use crate::metrics::TEXT_CONTENT_TYPE;
use crate::poller::{PollState, StateReader};

/// Body returned by `/metrics` before the first successful poll.
pub const NOT_READY_BODY: &str = "not ready: no successful poll yet\n";

/// Pause after a failed `accept` before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to accept connection: {0}")]
    Accept(#[source] io::Error),
}

/// Binds the exporter's listen socket.
///
/// Kept separate from [`serve`] so a bad address fails startup before any
/// background task is spawned.
pub async fn bind(addr: SocketAddr) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind { addr, source })
}

/// Serves `/metrics` and `/health` on `listener` until `shutdown` resolves.
///
/// Every connection is handled on its own task. Connection errors are
/// logged and never stop the server.
pub async fn serve<F>(listener: TcpListener, reader: StateReader, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    if let Ok(addr) = listener.local_addr() {
        info!("metrics exporter listening on http://{addr}/metrics");
    }

    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                if pause_after_accept_error(e, shutdown.as_mut()).await {
                    break;
                }
                continue;
            }
        };

        let io = TokioIo::new(stream);
        let reader = reader.clone();

        tokio::spawn(async move {
            let svc = service_fn(move |req| {
                let state = reader.current();
                async move { Ok::<_, Infallible>(handle_request(&req, &state)) }
            });

            if let Err(err) = http1::Builder::new().serve_connection(io, svc).await {
                debug!(%peer, error = %err, "metrics connection closed with error");
            }
        });
    }

    info!("metrics exporter stopped");
}

/// Logs a failed `accept` and waits before the next one.
///
/// Returns `true` if shutdown fired during the pause.
async fn pause_after_accept_error<F>(err: io::Error, shutdown: Pin<&mut F>) -> bool
where
    F: Future<Output = ()>,
{
    let err = ServeError::Accept(err);
    warn!(error = %err, "accept failed, retrying");
    // Errors such as EMFILE persist; do not spin on them.
    tokio::select! {
        _ = shutdown => true,
        _ = tokio::time::sleep(ACCEPT_BACKOFF) => false,
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    poll_sequence: Option<u64>,
    consecutive_failures: u64,
    last_error: Option<String>,
}

fn handle_request(req: &Request<Incoming>, state: &Arc<PollState>) -> Response<Full<Bytes>> {
    route(req.method(), req.uri().path(), state)
}

fn route(method: &Method, path: &str, state: &PollState) -> Response<Full<Bytes>> {
    match (method, path) {
        (&Method::GET, "/metrics") => metrics_response(state),
        (&Method::GET, "/health") => health_response(state),
        _ => text_response(StatusCode::NOT_FOUND, "text/plain", Bytes::from_static(b"not found")),
    }
}

fn metrics_response(state: &PollState) -> Response<Full<Bytes>> {
    match state.render() {
        Ok(Some(body)) => text_response(StatusCode::OK, TEXT_CONTENT_TYPE, Bytes::from(body)),
        Ok(None) => text_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "text/plain",
            Bytes::from_static(NOT_READY_BODY.as_bytes()),
        ),
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from_static(b"failed to encode metrics\n"),
            )
        }
    }
}

fn health_response(state: &PollState) -> Response<Full<Bytes>> {
    let body = HealthResponse {
        status: if state.is_ready() { "ok" } else { "not_ready" },
        poll_sequence: state.poll_sequence(),
        consecutive_failures: state.consecutive_failures(),
        last_error: state.last_error().map(ToString::to_string),
    };
    let json = serde_json::to_vec(&body).unwrap_or_default();
    text_response(StatusCode::OK, "application/json", Bytes::from(json))
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut resp = Response::new(Full::new(body));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    resp
}
