//! Local HTTP proxy that puts a worker in front of the app origin.
//!
//! Every request reaching the proxy is handed to the worker as if the page
//! had issued it; the answer says where it came from in `x-offline-router`.

use axum::body::{to_bytes, Body};
use axum::extract::{Request as HttpRequest, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as HttpResponse};
use axum::Router;
use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use crate::cache::CacheStorage;
use crate::error::RouterError;
use crate::origin::{is_hop_by_hop, Destination, Fetch, Request, Response};
use crate::worker::Worker;

pub const SOURCE_HEADER: &str = "x-offline-router";

struct ProxyState<S: CacheStorage, F: Fetch> {
  worker: Arc<Worker<S, F>>,
  max_body_bytes: usize,
}

/// Build the proxy service around `worker`.
pub fn app<S: CacheStorage, F: Fetch>(worker: Arc<Worker<S, F>>, max_body_bytes: usize) -> Router {
  let state = Arc::new(ProxyState {
    worker,
    max_body_bytes,
  });
  Router::new().fallback(intercept::<S, F>).with_state(state)
}

/// Serve until ctrl-c, then wait for pending cache writes.
pub async fn serve<S: CacheStorage, F: Fetch>(
  worker: Arc<Worker<S, F>>,
  listen: SocketAddr,
  max_body_bytes: usize,
) -> Result<()> {
  let listener = TcpListener::bind(listen)
    .await
    .map_err(|e| eyre!("Failed to bind {}: {}", listen, e))?;
  info!(%listen, origin = %worker.origin(), "proxy listening");

  axum::serve(listener, app(Arc::clone(&worker), max_body_bytes))
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| eyre!("Proxy failed: {}", e))?;

  worker.settle().await;
  Ok(())
}

async fn shutdown_signal() {
  wait_for_shutdown(tokio::signal::ctrl_c()).await
}

/// Resolve once `signal` fires. A signal that cannot be installed never
/// resolves, so the server keeps running.
async fn wait_for_shutdown(signal: impl Future<Output = std::io::Result<()>>) {
  match signal.await {
    Ok(()) => info!("shutting down"),
    Err(e) => {
      warn!(error = %e, "cannot listen for ctrl-c, serving until killed");
      std::future::pending::<()>().await;
    }
  }
}

async fn intercept<S: CacheStorage, F: Fetch>(
  State(state): State<Arc<ProxyState<S, F>>>,
  request: HttpRequest,
) -> HttpResponse {
  let (parts, body) = request.into_parts();

  let body = match to_bytes(body, state.max_body_bytes).await {
    Ok(bytes) => bytes,
    Err(e) => {
      debug!(error = %e, "rejecting request body");
      return StatusCode::PAYLOAD_TOO_LARGE.into_response();
    }
  };

  // Only path and query come from the client; scheme and host are always
  // the origin's, even for targets like `//other.host/` or absolute URIs.
  let mut url = state.worker.origin().clone();
  url.set_path(parts.uri.path());
  url.set_query(parts.uri.query());

  let headers = parts
    .headers
    .iter()
    .filter_map(|(name, value)| {
      value
        .to_str()
        .ok()
        .map(|v| (name.as_str().to_string(), v.to_string()))
    })
    .collect();

  let request = Request {
    method: parts.method,
    url,
    destination: destination(&parts.headers),
    headers,
    body: (!body.is_empty()).then(|| body.to_vec()),
  };

  match state.worker.fetch(request).await {
    Ok(response) => into_http(response),
    Err(e @ RouterError::NoFallbackAvailable { .. }) => {
      debug!(error = %e, "no response available");
      StatusCode::GATEWAY_TIMEOUT.into_response()
    }
    Err(e @ RouterError::Uncontrolled(_)) => {
      debug!(error = %e, "origin unreachable");
      StatusCode::BAD_GATEWAY.into_response()
    }
    Err(e) => {
      warn!(error = %e, "request failed");
      StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
  }
}

/// Work out what the page wants the response for.
fn destination(headers: &HeaderMap) -> Destination {
  let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

  if let Some(dest) = header("sec-fetch-dest") {
    return Destination::from_fetch_dest(dest);
  }
  if header("sec-fetch-mode") == Some("navigate") {
    return Destination::Document;
  }
  // Clients without fetch metadata: a page load asks for HTML first.
  match header("accept") {
    Some(accept) if accept.starts_with("text/html") => Destination::Document,
    _ => Destination::Empty,
  }
}

fn into_http(response: Response) -> HttpResponse {
  let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);

  let mut headers = HeaderMap::new();
  for (name, value) in &response.headers {
    if is_hop_by_hop(name) {
      continue;
    }
    match (
      HeaderName::from_bytes(name.as_bytes()),
      HeaderValue::from_str(value),
    ) {
      (Ok(name), Ok(value)) => {
        headers.append(name, value);
      }
      _ => debug!(header = %name, "dropping invalid header"),
    }
  }
  headers.insert(SOURCE_HEADER, HeaderValue::from_static(response.source.as_str()));

  (status, headers, Body::from(response.body)).into_response()
}
