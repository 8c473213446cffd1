//! Network side of the router: the request/response model and the HTTP
//! client that talks to the app origin.

mod client;
mod types;

use std::future::Future;

use crate::error::FetchError;

pub use client::OriginClient;
pub use types::{is_hop_by_hop, Destination, Request, Response};

/// Anything able to put a request on the wire.
///
/// Any HTTP status counts as a successful fetch; only a missing response
/// (connection refused, DNS, TLS, timeout, truncated body) is an error.
pub trait Fetch: Send + Sync + 'static {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response, FetchError>> + Send;
}
