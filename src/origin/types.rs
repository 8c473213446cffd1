use reqwest::Method;
use url::Url;

use crate::cache::{RequestKey, ResponseSource};

/// Headers that describe a single connection and must not be forwarded.
const HOP_BY_HOP: &[&str] = &[
  "connection",
  "keep-alive",
  "proxy-authenticate",
  "proxy-authorization",
  "te",
  "trailer",
  "transfer-encoding",
  "upgrade",
  "host",
  "content-length",
];

/// Check whether a header belongs to the connection rather than the message.
pub fn is_hop_by_hop(name: &str) -> bool {
  HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// What the client intends to do with a response (`Sec-Fetch-Dest`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Destination {
  /// Top-level page load
  Document,
  Script,
  Style,
  Image,
  Font,
  Manifest,
  /// fetch()/XHR
  #[default]
  Empty,
  Other,
}

impl Destination {
  /// Parse a `Sec-Fetch-Dest` header value.
  pub fn from_fetch_dest(value: &str) -> Self {
    match value.trim().to_ascii_lowercase().as_str() {
      "document" => Self::Document,
      "script" => Self::Script,
      "style" => Self::Style,
      "image" => Self::Image,
      "font" => Self::Font,
      "manifest" => Self::Manifest,
      "" | "empty" => Self::Empty,
      _ => Self::Other,
    }
  }

  pub fn is_document(self) -> bool {
    matches!(self, Self::Document)
  }
}

/// An intercepted request
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub destination: Destination,
  pub headers: Vec<(String, String)>,
  pub body: Option<Vec<u8>>,
}

impl Request {
  /// A plain `GET` as issued by `fetch()`.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      destination: Destination::Empty,
      headers: Vec::new(),
      body: None,
    }
  }

  /// A top-level navigation to `url`.
  #[cfg(test)]
  pub fn navigate(url: Url) -> Self {
    Self::get(url).with_destination(Destination::Document)
  }

  #[cfg(test)]
  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_destination(mut self, destination: Destination) -> Self {
    self.destination = destination;
    self
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }

  /// Identity used to index stored responses.
  pub fn key(&self) -> RequestKey {
    RequestKey::new(&self.method, &self.url)
  }
}

/// A response handed back to the client, whichever way it was produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ResponseSource,
}

impl Response {
  /// A response that just came off the network.
  pub fn new(status: u16, headers: Vec<(String, String)>, body: Vec<u8>) -> Self {
    Self {
      status,
      headers,
      body,
      source: ResponseSource::Network,
    }
  }

  /// Structured error returned for live requests while the network is down.
  pub fn offline() -> Self {
    let body = serde_json::json!({ "error": "Offline" }).to_string().into_bytes();
    Self {
      status: 503,
      headers: vec![("content-type".to_string(), "application/json".to_string())],
      body,
      source: ResponseSource::Offline,
    }
  }

  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// First value of a header, compared case-insensitively.
  #[cfg(test)]
  pub fn header(&self, name: &str) -> Option<&str> {
    self
      .headers
      .iter()
      .find(|(n, _)| n.eq_ignore_ascii_case(name))
      .map(|(_, v)| v.as_str())
  }
}
