//! Core types for the response store.

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use url::Url;

use crate::origin::Response;

/// Normalized identity of a request: method plus full URL (query included,
/// fragment dropped).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
  method: String,
  url: String,
}

impl RequestKey {
  pub fn new(method: &Method, url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    Self {
      method: method.as_str().to_ascii_uppercase(),
      url: url.to_string(),
    }
  }

  /// Rebuild a key from its stored parts.
  pub(crate) fn from_parts(method: String, url: String) -> Self {
    Self { method, url }
  }

  pub fn method(&self) -> &str {
    &self.method
  }

  pub fn url(&self) -> &str {
    &self.url
  }

  /// SHA256 hash for stable, fixed-length storage keys
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.method.as_bytes());
    hasher.update(b" ");
    hasher.update(self.url.as_bytes());
    hex::encode(hasher.finalize())
  }
}

impl fmt::Display for RequestKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Immutable captured copy of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
}

impl Snapshot {
  /// Turn the snapshot back into a response attributed to `source`.
  pub fn into_response(self, source: ResponseSource) -> Response {
    Response {
      status: self.status,
      headers: self.headers,
      body: self.body,
      source,
    }
  }
}

impl From<&Response> for Snapshot {
  fn from(response: &Response) -> Self {
    Self {
      status: response.status,
      headers: response.headers.clone(),
      body: response.body.clone(),
    }
  }
}

/// A snapshot read back from storage.
#[derive(Debug, Clone)]
pub struct CachedSnapshot {
  pub snapshot: Snapshot,
  /// When the snapshot was stored
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Fresh from the network
  Network,
  /// Stored snapshot for the exact request key
  Cache,
  /// Stored snapshot of the fallback document, served for a failed navigation
  Fallback,
  /// Synthetic error response, network unavailable
  Offline,
}

impl ResponseSource {
  pub fn as_str(self) -> &'static str {
    match self {
      Self::Network => "network",
      Self::Cache => "cache",
      Self::Fallback => "fallback",
      Self::Offline => "offline",
    }
  }
}
