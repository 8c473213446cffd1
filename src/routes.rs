//! Request classification by URL path prefix.

use serde::Deserialize;

/// Path prefixes of the backend API. Everything else is the static shell.
pub const DEFAULT_LIVE_PREFIXES: &[&str] = &[
  // auth/session
  "/token",
  "/me",
  // live data
  "/check-prices",
  "/search-stations",
  "/admin",
  "/favorite-locations",
  "/fuel-logs",
];

/// How a request is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
  /// Network only, never stored
  Live,
  /// Served from the store first, network on a miss
  Cacheable,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RouteRule {
  pub prefix: String,
  #[serde(rename = "class")]
  pub classification: Classification,
}

impl RouteRule {
  pub fn new(prefix: impl Into<String>, classification: Classification) -> Self {
    Self {
      prefix: prefix.into(),
      classification,
    }
  }

  pub fn live(prefix: impl Into<String>) -> Self {
    Self::new(prefix, Classification::Live)
  }
}

/// Ordered list of (prefix, classification) pairs.
///
/// The longest matching prefix decides; on equal length the earlier rule
/// wins. Paths that match nothing get the table default.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTable {
  rules: Vec<RouteRule>,
  default: Classification,
}

impl RouteTable {
  pub fn new(rules: Vec<RouteRule>) -> Self {
    Self {
      rules,
      default: Classification::Cacheable,
    }
  }

  /// Set the classification of paths no rule matches.
  #[cfg(test)]
  pub fn with_default(mut self, default: Classification) -> Self {
    self.default = default;
    self
  }

  pub fn classify(&self, path: &str) -> Classification {
    let mut best: Option<&RouteRule> = None;
    for rule in &self.rules {
      if path.starts_with(&rule.prefix) && best.map_or(true, |b| rule.prefix.len() > b.prefix.len())
      {
        best = Some(rule);
      }
    }
    best.map_or(self.default, |rule| rule.classification)
  }
}

impl Default for RouteTable {
  fn default() -> Self {
    Self::new(default_rules())
  }
}

pub fn default_rules() -> Vec<RouteRule> {
  DEFAULT_LIVE_PREFIXES
    .iter()
    .map(|p| RouteRule::live(*p))
    .collect()
}
