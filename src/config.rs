use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::{Manifest, DEFAULT_ASSETS};
use crate::routes::{default_rules, RouteRule, RouteTable};

/// Environment variable overriding the origin from the config file.
pub const ORIGIN_ENV: &str = "OFFLINE_ROUTER_ORIGIN";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Where the app and its API are served from
  pub origin: Url,
  /// Cache generation name; bump it to invalidate the whole store
  pub generation: String,
  /// Paths stored when a generation is installed
  pub manifest: Vec<String>,
  /// Page served for failed navigations (empty disables the fallback)
  pub fallback_document: String,
  /// Ordered (prefix, class) routing rules; unmatched paths are cacheable
  pub routes: Vec<RouteRule>,
  /// SQLite store location (defaults to $XDG_DATA_HOME/offline-router/cache.db)
  pub store_path: Option<PathBuf>,
  /// Proxy listen address
  pub listen: SocketAddr,
  /// Largest request body the proxy accepts
  pub max_body_bytes: usize,
  pub upstream: UpstreamConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpstreamConfig {
  /// Per-request timeout; none unless set
  pub timeout_secs: Option<u64>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse("http://127.0.0.1:8000").expect("static url"),
      generation: "l8tefuel-v1".to_string(),
      manifest: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
      fallback_document: "/index.html".to_string(),
      routes: default_rules(),
      store_path: None,
      listen: SocketAddr::from(([127, 0, 0, 1], 8080)),
      max_body_bytes: 1024 * 1024,
      upstream: UpstreamConfig::default(),
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./offline-router.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/offline-router/config.yaml
  ///
  /// Without any file the built-in defaults apply. `OFFLINE_ROUTER_ORIGIN`
  /// overrides the origin either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    config.with_env_overrides()
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("offline-router.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("offline-router").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    config.validate()?;
    Ok(config)
  }

  fn with_env_overrides(self) -> Result<Self> {
    match std::env::var(ORIGIN_ENV) {
      Ok(origin) => Ok(Self {
        origin: Url::parse(&origin).map_err(|e| eyre!("Invalid {} '{}': {}", ORIGIN_ENV, origin, e))?,
        ..self
      }),
      Err(_) => Ok(self),
    }
  }

  fn validate(&self) -> Result<()> {
    if self.generation.trim().is_empty() {
      return Err(eyre!("generation must not be empty"));
    }
    if let Some(rule) = self.routes.iter().find(|r| !r.prefix.starts_with('/')) {
      return Err(eyre!("route prefix '{}' must start with '/'", rule.prefix));
    }
    Ok(())
  }

  pub fn manifest(&self) -> Result<Manifest> {
    Manifest::resolve(&self.origin, &self.manifest)
      .map_err(|e| eyre!("Invalid manifest entry: {}", e))
  }

  pub fn route_table(&self) -> RouteTable {
    RouteTable::new(self.routes.clone())
  }

  pub fn fallback_document(&self) -> Option<String> {
    Some(self.fallback_document.clone()).filter(|p| !p.is_empty())
  }
}
