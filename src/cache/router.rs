//! Router that decides, per request, between network, store, or both.

use futures::future::try_join_all;
use reqwest::Method;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::RouterError;
use crate::origin::{Fetch, Request, Response};
use crate::routes::{Classification, RouteTable};

use super::manifest::Manifest;
use super::storage::CacheStorage;
use super::traits::{CachedSnapshot, RequestKey, ResponseSource, Snapshot};

/// Offline cache router.
///
/// Sits between the client and the origin. Live requests always go to the
/// network; cacheable requests are answered from the current generation
/// when possible and stored on their first successful fetch. The router only
/// knows its generation by name and never touches entries of another one.
pub struct CacheRouter<S: CacheStorage, F: Fetch> {
  storage: Arc<S>,
  network: Arc<F>,
  generation: String,
  routes: RouteTable,
  /// Served for failed navigations when nothing is stored for the page itself
  fallback_document: Option<String>,
  /// Background cache writes not joined yet
  pending: Mutex<JoinSet<()>>,
}

impl<S: CacheStorage, F: Fetch> CacheRouter<S, F> {
  pub fn new(storage: Arc<S>, network: Arc<F>, generation: impl Into<String>) -> Self {
    Self {
      storage,
      network,
      generation: generation.into(),
      routes: RouteTable::default(),
      fallback_document: Some("/index.html".to_string()),
      pending: Mutex::new(JoinSet::new()),
    }
  }

  pub fn with_routes(mut self, routes: RouteTable) -> Self {
    self.routes = routes;
    self
  }

  /// Set (or with `None`, disable) the document served for failed navigations.
  pub fn with_fallback_document(mut self, path: Option<String>) -> Self {
    self.fallback_document = path;
    self
  }

  /// A router with the same store, network and settings for another
  /// generation.
  pub fn for_generation(&self, generation: impl Into<String>) -> Self {
    Self {
      storage: Arc::clone(&self.storage),
      network: Arc::clone(&self.network),
      generation: generation.into(),
      routes: self.routes.clone(),
      fallback_document: self.fallback_document.clone(),
      pending: Mutex::new(JoinSet::new()),
    }
  }

  pub fn generation(&self) -> &str {
    &self.generation
  }

  pub fn storage(&self) -> &S {
    &self.storage
  }

  pub fn network(&self) -> &F {
    &self.network
  }

  /// Open the current generation and store a snapshot of every manifest
  /// resource.
  ///
  /// All resources are fetched concurrently and written in one transaction.
  /// If any of them cannot be fetched, or answers with a non-success status,
  /// nothing from this attempt is kept. There is no retry.
  pub async fn initialize(&self, manifest: &Manifest) -> Result<(), RouterError> {
    let install_failure = |reason: String| RouterError::InstallFailure {
      generation: self.generation.clone(),
      reason,
    };

    let existed = self
      .storage
      .generations()
      .map_err(|e| install_failure(e.to_string()))?
      .iter()
      .any(|g| g == &self.generation);

    self
      .storage
      .open_generation(&self.generation)
      .map_err(|e| install_failure(e.to_string()))?;

    let requests: Vec<Request> = manifest.entries().iter().cloned().map(Request::get).collect();
    let fetches = requests.iter().map(|request| self.fetch_manifest_entry(request));

    let stored = match try_join_all(fetches).await {
      Ok(entries) => self
        .storage
        .put_all(&self.generation, &entries)
        .map(|()| entries.len())
        .map_err(|e| e.to_string()),
      Err(reason) => Err(reason),
    };

    match stored {
      Ok(count) => {
        info!(generation = %self.generation, resources = count, "generation installed");
        Ok(())
      }
      Err(reason) => {
        warn!(generation = %self.generation, %reason, "install failed");
        if !existed {
          if let Err(e) = self.storage.delete_generation(&self.generation) {
            warn!(generation = %self.generation, error = %e, "failed to discard incomplete generation");
          }
        }
        Err(install_failure(reason))
      }
    }
  }

  /// Delete every stored generation other than the current one.
  ///
  /// Returns how many generations were removed. Running it again is a no-op.
  /// Fails without deleting anything when the current generation was never
  /// installed.
  pub async fn activate(&self) -> Result<usize, RouterError> {
    let activation_failure = |reason: String| RouterError::ActivationFailure {
      generation: self.generation.clone(),
      reason,
    };

    let generations = self
      .storage
      .generations()
      .map_err(|e| activation_failure(e.to_string()))?;
    if !generations.contains(&self.generation) {
      return Err(activation_failure("generation is not installed".to_string()));
    }

    let mut removed = 0;
    for name in generations.iter().filter(|g| **g != self.generation) {
      if self
        .storage
        .delete_generation(name)
        .map_err(|e| activation_failure(e.to_string()))?
      {
        info!(generation = %name, "deleted superseded generation");
        removed += 1;
      }
    }

    Ok(removed)
  }

  /// Answer an intercepted request.
  ///
  /// Only a cacheable request that misses the store while the network is
  /// down, with no fallback document to offer, ends in an error.
  pub async fn route(&self, request: Request) -> Result<Response, RouterError> {
    match self.routes.classify(request.path()) {
      Classification::Live => Ok(self.fetch_live(&request).await),
      Classification::Cacheable => self.fetch_cacheable(request).await,
    }
  }

  /// Wait for every background cache write issued so far.
  pub async fn settle(&self) {
    let mut pending = {
      let mut guard = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
      std::mem::take(&mut *guard)
    };

    while let Some(result) = pending.join_next().await {
      if let Err(e) = result {
        warn!(error = %e, "background cache write did not finish");
      }
    }
  }

  async fn fetch_manifest_entry(&self, request: &Request) -> Result<(RequestKey, Snapshot), String> {
    let response = self
      .network
      .fetch(request)
      .await
      .map_err(|e| e.to_string())?;
    if !response.is_success() {
      return Err(format!("{} answered with status {}", request.url, response.status));
    }
    Ok((request.key(), Snapshot::from(&response)))
  }

  async fn fetch_live(&self, request: &Request) -> Response {
    match self.network.fetch(request).await {
      Ok(response) => {
        debug!(url = %request.url, status = response.status, "live");
        response
      }
      Err(e) => {
        debug!(url = %request.url, error = %e, "live request failed, answering offline");
        Response::offline()
      }
    }
  }

  async fn fetch_cacheable(&self, request: Request) -> Result<Response, RouterError> {
    let key = request.key();

    if let Some(cached) = self.lookup(&key) {
      debug!(%key, cached_at = %cached.cached_at, "cache hit");
      return Ok(cached.snapshot.into_response(ResponseSource::Cache));
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        debug!(%key, status = response.status, "cache miss, fetched");
        if request.method == Method::GET && response.is_success() {
          self.store_in_background(key, Snapshot::from(&response));
        }
        Ok(response)
      }
      Err(e) => {
        debug!(%key, error = %e, "cache miss and network unavailable");
        // Only page loads get the fallback. A script, a stylesheet or a
        // submitted form must not be answered with the app shell.
        if request.method == Method::GET && request.destination.is_document() {
          if let Some(fallback) = self.fallback_for(&request) {
            return Ok(fallback);
          }
        }
        Err(RouterError::NoFallbackAvailable {
          url: request.url.to_string(),
        })
      }
    }
  }

  fn fallback_for(&self, request: &Request) -> Option<Response> {
    let path = self.fallback_document.as_deref()?;
    let url = request.url.join(path).ok()?;
    let cached = self.lookup(&RequestKey::new(&Method::GET, &url))?;
    debug!(url = %request.url, fallback = %url, "serving fallback document");
    Some(cached.snapshot.into_response(ResponseSource::Fallback))
  }

  /// Store lookup where an unreadable entry counts as a miss.
  fn lookup(&self, key: &RequestKey) -> Option<CachedSnapshot> {
    match self.storage.lookup(&self.generation, key) {
      Ok(hit) => hit,
      Err(e) => {
        warn!(%key, error = %e, "unreadable cache entry, treating as miss");
        None
      }
    }
  }

  fn store_in_background(&self, key: RequestKey, snapshot: Snapshot) {
    let storage = Arc::clone(&self.storage);
    let generation = self.generation.clone();

    let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
    // Reap finished writes so the set only grows with outstanding ones.
    while pending.try_join_next().is_some() {}
    pending.spawn_blocking(move || {
      if let Err(e) = storage.put(&generation, &key, &snapshot) {
        warn!(%key, error = %e, "failed to store response");
      }
    });
  }
}
