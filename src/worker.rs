//! Lifecycle host for the cache router.
//!
//! A worker goes through `New -> Installing -> Waiting -> Activating ->
//! Active`, or ends up `Redundant` if a step fails. Install and activate run
//! on spawned tasks and hand back a [`Completion`]; the phase only moves on
//! once that task has finished, so nothing observes a half-installed or
//! half-cleaned store.
//!
//! # Example
//!
//! ```ignore
//! let worker = Worker::new(router, manifest, origin);
//! worker.install().settled().await?;
//! worker.activate().settled().await?;
//!
//! let response = worker.fetch(Request::get(url)).await?;
//! ```

use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{CacheRouter, CacheStorage, Manifest};
use crate::error::RouterError;
use crate::origin::{Fetch, Request, Response};

/// Background sync tag that asks for a price check.
pub const CHECK_PRICES_TAG: &str = "check-prices";

/// Lifecycle phase of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
  /// Created, nothing done yet
  New,
  /// Manifest being fetched into the new generation
  Installing,
  /// Installed, waiting to be activated
  Waiting,
  /// Superseded generations being deleted
  Activating,
  /// Controls requests
  Active,
  /// Install or activation failed; never used again
  Redundant,
}

/// Handle on a running lifecycle step.
///
/// The host must await [`Completion::settled`] before doing anything that
/// depends on the step.
#[must_use = "a lifecycle step is only complete once it has settled"]
pub struct Completion {
  handle: JoinHandle<Result<(), RouterError>>,
}

impl Completion {
  fn spawn<Fut>(future: Fut) -> Self
  where
    Fut: std::future::Future<Output = Result<(), RouterError>> + Send + 'static,
  {
    Self {
      handle: tokio::spawn(future),
    }
  }

  fn rejected(error: RouterError) -> Self {
    Self::spawn(async move { Err(error) })
  }

  /// Wait for the step to finish.
  pub async fn settled(self) -> Result<(), RouterError> {
    match self.handle.await {
      Ok(result) => result,
      Err(e) => Err(RouterError::Aborted(e.to_string())),
    }
  }
}

/// Owns a router and decides when it may answer requests.
pub struct Worker<S: CacheStorage, F: Fetch> {
  router: Arc<CacheRouter<S, F>>,
  manifest: Manifest,
  origin: Url,
  phase: Arc<watch::Sender<Phase>>,
}

impl<S: CacheStorage, F: Fetch> Worker<S, F> {
  pub fn new(router: CacheRouter<S, F>, manifest: Manifest, origin: Url) -> Self {
    let (phase, _) = watch::channel(Phase::New);
    Self {
      router: Arc::new(router),
      manifest,
      origin,
      phase: Arc::new(phase),
    }
  }

  /// Bring the router's generation into service.
  ///
  /// Resumes it when an earlier run already activated it, otherwise installs
  /// and activates it. When that fails and one other generation is still
  /// stored, a worker for that generation takes over. With nothing to fall
  /// back to, the failed worker is returned and passes requests through.
  pub async fn start(
    router: CacheRouter<S, F>,
    manifest: Manifest,
    origin: Url,
  ) -> color_eyre::Result<Self> {
    let worker = Self::new(router, manifest, origin);
    if worker.resume()? {
      return Ok(worker);
    }

    let outcome = match worker.install().settled().await {
      Ok(()) => worker.activate().settled().await,
      Err(e) => Err(e),
    };
    let Err(e) = outcome else {
      return Ok(worker);
    };
    warn!(generation = worker.router.generation(), error = %e, "generation not brought into service");

    if let [previous] = worker.router.storage().generations()?.as_slice() {
      let standby = Self::new(
        worker.router.for_generation(previous.as_str()),
        worker.manifest.clone(),
        worker.origin.clone(),
      );
      if standby.resume()? {
        warn!(generation = %previous, "previous generation stays in service");
        return Ok(standby);
      }
    }

    warn!("no generation in service, requests go straight to the network");
    Ok(worker)
  }

  pub fn phase(&self) -> Phase {
    *self.phase.borrow()
  }

  pub fn origin(&self) -> &Url {
    &self.origin
  }

  /// Fill the current generation from the manifest.
  pub fn install(&self) -> Completion {
    if let Err(e) = self.transition(Phase::New, Phase::Installing, "install") {
      return Completion::rejected(e);
    }

    let router = Arc::clone(&self.router);
    let manifest = self.manifest.clone();
    let phase = Arc::clone(&self.phase);

    Completion::spawn(async move {
      match router.initialize(&manifest).await {
        Ok(()) => {
          phase.send_replace(Phase::Waiting);
          Ok(())
        }
        Err(e) => {
          phase.send_replace(Phase::Redundant);
          Err(e)
        }
      }
    })
  }

  /// Drop every other generation and start controlling requests.
  pub fn activate(&self) -> Completion {
    if let Err(e) = self.transition(Phase::Waiting, Phase::Activating, "activate") {
      return Completion::rejected(e);
    }

    let router = Arc::clone(&self.router);
    let phase = Arc::clone(&self.phase);

    Completion::spawn(async move {
      match router.activate().await {
        Ok(removed) => {
          info!(generation = router.generation(), removed, "worker active");
          phase.send_replace(Phase::Active);
          Ok(())
        }
        Err(e) => {
          warn!(error = %e, "activation failed");
          phase.send_replace(Phase::Redundant);
          Err(e)
        }
      }
    })
  }

  /// Take over a generation that an earlier run already installed and
  /// activated, skipping both steps.
  ///
  /// Only applies when the current generation is the single one stored;
  /// returns false (and changes nothing) otherwise.
  pub fn resume(&self) -> color_eyre::Result<bool> {
    let generations = self.router.storage().generations()?;
    if generations != [self.router.generation()] {
      return Ok(false);
    }
    self.transition(Phase::New, Phase::Active, "resume")?;
    Ok(true)
  }

  /// Handle a request from a client.
  ///
  /// Until the worker is active its clients are not controlled and requests
  /// go straight to the network.
  pub async fn fetch(&self, request: Request) -> Result<Response, RouterError> {
    if self.phase() == Phase::Active {
      return self.router.route(request).await;
    }

    debug!(url = %request.url, phase = ?self.phase(), "uncontrolled request");
    Ok(self.router.network().fetch(&request).await?)
  }

  /// Handle a background sync event.
  ///
  /// Returns the response of the sync work, or `None` for tags nobody
  /// handles.
  pub async fn sync(&self, tag: &str) -> Result<Option<Response>, RouterError> {
    if tag != CHECK_PRICES_TAG {
      debug!(tag, "ignoring background sync");
      return Ok(None);
    }

    info!(tag, "background sync triggered");
    let url = self.origin.join("/check-prices")?;
    let response = self.fetch(Request::get(url)).await?;
    info!(tag, status = response.status, source = response.source.as_str(), "background sync done");

    Ok(Some(response))
  }

  /// Wait for outstanding background cache writes.
  pub async fn settle(&self) {
    self.router.settle().await;
  }

  fn transition(&self, from: Phase, to: Phase, action: &'static str) -> Result<(), RouterError> {
    let mut result = Ok(());
    self.phase.send_if_modified(|current| {
      if *current == from {
        *current = to;
        true
      } else {
        result = Err(RouterError::InvalidTransition {
          phase: *current,
          action,
        });
        false
      }
    });
    if result.is_ok() {
      info!(generation = self.router.generation(), phase = ?to, "lifecycle");
    }
    result
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{ResponseSource, SqliteStorage};
  use crate::testing::{url, FakeOrigin, ORIGIN};

  fn worker(
    storage: &Arc<SqliteStorage>,
    origin: &Arc<FakeOrigin>,
    generation: &str,
    paths: &[&str],
  ) -> Worker<SqliteStorage, FakeOrigin> {
    let origin_url = Url::parse(ORIGIN).unwrap();
    let manifest = Manifest::resolve(&origin_url, paths).unwrap();
    let router = CacheRouter::new(Arc::clone(storage), Arc::clone(origin), generation);
    Worker::new(router, manifest, origin_url)
  }

  fn setup() -> (Arc<SqliteStorage>, Arc<FakeOrigin>) {
    (
      Arc::new(SqliteStorage::open_in_memory().unwrap()),
      Arc::new(FakeOrigin::with_shell()),
    )
  }

  #[tokio::test]
  async fn test_full_lifecycle() {
    let (storage, origin) = setup();
    let worker = worker(&storage, &origin, "v1", &["/index.html"]);
    assert_eq!(worker.phase(), Phase::New);

    worker.install().settled().await.unwrap();
    assert_eq!(worker.phase(), Phase::Waiting);

    worker.activate().settled().await.unwrap();
    assert_eq!(worker.phase(), Phase::Active);

    let response = worker.fetch(Request::get(url("/index.html"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_activate_before_install_is_rejected() {
    let (storage, origin) = setup();
    let worker = worker(&storage, &origin, "v1", &["/index.html"]);

    let result = worker.activate().settled().await;

    assert!(matches!(
      result,
      Err(RouterError::InvalidTransition {
        phase: Phase::New,
        ..
      })
    ));
    assert_eq!(worker.phase(), Phase::New);
  }

  #[tokio::test]
  async fn test_install_twice_is_rejected() {
    let (storage, origin) = setup();
    let worker = worker(&storage, &origin, "v1", &["/index.html"]);

    worker.install().settled().await.unwrap();
    let again = worker.install().settled().await;

    assert!(matches!(again, Err(RouterError::InvalidTransition { .. })));
    assert_eq!(worker.phase(), Phase::Waiting);
  }

  #[tokio::test]
  async fn test_failed_install_leaves_previous_generation_in_charge() {
    let (storage, origin) = setup();
    let v1 = worker(&storage, &origin, "v1", &["/index.html"]);
    v1.install().settled().await.unwrap();
    v1.activate().settled().await.unwrap();

    let v2 = worker(&storage, &origin, "v2", &["/index.html", "/gone.png"]);
    let result = v2.install().settled().await;

    assert!(matches!(result, Err(RouterError::InstallFailure { .. })));
    assert_eq!(v2.phase(), Phase::Redundant);
    assert!(matches!(
      v2.activate().settled().await,
      Err(RouterError::InvalidTransition { .. })
    ));
    assert_eq!(storage.generations().unwrap(), vec!["v1"]);
    let response = v1.fetch(Request::get(url("/index.html"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
  }

  #[tokio::test]
  async fn test_start_installs_and_activates() {
    let (storage, origin) = setup();
    let router = CacheRouter::new(Arc::clone(&storage), Arc::clone(&origin), "v1");
    let manifest = Manifest::resolve(&Url::parse(ORIGIN).unwrap(), &["/index.html"]).unwrap();

    let worker = Worker::start(router, manifest, Url::parse(ORIGIN).unwrap())
      .await
      .unwrap();

    assert_eq!(worker.phase(), Phase::Active);
    assert_eq!(storage.generations().unwrap(), vec!["v1"]);
  }

  #[tokio::test]
  async fn test_start_offline_upgrade_keeps_previous_generation() {
    let (storage, origin) = setup();
    let v1 = worker(&storage, &origin, "v1", &["/index.html"]);
    v1.install().settled().await.unwrap();
    v1.activate().settled().await.unwrap();
    origin.set_online(false);

    let router = CacheRouter::new(Arc::clone(&storage), Arc::clone(&origin), "v2");
    let manifest = Manifest::resolve(&Url::parse(ORIGIN).unwrap(), &["/index.html"]).unwrap();
    let worker = Worker::start(router, manifest, Url::parse(ORIGIN).unwrap())
      .await
      .unwrap();

    assert_eq!(worker.phase(), Phase::Active);
    assert_eq!(storage.generations().unwrap(), vec!["v1"]);
    let page = worker.fetch(Request::get(url("/index.html"))).await.unwrap();
    assert_eq!(page.source, ResponseSource::Cache);
    let prices = worker.fetch(Request::get(url("/check-prices"))).await.unwrap();
    assert_eq!(prices, Response::offline());
  }

  #[tokio::test]
  async fn test_start_with_nothing_stored_passes_through() {
    let (storage, origin) = setup();
    origin.set_online(false);

    let router = CacheRouter::new(Arc::clone(&storage), Arc::clone(&origin), "v1");
    let manifest = Manifest::resolve(&Url::parse(ORIGIN).unwrap(), &["/index.html"]).unwrap();
    let worker = Worker::start(router, manifest, Url::parse(ORIGIN).unwrap())
      .await
      .unwrap();

    assert_eq!(worker.phase(), Phase::Redundant);
    assert!(storage.generations().unwrap().is_empty());

    origin.set_online(true);
    let response = worker.fetch(Request::get(url("/style.css"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Network);
  }

  #[tokio::test]
  async fn test_uncontrolled_requests_bypass_store() {
    let (storage, origin) = setup();
    let worker = worker(&storage, &origin, "v1", &["/style.css"]);
    worker.install().settled().await.unwrap();
    let calls_after_install = origin.calls();

    let response = worker.fetch(Request::get(url("/style.css"))).await.unwrap();

    assert_eq!(response.source, ResponseSource::Network);
    assert_eq!(origin.calls(), calls_after_install + 1);
  }

  #[tokio::test]
  async fn test_uncontrolled_request_offline_is_network_error() {
    let (storage, origin) = setup();
    let worker = worker(&storage, &origin, "v1", &["/style.css"]);
    origin.set_online(false);

    let result = worker.fetch(Request::get(url("/style.css"))).await;
    assert!(matches!(result, Err(RouterError::Uncontrolled(_))));
  }

  #[tokio::test]
  async fn test_sync_check_prices() {
    let (storage, origin) = setup();
    let worker = worker(&storage, &origin, "v1", &["/index.html"]);
    worker.install().settled().await.unwrap();
    worker.activate().settled().await.unwrap();

    let response = worker.sync(CHECK_PRICES_TAG).await.unwrap().unwrap();
    assert_eq!(response.status, 200);

    origin.set_online(false);
    let offline = worker.sync(CHECK_PRICES_TAG).await.unwrap().unwrap();
    assert_eq!(offline, Response::offline());

    assert!(worker.sync("something-else").await.unwrap().is_none());
  }

  #[tokio::test]
  async fn test_resume_previously_active_generation() {
    let (storage, origin) = setup();
    let first = worker(&storage, &origin, "v1", &["/index.html"]);
    first.install().settled().await.unwrap();
    first.activate().settled().await.unwrap();

    let restarted = worker(&storage, &origin, "v1", &["/index.html"]);
    assert!(restarted.resume().unwrap());
    assert_eq!(restarted.phase(), Phase::Active);

    let calls = origin.calls();
    let response = restarted.fetch(Request::get(url("/index.html"))).await.unwrap();
    assert_eq!(response.source, ResponseSource::Cache);
    assert_eq!(origin.calls(), calls);
  }

  #[tokio::test]
  async fn test_resume_needs_sole_current_generation() {
    let (storage, origin) = setup();
    storage.open_generation("v1").unwrap();

    let upgraded = worker(&storage, &origin, "v2", &["/index.html"]);
    assert!(!upgraded.resume().unwrap());
    assert_eq!(upgraded.phase(), Phase::New);

    storage.open_generation("v2").unwrap();
    assert!(!upgraded.resume().unwrap());
  }
}
