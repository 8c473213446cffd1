//! In-process stand-in for the app origin.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::error::FetchError;
use crate::origin::{Fetch, Request, Response};

pub const ORIGIN: &str = "http://fuel.test";

pub fn url(path: &str) -> url::Url {
  url::Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Serves canned responses by path (query included), counts every call and
/// remembers every URL asked for.
pub struct FakeOrigin {
  responses: Mutex<HashMap<String, Response>>,
  requested: Mutex<Vec<url::Url>>,
  online: AtomicBool,
  calls: AtomicUsize,
}

impl FakeOrigin {
  pub fn new() -> Self {
    Self {
      responses: Mutex::new(HashMap::new()),
      requested: Mutex::new(Vec::new()),
      online: AtomicBool::new(true),
      calls: AtomicUsize::new(0),
    }
  }

  /// The app shell plus a live price endpoint.
  pub fn with_shell() -> Self {
    Self::new()
      .with("/", 200, "<html>root</html>")
      .with("/index.html", 200, "<html>index</html>")
      .with("/style.css", 200, "body{}")
      .with("/app.js", 200, "console.log(1)")
      .with("/check-prices", 200, "{\"cheapest\":1.659}")
  }

  pub fn with(self, path: &str, status: u16, body: &str) -> Self {
    self.set(path, status, body);
    self
  }

  pub fn set(&self, path: &str, status: u16, body: &str) {
    let response = Response::new(
      status,
      vec![("content-type".to_string(), "text/plain".to_string())],
      body.as_bytes().to_vec(),
    );
    self
      .responses
      .lock()
      .unwrap()
      .insert(path.to_string(), response);
  }

  pub fn set_online(&self, online: bool) {
    self.online.store(online, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn requested(&self) -> Vec<url::Url> {
    self.requested.lock().unwrap().clone()
  }
}

impl Fetch for FakeOrigin {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    self.requested.lock().unwrap().push(request.url.clone());
    if !self.online.load(Ordering::SeqCst) {
      return Err(FetchError::NetworkUnavailable("offline".to_string()));
    }

    let path = match request.url.query() {
      Some(q) => format!("{}?{}", request.url.path(), q),
      None => request.url.path().to_string(),
    };
    let response = self.responses.lock().unwrap().get(&path).cloned();
    Ok(response.unwrap_or_else(|| Response::new(404, Vec::new(), b"not found".to_vec())))
  }
}
