use color_eyre::{eyre::eyre, Result};
use std::time::Duration;
use tracing::debug;

use crate::config::UpstreamConfig;
use crate::error::FetchError;

use super::types::{is_hop_by_hop, Request, Response};
use super::Fetch;

/// HTTP client for the app origin
#[derive(Clone)]
pub struct OriginClient {
  client: reqwest::Client,
}

impl OriginClient {
  pub fn new(config: &UpstreamConfig) -> Result<Self> {
    let mut builder = reqwest::Client::builder();
    if let Some(secs) = config.timeout_secs {
      builder = builder.timeout(Duration::from_secs(secs));
    }

    let client = builder
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client })
  }
}

impl Fetch for OriginClient {
  async fn fetch(&self, request: &Request) -> Result<Response, FetchError> {
    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone());

    for (name, value) in &request.headers {
      if !is_hop_by_hop(name) {
        builder = builder.header(name.as_str(), value.as_str());
      }
    }
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| FetchError::NetworkUnavailable(format!("{} {}: {}", request.method, request.url, e)))?;

    let status = response.status().as_u16();
    let headers: Vec<(String, String)> = response
      .headers()
      .iter()
      .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
      .filter_map(|(name, value)| {
        value
          .to_str()
          .ok()
          .map(|v| (name.as_str().to_string(), v.to_string()))
      })
      .collect();

    let body = response
      .bytes()
      .await
      .map_err(|e| FetchError::NetworkUnavailable(format!("Failed to read body of {}: {}", request.url, e)))?;

    debug!(url = %request.url, status, bytes = body.len(), "origin responded");

    Ok(Response::new(status, headers, body.to_vec()))
  }
}
