//! Push delivery: payload to notification, notification click to client.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

const DEFAULT_TITLE: &str = "L8teFuel Alert";
const DEFAULT_BODY: &str = "Günstige Tankstelle gefunden!";
const ICON: &str = "/icons/icon-512.png";
const BADGE: &str = "/icons/icon-192.png";

/// Payload sent by the backend with a push message. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushPayload {
  pub title: Option<String>,
  pub body: Option<String>,
  pub url: Option<String>,
  pub data: Option<Value>,
}

impl PushPayload {
  /// Decode the raw push data. A message without data, or with data that is
  /// not a JSON object, still produces the default notification.
  pub fn from_bytes(data: Option<&[u8]>) -> Self {
    let Some(bytes) = data else {
      return Self::default();
    };
    match serde_json::from_slice(bytes) {
      Ok(payload) => payload,
      Err(e) => {
        warn!(error = %e, "undecodable push payload, using defaults");
        Self::default()
      }
    }
  }
}

/// Notification surfaced to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  /// Where a click takes the user
  pub url: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub data: Option<Value>,
}

impl From<PushPayload> for Notification {
  fn from(payload: PushPayload) -> Self {
    Self {
      title: payload.title.unwrap_or_else(|| DEFAULT_TITLE.to_string()),
      body: payload.body.unwrap_or_else(|| DEFAULT_BODY.to_string()),
      icon: ICON.to_string(),
      badge: BADGE.to_string(),
      url: payload.url.unwrap_or_else(|| "/".to_string()),
      data: payload.data,
    }
  }
}

/// An open window of the app.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientContext {
  pub id: u64,
  pub url: Url,
  pub focused: bool,
}

/// What a notification click did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClickOutcome {
  /// An existing client already showed the target and was focused
  Focused(u64),
  /// A new client was opened at the target
  Opened(u64),
}

/// Open clients of one origin.
#[derive(Debug)]
pub struct Clients {
  origin: Url,
  clients: Vec<ClientContext>,
  next_id: u64,
}

impl Clients {
  pub fn new(origin: Url) -> Self {
    Self {
      origin,
      clients: Vec::new(),
      next_id: 1,
    }
  }

  /// Open a new focused client at `url`.
  pub fn open(&mut self, url: Url) -> u64 {
    let id = self.next_id;
    self.next_id += 1;
    for client in &mut self.clients {
      client.focused = false;
    }
    self.clients.push(ClientContext {
      id,
      url,
      focused: true,
    });
    id
  }

  #[cfg(test)]
  pub fn get(&self, id: u64) -> Option<&ClientContext> {
    self.clients.iter().find(|c| c.id == id)
  }

  #[cfg(test)]
  pub fn len(&self) -> usize {
    self.clients.len()
  }

  /// Focus a client already showing the notification target, or open one.
  pub fn notification_click(&mut self, notification: &Notification) -> Result<ClickOutcome> {
    let mut target = self
      .origin
      .join(&notification.url)
      .map_err(|e| eyre!("Invalid notification url '{}': {}", notification.url, e))?;
    target.set_fragment(None);

    let existing = self
      .clients
      .iter()
      .find(|c| {
        let mut url = c.url.clone();
        url.set_fragment(None);
        url == target
      })
      .map(|c| c.id);

    match existing {
      Some(id) => {
        for client in &mut self.clients {
          client.focused = client.id == id;
        }
        info!(client = id, url = %target, "focused client");
        Ok(ClickOutcome::Focused(id))
      }
      None => {
        let id = self.open(target.clone());
        info!(client = id, url = %target, "opened client");
        Ok(ClickOutcome::Opened(id))
      }
    }
  }
}
