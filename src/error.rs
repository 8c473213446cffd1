//! Failure taxonomy of the router.
//!
//! Cache misses and unreadable snapshots are not errors: both fall through to
//! the network. Live network failures never surface here either, they are
//! converted into a structured offline response.

use thiserror::Error;

use crate::worker::Phase;

/// A network fetch did not produce any HTTP response.
#[derive(Debug, Error)]
pub enum FetchError {
  #[error("network unavailable: {0}")]
  NetworkUnavailable(String),
}

#[derive(Debug, Error)]
pub enum RouterError {
  /// A manifest resource could not be fetched or stored. The previous
  /// generation stays in charge.
  #[error("install of generation '{generation}' failed: {reason}")]
  InstallFailure { generation: String, reason: String },

  /// Removing superseded generations failed.
  #[error("activation of generation '{generation}' failed: {reason}")]
  ActivationFailure { generation: String, reason: String },

  /// Cacheable request, nothing stored, network down and no fallback document.
  #[error("no response available for {url}")]
  NoFallbackAvailable { url: String },

  /// Request issued while the worker does not control its clients.
  #[error(transparent)]
  Uncontrolled(#[from] FetchError),

  #[error("cannot {action} while {phase:?}")]
  InvalidTransition { phase: Phase, action: &'static str },

  #[error("lifecycle task did not complete: {0}")]
  Aborted(String),

  #[error("invalid url: {0}")]
  InvalidUrl(#[from] url::ParseError),
}
