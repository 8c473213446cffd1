//! Generation-scoped response store and the router that sits on top of it.
//!
//! This module provides the offline caching mechanism that:
//! - Pre-fills a generation with the app shell at install time
//! - Serves cacheable requests cache-first and stores misses in the background
//! - Sends live requests to the network and answers for them while offline
//! - Drops every generation but the current one on activation

mod manifest;
mod router;
mod storage;
mod traits;

pub use manifest::{Manifest, DEFAULT_ASSETS};
pub use router::CacheRouter;
pub use storage::{CacheStorage, SqliteStorage};
pub use traits::{RequestKey, ResponseSource};
