//! Cache entries and fetch results.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// One snapshot of a server resource.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry<V> {
  pub value: V,
  /// When the value was last written (fetch or optimistic patch)
  pub fetched_at: DateTime<Utc>,
  /// Freshness window
  pub stale_after: Duration,
  /// Explicitly invalidated; the next read refetches regardless of age
  pub invalidated: bool,
}

impl<V> CacheEntry<V> {
  pub fn new(value: V, stale_after: Duration) -> Self {
    Self {
      value,
      fetched_at: Utc::now(),
      stale_after,
      invalidated: false,
    }
  }

  pub fn is_stale(&self) -> bool {
    if self.invalidated {
      return true;
    }
    let age = Utc::now() - self.fetched_at;
    match chrono::Duration::from_std(self.stale_after) {
      Ok(window) => age >= window,
      // A window too large to represent never expires
      Err(_) => false,
    }
  }

  pub fn map<U>(self, f: impl FnOnce(V) -> U) -> CacheEntry<U> {
    CacheEntry {
      value: f(self.value),
      fetched_at: self.fetched_at,
      stale_after: self.stale_after,
      invalidated: self.invalidated,
    }
  }
}

/// Result of a cache read, including where the data came from.
#[derive(Debug, Clone)]
pub struct CacheResult<T> {
  pub data: T,
  pub source: CacheSource,
  /// When the returned data was fetched
  pub fetched_at: Option<DateTime<Utc>>,
}

impl<T> CacheResult<T> {
  pub fn from_network(data: T) -> Self {
    Self {
      data,
      source: CacheSource::Network,
      fetched_at: Some(Utc::now()),
    }
  }

  pub fn from_cache(data: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::CacheFresh,
      fetched_at: Some(fetched_at),
    }
  }

  /// Network failed; serving the stale value we already had.
  pub fn offline(data: T, fetched_at: DateTime<Utc>) -> Self {
    Self {
      data,
      source: CacheSource::Offline,
      fetched_at: Some(fetched_at),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
  /// Fresh data from network
  Network,
  /// Data from cache, still considered fresh
  CacheFresh,
  /// Network unavailable, serving stale cached data
  Offline,
}
