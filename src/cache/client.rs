//! Key-addressed store of server resource snapshots.

use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::config::CacheConfig;
use crate::error::ApiError;

use super::entry::{CacheEntry, CacheResult};
use super::key::{QueryKey, Resource};

type SharedFetch = Shared<BoxFuture<'static, Result<Value, ApiError>>>;

/// What happened to a cache slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEventKind {
  /// A server-confirmed value was written (fetch or manual set)
  Updated,
  /// An optimistic guess was written ahead of a pending write
  Patched,
  /// A pre-patch snapshot was put back after a failed write
  Restored,
  /// The entry was marked for refetch
  Invalidated,
  /// The entry was dropped
  Removed,
}

#[derive(Debug, Clone)]
pub struct CacheEvent {
  pub kind: CacheEventKind,
  pub key: QueryKey,
}

/// Freshness settings for a [`QueryClient`].
#[derive(Debug, Clone)]
pub struct CacheOptions {
  pub stale_time: Duration,
  overrides: HashMap<Resource, Duration>,
}

impl CacheOptions {
  pub fn new(stale_time: Duration) -> Self {
    Self {
      stale_time,
      overrides: HashMap::new(),
    }
  }

  /// Use a different freshness window for one resource type.
  pub fn with_stale_time(mut self, resource: Resource, stale_time: Duration) -> Self {
    self.overrides.insert(resource, stale_time);
    self
  }

  fn stale_time_for(&self, resource: Resource) -> Duration {
    self
      .overrides
      .get(&resource)
      .copied()
      .unwrap_or(self.stale_time)
  }
}

impl From<&CacheConfig> for CacheOptions {
  fn from(config: &CacheConfig) -> Self {
    Self::new(config.stale_time()).with_stale_time(Resource::Menu, config.menu_stale_time())
  }
}

struct InFlight {
  id: u64,
  future: SharedFetch,
}

struct Slot {
  key: QueryKey,
  entry: Option<CacheEntry<Value>>,
  in_flight: Option<InFlight>,
  /// Fetches with an id below this were cancelled and may not write
  cancelled_below: u64,
}

impl Slot {
  fn new(key: QueryKey) -> Self {
    Self {
      key,
      entry: None,
      in_flight: None,
      cancelled_below: 0,
    }
  }
}

struct Inner {
  slots: Mutex<HashMap<String, Slot>>,
  next_fetch_id: AtomicU64,
  options: CacheOptions,
  events: broadcast::Sender<CacheEvent>,
}

/// Shared resource cache.
///
/// Values are held as JSON and read back through typed accessors. All reads
/// return immediately; only [`QueryClient::fetch_query`] touches the network,
/// and concurrent fetches of the same key share one request.
///
/// The lock is never held across an `.await`, so every operation is a single
/// uninterrupted step from the point of view of other tasks.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<Inner>,
}

impl QueryClient {
  pub fn new(options: CacheOptions) -> Self {
    let (events, _) = broadcast::channel(256);
    Self {
      inner: Arc::new(Inner {
        slots: Mutex::new(HashMap::new()),
        next_fetch_id: AtomicU64::new(1),
        options,
        events,
      }),
    }
  }

  fn lock(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
    self
      .inner
      .slots
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
  }

  fn emit(&self, kind: CacheEventKind, key: &QueryKey) {
    trace!(?kind, key = %key, "cache event");
    // No subscribers is fine
    let _ = self.inner.events.send(CacheEvent {
      kind,
      key: key.clone(),
    });
  }

  fn stale_time(&self, key: &QueryKey) -> Duration {
    self.inner.options.stale_time_for(key.resource())
  }

  /// Receive an event for every write, invalidation and removal.
  pub fn subscribe(&self) -> broadcast::Receiver<CacheEvent> {
    self.inner.events.subscribe()
  }

  /// Last known value for `key`, without touching the network.
  pub fn get_query_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
    self.get_entry(key).map(|entry| entry.value)
  }

  /// Last known value for `key` with its freshness metadata.
  pub fn get_entry<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<CacheEntry<T>> {
    let raw = self.snapshot(key)?;
    match serde_json::from_value(raw.value.clone()) {
      Ok(value) => Some(raw.map(|_| value)),
      Err(e) => {
        warn!(key = %key, error = %e, "cached value does not match requested type");
        None
      }
    }
  }

  /// Replace the value for `key`. The entry counts as freshly fetched.
  pub fn set_query_data<T: Serialize>(&self, key: &QueryKey, value: &T) {
    let value = match serde_json::to_value(value) {
      Ok(v) => v,
      Err(e) => {
        warn!(key = %key, error = %e, "failed to serialize value for cache");
        return;
      }
    };
    let stale_after = self.stale_time(key);
    {
      let mut slots = self.lock();
      let slot = slots
        .entry(key.cache_hash())
        .or_insert_with(|| Slot::new(key.clone()));
      slot.entry = Some(CacheEntry::new(value, stale_after));
    }
    self.emit(CacheEventKind::Updated, key);
  }

  /// Modify the cached value in place.
  ///
  /// Returns `false` (and does nothing) when there is no value for `key` or it
  /// does not decode as `T`.
  pub fn update_query_data<T, F>(&self, key: &QueryKey, f: F) -> bool
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
  {
    self.modify(key, CacheEventKind::Updated, f)
  }

  /// Like [`QueryClient::update_query_data`], but announced as
  /// [`CacheEventKind::Patched`] so listeners can tell an unconfirmed guess
  /// from server data.
  pub(crate) fn patch_query_data<T, F>(&self, key: &QueryKey, f: F) -> bool
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
  {
    self.modify(key, CacheEventKind::Patched, f)
  }

  fn modify<T, F>(&self, key: &QueryKey, kind: CacheEventKind, f: F) -> bool
  where
    T: Serialize + DeserializeOwned,
    F: FnOnce(&mut T),
  {
    let updated = {
      let mut slots = self.lock();
      let Some(entry) = slots
        .get_mut(&key.cache_hash())
        .and_then(|slot| slot.entry.as_mut())
      else {
        return false;
      };

      let mut typed: T = match serde_json::from_value(entry.value.clone()) {
        Ok(v) => v,
        Err(e) => {
          warn!(key = %key, error = %e, "cannot patch cached value of another type");
          return false;
        }
      };
      f(&mut typed);
      match serde_json::to_value(&typed) {
        Ok(value) => {
          entry.value = value;
          entry.fetched_at = chrono::Utc::now();
          entry.invalidated = false;
          true
        }
        Err(e) => {
          warn!(key = %key, error = %e, "failed to serialize patched value");
          false
        }
      }
    };
    if updated {
      self.emit(kind, key);
    }
    updated
  }

  /// Drop the entry for `key`. Any in-flight fetch for it may no longer write.
  pub fn remove_query(&self, key: &QueryKey) {
    let removed = {
      let mut slots = self.lock();
      let cutoff = self.inner.next_fetch_id.load(Ordering::SeqCst);
      match slots.get_mut(&key.cache_hash()) {
        Some(slot) => {
          slot.in_flight = None;
          slot.cancelled_below = cutoff;
          slot.entry.take().is_some()
        }
        None => false,
      }
    };
    if removed {
      self.emit(CacheEventKind::Removed, key);
    }
  }

  /// Mark `key` so its next read refetches. The value stays readable.
  pub fn invalidate_queries(&self, key: &QueryKey) {
    let invalidated = {
      let mut slots = self.lock();
      match slots
        .get_mut(&key.cache_hash())
        .and_then(|slot| slot.entry.as_mut())
      {
        Some(entry) => {
          entry.invalidated = true;
          true
        }
        None => false,
      }
    };
    if invalidated {
      debug!(key = %key, "invalidated");
      self.emit(CacheEventKind::Invalidated, key);
    }
  }

  /// Invalidate every cached key of one resource type.
  pub fn invalidate_resource(&self, resource: Resource) {
    let keys: Vec<QueryKey> = {
      let mut slots = self.lock();
      slots
        .values_mut()
        .filter(|slot| slot.key.resource() == resource)
        .filter_map(|slot| {
          let entry = slot.entry.as_mut()?;
          entry.invalidated = true;
          Some(slot.key.clone())
        })
        .collect()
    };
    debug!(resource = resource.as_str(), count = keys.len(), "invalidated resource");
    for key in &keys {
      self.emit(CacheEventKind::Invalidated, key);
    }
  }

  /// Missing entries count as stale.
  pub fn is_stale(&self, key: &QueryKey) -> bool {
    self
      .lock()
      .get(&key.cache_hash())
      .and_then(|slot| slot.entry.as_ref())
      .map(|entry| entry.is_stale())
      .unwrap_or(true)
  }

  pub fn is_fetching(&self, key: &QueryKey) -> bool {
    self
      .lock()
      .get(&key.cache_hash())
      .is_some_and(|slot| slot.in_flight.is_some())
  }

  /// Cancel pending fetches for `key`.
  ///
  /// Their requests may still complete, but the result is never written to
  /// the cache and callers awaiting them get the cached value instead.
  pub fn cancel_queries(&self, key: &QueryKey) {
    let mut slots = self.lock();
    let cutoff = self.inner.next_fetch_id.load(Ordering::SeqCst);
    let slot = slots
      .entry(key.cache_hash())
      .or_insert_with(|| Slot::new(key.clone()));
    if slot.in_flight.take().is_some() {
      debug!(key = %key, "cancelled in-flight fetch");
    }
    slot.cancelled_below = cutoff;
  }

  /// Raw copy of the entry, for verbatim restore later.
  pub(crate) fn snapshot(&self, key: &QueryKey) -> Option<CacheEntry<Value>> {
    self
      .lock()
      .get(&key.cache_hash())
      .and_then(|slot| slot.entry.clone())
  }

  /// Put back an entry captured with [`QueryClient::snapshot`]; `None`
  /// removes whatever is there now.
  pub(crate) fn restore(&self, key: &QueryKey, snapshot: Option<CacheEntry<Value>>) {
    let kind = {
      let mut slots = self.lock();
      let slot = slots
        .entry(key.cache_hash())
        .or_insert_with(|| Slot::new(key.clone()));
      let kind = if snapshot.is_some() {
        CacheEventKind::Restored
      } else {
        CacheEventKind::Removed
      };
      slot.entry = snapshot;
      kind
    };
    self.emit(kind, key);
  }

  /// Return the cached value if fresh, otherwise fetch it.
  ///
  /// 1. Fresh entry: returned immediately
  /// 2. A fetch for this key is already running: wait for that one
  /// 3. Otherwise run `fetcher` and store the result
  /// 4. On network failure, a stale entry is served instead (offline mode)
  pub async fn fetch_query<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    self.fetch_inner(key, false, fetcher).await
  }

  /// Fetch even if the cached value is fresh (still joins a running fetch).
  pub async fn refetch_query<T, F, Fut>(&self, key: &QueryKey, fetcher: F) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    self.fetch_inner(key, true, fetcher).await
  }

  /// Refetch `key` on a background task; failures are only logged.
  pub fn refetch_in_background<T, F, Fut>(&self, key: QueryKey, fetcher: F) -> JoinHandle<()>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let client = self.clone();
    tokio::spawn(async move {
      if let Err(e) = client.fetch_inner::<T, F, Fut>(&key, true, fetcher).await {
        warn!(key = %key, error = %e, "background refetch failed");
      }
    })
  }

  async fn fetch_inner<T, F, Fut>(&self, key: &QueryKey, force: bool, fetcher: F) -> Result<CacheResult<T>, ApiError>
  where
    T: Serialize + DeserializeOwned + Send + 'static,
    F: FnOnce() -> Fut + Send,
    Fut: Future<Output = Result<T, ApiError>> + Send + 'static,
  {
    let hash = key.cache_hash();

    let (fetch_id, future, fallback) = {
      let mut slots = self.lock();
      let slot = slots
        .entry(hash.clone())
        .or_insert_with(|| Slot::new(key.clone()));

      if let Some(entry) = slot.entry.as_ref().filter(|e| !force && !e.is_stale()) {
        let data = serde_json::from_value(entry.value.clone())?;
        return Ok(CacheResult::from_cache(data, entry.fetched_at));
      }

      let fallback = slot
        .entry
        .as_ref()
        .map(|entry| (entry.value.clone(), entry.fetched_at));

      let running = slot
        .in_flight
        .as_ref()
        .map(|in_flight| (in_flight.id, in_flight.future.clone()));

      match running {
        Some((id, future)) => {
          debug!(key = %key, "joining in-flight fetch");
          (id, future, fallback)
        }
        None => {
          let id = self.inner.next_fetch_id.fetch_add(1, Ordering::SeqCst);
          debug!(key = %key, fetch_id = id, "fetching {}", key.description());
          let request = fetcher();
          let future = async move {
            let data = request.await?;
            Ok::<Value, ApiError>(serde_json::to_value(data)?)
          }
          .boxed()
          .shared();
          slot.in_flight = Some(InFlight {
            id,
            future: future.clone(),
          });
          (id, future, fallback)
        }
      }
    };

    let outcome = future.await;
    let stale_after = self.stale_time(key);

    // Whoever finishes first writes; a cancelled fetch never does.
    let (wrote, current) = {
      let mut slots = self.lock();
      match slots.get_mut(&hash) {
        Some(slot) if fetch_id < slot.cancelled_below => {
          debug!(key = %key, fetch_id, "discarding result of cancelled fetch");
          (false, slot.entry.clone())
        }
        Some(slot) if slot.in_flight.as_ref().is_some_and(|f| f.id == fetch_id) => {
          slot.in_flight = None;
          match &outcome {
            Ok(value) => {
              slot.entry = Some(CacheEntry::new(value.clone(), stale_after));
              (true, None)
            }
            Err(_) => (false, None),
          }
        }
        _ => (false, None),
      }
    };

    if wrote {
      self.emit(CacheEventKind::Updated, key);
    }

    if let Some(current) = current {
      let data = serde_json::from_value(current.value)?;
      return Ok(CacheResult::from_cache(data, current.fetched_at));
    }

    match outcome {
      Ok(value) => Ok(CacheResult::from_network(serde_json::from_value(value)?)),
      Err(err) => match fallback {
        Some((value, fetched_at)) if err.is_retryable() => {
          warn!(key = %key, error = %err, "fetch failed, serving stale data");
          Ok(CacheResult::offline(serde_json::from_value(value)?, fetched_at))
        }
        _ => Err(err),
      },
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::CacheSource;
  use std::sync::atomic::AtomicU32;

  fn client() -> QueryClient {
    QueryClient::new(CacheOptions::new(Duration::from_secs(60)))
  }

  fn counting_fetcher(
    counter: Arc<AtomicU32>,
    value: u32,
    delay: Duration,
  ) -> impl FnOnce() -> BoxFuture<'static, Result<u32, ApiError>> {
    move || {
      async move {
        counter.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        Ok(value)
      }
      .boxed()
    }
  }

  #[tokio::test]
  async fn test_remove_query_drops_value_and_notifies_once() {
    let cache = client();
    let key = QueryKey::order("o1");
    cache.set_query_data(&key, &7u32);
    let mut events = cache.subscribe();

    cache.remove_query(&key);
    assert_eq!(cache.get_query_data::<u32>(&key), None);
    assert_eq!(events.recv().await.unwrap().kind, CacheEventKind::Removed);

    cache.remove_query(&key);
    assert!(events.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_fetch_then_serve_fresh_from_cache() {
    let cache = client();
    let key = QueryKey::order("o1");
    let calls = Arc::new(AtomicU32::new(0));

    let first = cache
      .fetch_query(&key, counting_fetcher(calls.clone(), 7, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(first.data, 7);
    assert_eq!(first.source, CacheSource::Network);

    let second = cache
      .fetch_query(&key, counting_fetcher(calls.clone(), 8, Duration::ZERO))
      .await
      .unwrap();
    assert_eq!(second.data, 7);
    assert_eq!(second.source, CacheSource::CacheFresh);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn test_concurrent_fetches_are_deduplicated() {
    let cache = client();
    let key = QueryKey::menu("r1");
    let calls = Arc::new(AtomicU32::new(0));

    let (a, b) = tokio::join!(
      cache.fetch_query(&key, counting_fetcher(calls.clone(), 1, Duration::from_millis(20))),
      cache.fetch_query(&key, counting_fetcher(calls.clone(), 2, Duration::from_millis(20))),
    );

    assert_eq!(a.unwrap().data, 1);
    assert_eq!(b.unwrap().data, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get_query_data::<u32>(&key), Some(1));
  }

  #[tokio::test]
  async fn test_cancelled_fetch_does_not_overwrite() {
    let cache = client();
    let key = QueryKey::order("o1");
    cache.set_query_data(&key, &1u32);
    cache.invalidate_queries(&key);

    let calls = Arc::new(AtomicU32::new(0));
    let background = cache.refetch_in_background(
      key.clone(),
      counting_fetcher(calls.clone(), 99, Duration::from_millis(30)),
    );
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(cache.is_fetching(&key));

    cache.cancel_queries(&key);
    cache.set_query_data(&key, &2u32);
    background.await.unwrap();

    assert_eq!(cache.get_query_data::<u32>(&key), Some(2));
    assert!(!cache.is_fetching(&key));
  }

  #[tokio::test]
  async fn test_failed_fetch_serves_stale_value() {
    let cache = QueryClient::new(CacheOptions::new(Duration::ZERO));
    let key = QueryKey::menu("r1");
    cache.set_query_data(&key, &5u32);

    let result = cache
      .fetch_query(&key, || async { Err::<u32, _>(ApiError::Network("down".to_string())) })
      .await
      .unwrap();
    assert_eq!(result.data, 5);
    assert_eq!(result.source, CacheSource::Offline);
    assert_eq!(cache.get_query_data::<u32>(&key), Some(5));
  }

  #[tokio::test]
  async fn test_failed_fetch_without_cache_is_error() {
    let cache = client();
    let key = QueryKey::menu("r1");
    let result = cache
      .fetch_query(&key, || async { Err::<u32, _>(ApiError::Network("down".to_string())) })
      .await;
    assert!(result.is_err());
    assert!(!cache.is_fetching(&key));
  }

  #[tokio::test]
  async fn test_invalidate_forces_refetch() {
    let cache = client();
    let key = QueryKey::order("o1");
    cache.set_query_data(&key, &1u32);
    assert!(!cache.is_stale(&key));

    cache.invalidate_queries(&key);
    assert!(cache.is_stale(&key));
    // Still readable while invalidated
    assert_eq!(cache.get_query_data::<u32>(&key), Some(1));

    let refreshed = cache
      .fetch_query(&key, || async { Ok::<u32, ApiError>(2) })
      .await
      .unwrap();
    assert_eq!(refreshed.data, 2);
    assert!(!cache.is_stale(&key));
  }

  #[tokio::test]
  async fn test_invalidate_resource_only_touches_that_resource() {
    let cache = client();
    let a = QueryKey::order("o1");
    let b = QueryKey::order("o2");
    let menu = QueryKey::menu("r1");
    for key in [&a, &b, &menu] {
      cache.set_query_data(key, &0u32);
    }

    let mut events = cache.subscribe();
    cache.invalidate_resource(Resource::Order);

    assert!(cache.is_stale(&a));
    assert!(cache.is_stale(&b));
    assert!(!cache.is_stale(&menu));
    let first = events.recv().await.unwrap();
    assert_eq!(first.kind, CacheEventKind::Invalidated);
    assert_eq!(first.key.resource(), Resource::Order);
  }

  #[test]
  fn test_update_and_restore() {
    let cache = client();
    let key = QueryKey::order("o1");
    assert!(!cache.update_query_data::<Vec<u32>, _>(&key, |v| v.push(1)));

    cache.set_query_data(&key, &vec![1u32]);
    let before = cache.snapshot(&key);
    assert!(cache.update_query_data::<Vec<u32>, _>(&key, |v| v.push(2)));
    assert_eq!(cache.get_query_data::<Vec<u32>>(&key), Some(vec![1, 2]));

    cache.restore(&key, before.clone());
    assert_eq!(cache.snapshot(&key), before);

    cache.restore(&key, None);
    assert_eq!(cache.get_query_data::<Vec<u32>>(&key), None);
  }

  #[test]
  fn test_guesses_and_rollbacks_are_told_apart_from_server_data() {
    let cache = client();
    let key = QueryKey::menu("r1");
    let mut events = cache.subscribe();

    cache.set_query_data(&key, &vec![1u32]);
    let before = cache.snapshot(&key);
    assert!(cache.patch_query_data::<Vec<u32>, _>(&key, |v| v.clear()));
    cache.restore(&key, before);
    assert!(cache.update_query_data::<Vec<u32>, _>(&key, |v| v.push(2)));

    let kinds: Vec<CacheEventKind> = std::iter::from_fn(|| events.try_recv().ok())
      .map(|event| event.kind)
      .collect();
    assert_eq!(
      kinds,
      vec![
        CacheEventKind::Updated,
        CacheEventKind::Patched,
        CacheEventKind::Restored,
        CacheEventKind::Updated,
      ]
    );
  }

  #[test]
  fn test_menu_override_stale_time() {
    let options = CacheOptions::new(Duration::from_secs(60)).with_stale_time(Resource::Menu, Duration::ZERO);
    let cache = QueryClient::new(options);
    cache.set_query_data(&QueryKey::menu("r1"), &1u32);
    cache.set_query_data(&QueryKey::order("o1"), &1u32);
    assert!(cache.is_stale(&QueryKey::menu("r1")));
    assert!(!cache.is_stale(&QueryKey::order("o1")));
  }
}
