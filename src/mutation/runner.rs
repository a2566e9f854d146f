//! Optimistic write protocol.
//!
//! Every optimistic mutation goes through three explicit phases:
//!
//! 1. [`MutationRunner::before_write`]: cancel fetches for the key, snapshot
//!    the entry, apply the patch to the cache
//! 2. the write itself (the only suspension point)
//! 3. [`MutationRunner::after_write`]: on success settle the entry according to
//!    its [`SettlePolicy`], on failure restore the snapshot and notify; the key
//!    is marked stale either way
//!
//! Phase 1 completes before the write is dispatched and phase 3 completes
//! before the error is handed back, so nobody can observe a half-applied or
//! half-rolled-back cache.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheEntry, QueryClient, QueryKey, Resource};
use crate::error::{ApiError, ErrorKind, ERROR_TOAST_DURATION};
use crate::notify::SharedNotifier;

type ApplyFn<T, P> = Box<dyn FnOnce(&mut T, &P) + Send>;
type ReplaceFn<T, R> = Box<dyn FnOnce(&mut T, &R) + Send>;
type RefetchFn = Box<dyn FnOnce() -> JoinHandle<()> + Send>;

/// What to do with the cache entry once the write succeeded.
pub enum SettlePolicy<T, R> {
  /// The optimistic value is what the server now holds.
  KeepOptimistic,
  /// Fold the server's response into the cached value.
  Replace(ReplaceFn<T, R>),
  /// Don't trust the local value: start a refetch of the key once the
  /// entry is marked stale. The closure spawns the fetch.
  Refetch(RefetchFn),
}

impl<T, R> SettlePolicy<T, R> {
  pub fn replace(f: impl FnOnce(&mut T, &R) + Send + 'static) -> Self {
    SettlePolicy::Replace(Box::new(f))
  }

  pub fn refetch(f: impl FnOnce() -> JoinHandle<()> + Send + 'static) -> Self {
    SettlePolicy::Refetch(Box::new(f))
  }
}

/// Everything phase 3 needs besides the outcome.
pub struct Settlement<T, R> {
  on_success: SettlePolicy<T, R>,
  error_message: Option<String>,
  success_message: Option<String>,
  invalidates: Vec<Resource>,
}

impl<T, R> Default for Settlement<T, R> {
  fn default() -> Self {
    Self {
      on_success: SettlePolicy::KeepOptimistic,
      error_message: None,
      success_message: None,
      invalidates: Vec::new(),
    }
  }
}

impl<T, R> Settlement<T, R> {
  pub fn new(on_success: SettlePolicy<T, R>) -> Self {
    Self {
      on_success,
      ..Self::default()
    }
  }

  pub fn with_error_message(mut self, message: impl Into<String>) -> Self {
    self.error_message = Some(message.into());
    self
  }

  pub fn with_invalidated(mut self, resource: Resource) -> Self {
    self.invalidates.push(resource);
    self
  }
}

/// A single optimistic write against one cache key.
pub struct OptimisticMutation<T, P, R> {
  key: QueryKey,
  patch: P,
  apply: ApplyFn<T, P>,
  settlement: Settlement<T, R>,
}

impl<T, P, R> OptimisticMutation<T, P, R> {
  /// `apply` is the pure merge of `patch` into the cached value.
  pub fn new(key: QueryKey, patch: P, apply: impl FnOnce(&mut T, &P) + Send + 'static) -> Self {
    Self {
      key,
      patch,
      apply: Box::new(apply),
      settlement: Settlement::default(),
    }
  }

  pub fn on_success(mut self, policy: SettlePolicy<T, R>) -> Self {
    self.settlement.on_success = policy;
    self
  }

  /// Toast shown when the write fails for a transport or authorization
  /// reason. Backend rejections are always shown verbatim.
  pub fn error_message(mut self, message: impl Into<String>) -> Self {
    self.settlement.error_message = Some(message.into());
    self
  }

  pub fn success_message(mut self, message: impl Into<String>) -> Self {
    self.settlement.success_message = Some(message.into());
    self
  }

  /// Also mark every cached key of `resource` stale once the write settles.
  pub fn invalidates(mut self, resource: Resource) -> Self {
    self.settlement.invalidates.push(resource);
    self
  }
}

/// State carried from before the write to after it.
///
/// Not `Clone`: consumed exactly once by `after_write`.
#[derive(Debug)]
pub struct OptimisticContext {
  key: QueryKey,
  previous: Option<CacheEntry<Value>>,
  patched: bool,
}

impl OptimisticContext {
  /// Whether the patch found a cached value to apply to.
  pub fn patched(&self) -> bool {
    self.patched
  }
}

/// Runs writes against the backend while keeping the cache consistent.
#[derive(Clone)]
pub struct MutationRunner {
  cache: QueryClient,
  notifier: SharedNotifier,
}

impl MutationRunner {
  pub fn new(cache: QueryClient, notifier: SharedNotifier) -> Self {
    Self { cache, notifier }
  }

  pub fn cache(&self) -> &QueryClient {
    &self.cache
  }

  pub fn notifier(&self) -> &SharedNotifier {
    &self.notifier
  }

  /// Phase 1: cancel pending fetches, snapshot, patch.
  pub fn before_write<T, P>(
    &self,
    key: &QueryKey,
    patch: &P,
    apply: impl FnOnce(&mut T, &P),
  ) -> OptimisticContext
  where
    T: Serialize + DeserializeOwned,
  {
    self.cache.cancel_queries(key);
    let previous = self.cache.snapshot(key);
    let patched = self
      .cache
      .patch_query_data::<T, _>(key, |value| apply(value, patch));
    if !patched {
      info!(key = %key, "nothing cached to patch optimistically");
    }
    OptimisticContext {
      key: key.clone(),
      previous,
      patched,
    }
  }

  /// Phase 3: settle or roll back, then mark the key (and any dependent
  /// resources) stale.
  pub fn after_write<T, R>(
    &self,
    context: OptimisticContext,
    outcome: &Result<R, ApiError>,
    settlement: Settlement<T, R>,
  ) where
    T: Serialize + DeserializeOwned,
  {
    let key = context.key.clone();
    let refetch = match outcome {
      Ok(result) => {
        let refetch = self.settle(context, settlement.on_success, result);
        info!(key = %key, "write confirmed");
        if let Some(message) = &settlement.success_message {
          self.notifier.success(message);
        }
        refetch
      }
      Err(error) => {
        self.roll_back(context, error, settlement.error_message.as_deref());
        None
      }
    };

    self.cache.invalidate_queries(&key);
    for resource in settlement.invalidates {
      self.cache.invalidate_resource(resource);
    }

    if let Some(refetch) = refetch {
      debug!(key = %key, "refetching after write");
      // detached; the cache records the result
      drop(refetch());
    }
  }

  fn roll_back(&self, context: OptimisticContext, error: &ApiError, fallback_message: Option<&str>) {
    if context.patched {
      self.cache.restore(&context.key, context.previous);
    }
    warn!(key = %context.key, error = %error, "write failed, rolled back");
    self.notify_failure(error, fallback_message);
  }

  fn notify_failure(&self, error: &ApiError, fallback_message: Option<&str>) {
    let message = match error.kind() {
      ErrorKind::Validation | ErrorKind::Conflict => error.user_message(),
      ErrorKind::Transient | ErrorKind::Authorization => fallback_message
        .map(String::from)
        .unwrap_or_else(|| error.user_message()),
    };
    self.notifier.error(&message, Some(ERROR_TOAST_DURATION));
  }

  /// Apply the success policy. A refetch is handed back so it starts only
  /// after the key has been marked stale.
  fn settle<T, R>(&self, context: OptimisticContext, policy: SettlePolicy<T, R>, result: &R) -> Option<RefetchFn>
  where
    T: Serialize + DeserializeOwned,
  {
    match policy {
      SettlePolicy::KeepOptimistic => None,
      SettlePolicy::Refetch(refetch) => Some(refetch),
      SettlePolicy::Replace(fold) => {
        if !self
          .cache
          .update_query_data::<T, _>(&context.key, |value| fold(value, result))
        {
          info!(key = %context.key, "entry gone before settle, skipping replace");
        }
        None
      }
    }
  }

  /// Run one optimistic mutation to completion.
  ///
  /// Never swallows the error: the cache is rolled back, the user notified,
  /// and the error returned.
  pub async fn run<T, P, R, W, Fut>(&self, mutation: OptimisticMutation<T, P, R>, write: W) -> Result<R, ApiError>
  where
    T: Serialize + DeserializeOwned,
    W: FnOnce(P) -> Fut,
    Fut: Future<Output = Result<R, ApiError>>,
  {
    let OptimisticMutation {
      key,
      patch,
      apply,
      settlement,
    } = mutation;

    let context = self.before_write(&key, &patch, apply);
    let outcome = write(patch).await;
    self.after_write(context, &outcome, settlement);
    outcome
  }

  /// Run a write that has nothing to show before the server answers
  /// (e.g. creating an order). Failures are notified and returned.
  pub async fn run_write<R, Fut>(
    &self,
    write: Fut,
    error_message: &str,
    invalidates: &[Resource],
  ) -> Result<R, ApiError>
  where
    Fut: Future<Output = Result<R, ApiError>>,
  {
    let outcome = write.await;
    if let Err(error) = &outcome {
      warn!(error = %error, "write failed");
      self.notify_failure(error, Some(error_message));
    }
    for resource in invalidates {
      self.cache.invalidate_resource(*resource);
    }
    outcome
  }
}
