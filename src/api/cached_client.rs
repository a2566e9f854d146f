//! Backend reads routed through the resource cache.

use tokio::task::JoinHandle;

use crate::cache::{CacheResult, QueryClient, QueryKey};
use crate::error::ApiError;

use super::types::{MenuSnapshot, Order, OrderScope, OrderStatus};
use super::Backend;

/// Backend with transparent caching of reads.
///
/// Wraps any [`Backend`] and exposes the read side of it through the shared
/// [`QueryClient`], so every caller reading the same resource shares one
/// snapshot and one in-flight request.
#[derive(Clone)]
pub struct CachedBackend<B: Backend> {
  inner: B,
  cache: QueryClient,
}

impl<B: Backend> CachedBackend<B> {
  pub fn new(inner: B, cache: QueryClient) -> Self {
    Self { inner, cache }
  }

  pub fn inner(&self) -> &B {
    &self.inner
  }

  pub fn cache(&self) -> &QueryClient {
    &self.cache
  }

  /// Menu of a restaurant, from cache while fresh.
  pub async fn get_menu(&self, restaurant_id: &str) -> Result<CacheResult<MenuSnapshot>, ApiError> {
    let key = QueryKey::menu(restaurant_id);
    self.cache.fetch_query(&key, self.menu_fetcher(restaurant_id)).await
  }

  /// Menu of a restaurant, always asking the backend.
  pub async fn refetch_menu(&self, restaurant_id: &str) -> Result<CacheResult<MenuSnapshot>, ApiError> {
    let key = QueryKey::menu(restaurant_id);
    self.cache.refetch_query(&key, self.menu_fetcher(restaurant_id)).await
  }

  fn menu_fetcher(
    &self,
    restaurant_id: &str,
  ) -> impl FnOnce() -> BoxedRead<MenuSnapshot> + Send + 'static {
    let inner = self.inner.clone();
    let restaurant_id = restaurant_id.to_string();
    move || Box::pin(async move { inner.get_menu(&restaurant_id).await })
  }

  /// A single order, from cache while fresh.
  pub async fn get_order(&self, order_id: &str) -> Result<CacheResult<Order>, ApiError> {
    let key = QueryKey::order(order_id);
    let inner = self.inner.clone();
    let order_id = order_id.to_string();
    self
      .cache
      .fetch_query(&key, move || async move { inner.get_order(&order_id).await })
      .await
  }

  /// Orders in `scope`, narrowed to one status if given. The backend lists
  /// the whole scope; the status filter is applied here and cached under its
  /// own key.
  pub async fn list_orders(
    &self,
    scope: &OrderScope,
    status: Option<OrderStatus>,
  ) -> Result<CacheResult<Vec<Order>>, ApiError> {
    let key = QueryKey::orders(scope.clone(), status);
    let inner = self.inner.clone();
    let scope = scope.clone();
    self
      .cache
      .fetch_query(&key, move || async move {
        let orders = inner.list_orders(&scope).await?;
        Ok(match status {
          Some(wanted) => orders.into_iter().filter(|o| o.status == wanted).collect(),
          None => orders,
        })
      })
      .await
  }

  /// Refresh an order without waiting for it.
  pub fn refetch_order_in_background(&self, order_id: &str) -> JoinHandle<()> {
    let inner = self.inner.clone();
    let id = order_id.to_string();
    self
      .cache
      .refetch_in_background(QueryKey::order(order_id), move || async move {
        inner.get_order(&id).await
      })
  }
}

type BoxedRead<T> =
  std::pin::Pin<Box<dyn std::future::Future<Output = Result<T, ApiError>> + Send + 'static>>;
