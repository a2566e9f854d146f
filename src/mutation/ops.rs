//! The writes the app actually performs.

use std::sync::Arc;
use tracing::info;

use crate::api::{
  Backend, CachedBackend, CreateOrderRequest, MenuItem, MenuItemPatch, MenuSnapshot, Money, Order,
  OrderStatus, PromoValidation,
};
use crate::cache::{normalize_code, QueryKey, Resource};
use crate::cart::{CartStore, CartSync, CheckoutError};
use crate::error::{ApiError, ERROR_TOAST_DURATION};

use super::runner::{MutationRunner, OptimisticMutation, SettlePolicy};
use super::state::TrackedMutation;

/// Domain mutations over one backend.
#[derive(Clone)]
pub struct Mutations<B: Backend> {
  backend: CachedBackend<B>,
  runner: MutationRunner,
  availability: Arc<TrackedMutation<MenuItem>>,
  order_status: Arc<TrackedMutation<Order>>,
  accept: Arc<TrackedMutation<Order>>,
  place: Arc<TrackedMutation<Order>>,
}

impl<B: Backend> Mutations<B> {
  pub fn new(backend: CachedBackend<B>, runner: MutationRunner) -> Self {
    Self {
      backend,
      runner,
      availability: Arc::default(),
      order_status: Arc::default(),
      accept: Arc::default(),
      place: Arc::default(),
    }
  }

  pub fn runner(&self) -> &MutationRunner {
    &self.runner
  }

  pub fn availability(&self) -> &TrackedMutation<MenuItem> {
    &self.availability
  }

  pub fn order_status(&self) -> &TrackedMutation<Order> {
    &self.order_status
  }

  pub fn accept(&self) -> &TrackedMutation<Order> {
    &self.accept
  }

  pub fn place(&self) -> &TrackedMutation<Order> {
    &self.place
  }

  /// Restaurant toggles whether an item can be ordered.
  pub async fn set_item_availability(
    &self,
    restaurant_id: &str,
    item_id: &str,
    available: bool,
  ) -> Result<MenuItem, ApiError> {
    let target = item_id.to_string();
    let mutation = OptimisticMutation::new(
      QueryKey::menu(restaurant_id),
      MenuItemPatch::availability(available),
      move |menu: &mut MenuSnapshot, patch: &MenuItemPatch| {
        if let Some(item) = menu.find_mut(&target) {
          patch.apply_to(item);
        }
      },
    )
    .error_message("Failed to update item availability")
    .success_message(if available {
      "Item marked as available"
    } else {
      "Item marked as unavailable"
    });

    let backend = self.backend.inner().clone();
    let (restaurant_id, item_id) = (restaurant_id.to_string(), item_id.to_string());
    self
      .availability
      .mutate(self.runner.run(mutation, move |patch| async move {
        backend
          .update_menu_item(&restaurant_id, &item_id, &patch)
          .await
      }))
      .await
  }

  /// Edit name, price or availability of a menu item. The server's copy of
  /// the item replaces the optimistic one.
  pub async fn update_menu_item(
    &self,
    restaurant_id: &str,
    item_id: &str,
    patch: MenuItemPatch,
  ) -> Result<MenuItem, ApiError> {
    let target = item_id.to_string();
    let mutation = OptimisticMutation::new(
      QueryKey::menu(restaurant_id),
      patch,
      move |menu: &mut MenuSnapshot, patch: &MenuItemPatch| {
        if let Some(item) = menu.find_mut(&target) {
          patch.apply_to(item);
        }
      },
    )
    .on_success(SettlePolicy::replace(|menu: &mut MenuSnapshot, server: &MenuItem| {
      if let Some(item) = menu.find_mut(&server.item_id) {
        *item = server.clone();
      }
    }))
    .error_message("Failed to update menu item")
    .success_message("Menu item updated");

    let backend = self.backend.inner().clone();
    let (restaurant_id, item_id) = (restaurant_id.to_string(), item_id.to_string());
    self
      .runner
      .run(mutation, move |patch| async move {
        backend
          .update_menu_item(&restaurant_id, &item_id, &patch)
          .await
      })
      .await
  }

  /// Restaurant or driver moves an order along. Status changes feed other
  /// screens, so the order is refetched and every order list goes stale.
  pub async fn update_order_status(
    &self,
    order_id: &str,
    status: OrderStatus,
  ) -> Result<Order, ApiError> {
    let backend = self.backend.clone();
    let refetch_id = order_id.to_string();
    let mutation = OptimisticMutation::new(
      QueryKey::order(order_id),
      status,
      |order: &mut Order, status: &OrderStatus| order.status = *status,
    )
    .on_success(SettlePolicy::refetch(move || {
      backend.refetch_order_in_background(&refetch_id)
    }))
    .invalidates(Resource::Orders)
    .error_message("Failed to update order status")
    .success_message(format!("Order status: {}", status.label()));

    let backend = self.backend.inner().clone();
    let id = order_id.to_string();
    self
      .order_status
      .mutate(self.runner.run(mutation, move |status| async move {
        backend.update_order_status(&id, status).await
      }))
      .await
  }

  /// Driver claims an order. Losing the race to another driver comes back
  /// as a conflict whose message is shown as is.
  pub async fn accept_order(&self, order_id: &str) -> Result<Order, ApiError> {
    let mutation = OptimisticMutation::new(
      QueryKey::order(order_id),
      OrderStatus::DriverAssigned,
      |order: &mut Order, status: &OrderStatus| order.status = *status,
    )
    .on_success(SettlePolicy::replace(|order: &mut Order, server: &Order| {
      *order = server.clone()
    }))
    .invalidates(Resource::Orders)
    .error_message("Failed to accept order")
    .success_message("Order accepted");

    let backend = self.backend.inner().clone();
    let id = order_id.to_string();
    self
      .accept
      .mutate(self.runner.run(mutation, move |_| async move {
        backend.accept_order(&id).await
      }))
      .await
  }

  /// Create the order. Nothing is shown optimistically; on success the new
  /// order is seeded into the cache and the cart emptied.
  pub async fn place_order(
    &self,
    request: CreateOrderRequest,
    cart: &CartStore,
  ) -> Result<Order, ApiError> {
    let backend = self.backend.inner().clone();
    let order = self
      .place
      .mutate(self.runner.run_write(
        async move { backend.create_order(&request).await },
        "Failed to place order",
        &[Resource::Orders],
      ))
      .await?;

    info!(order = %order.id, total = %order.total, "order placed");
    self
      .runner
      .cache()
      .set_query_data(&QueryKey::order(order.id.as_str()), &order);
    cart.clear();
    self.runner.notifier().success("Order placed!");
    Ok(order)
  }

  /// Check a promo code against a subtotal. An invalid code is not an
  /// error: it comes back with `valid == false` and the backend's reason is
  /// shown as a warning.
  pub async fn validate_promo(&self, code: &str, subtotal: Money) -> Result<PromoValidation, ApiError> {
    let key = QueryKey::promo(code, subtotal);
    let (backend, code) = (self.backend.inner().clone(), normalize_code(code));

    let notifier = self.runner.notifier();
    match self
      .runner
      .cache()
      .fetch_query(&key, move || async move {
        backend.validate_promo(&code, subtotal).await
      })
      .await
    {
      Ok(result) => {
        let promo: PromoValidation = result.data;
        if promo.valid {
          notifier.success(&format!("Promo applied: {} off", promo.discount_amount));
        } else {
          notifier.warning(promo.message.as_deref().unwrap_or("Invalid promo code"));
        }
        Ok(promo)
      }
      Err(e) => {
        notifier.error(&e.user_message(), Some(ERROR_TOAST_DURATION));
        Err(e)
      }
    }
  }

  /// Full checkout: re-validate the cart against a fresh menu, check the
  /// promo code if there is one, then place the order.
  pub async fn checkout(
    &self,
    sync: &CartSync<B>,
    delivery_address: &str,
    promo_code: Option<&str>,
  ) -> Result<Order, CheckoutError> {
    let state = sync.prepare_checkout().await?;
    let restaurant_id = state.restaurant_id.clone().ok_or(CheckoutError::EmptyCart)?;

    if let Some(code) = promo_code {
      let promo = self.validate_promo(code, state.subtotal()).await?;
      if !promo.valid {
        return Err(CheckoutError::InvalidPromo(
          promo
            .message
            .unwrap_or_else(|| "Invalid promo code".to_string()),
        ));
      }
    }

    let request = CreateOrderRequest {
      restaurant_id,
      items: state.order_lines(),
      delivery_address: delivery_address.to_string(),
      promo_code: promo_code.map(normalize_code),
    };
    Ok(self.place_order(request, sync.cart()).await?)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::testing::FakeBackend;
  use crate::cache::{CacheOptions, QueryClient};
  use crate::notify::{NotificationLevel, RecordingNotifier};
  use chrono::Utc;
  use std::time::Duration;

  fn menu() -> MenuSnapshot {
    MenuSnapshot {
      restaurant_id: "r1".to_string(),
      restaurant_name: Some("Thai Corner".to_string()),
      items: vec![
        MenuItem {
          item_id: "X".to_string(),
          name: "Pad Thai".to_string(),
          price: Money::from_cents(1000),
          is_available: true,
          description: None,
          category: None,
          image: None,
        },
        MenuItem {
          item_id: "Y".to_string(),
          name: "Green Curry".to_string(),
          price: Money::from_cents(1200),
          is_available: true,
          description: None,
          category: None,
          image: None,
        },
      ],
    }
  }

  fn order(id: &str, status: OrderStatus) -> Order {
    Order {
      id: id.to_string(),
      restaurant_id: "r1".to_string(),
      status,
      items: vec![],
      total: Money::from_cents(2200),
      driver_info: None,
      driver_location: None,
      estimated_arrival: None,
      updated_at: Utc::now(),
    }
  }

  struct Harness {
    backend: FakeBackend,
    mutations: Mutations<FakeBackend>,
    cache: QueryClient,
    notifier: Arc<RecordingNotifier>,
  }

  fn harness(backend: FakeBackend) -> Harness {
    let cache = QueryClient::new(CacheOptions::new(Duration::from_secs(60)));
    let notifier = RecordingNotifier::new();
    let runner = MutationRunner::new(cache.clone(), notifier.clone());
    let mutations = Mutations::new(CachedBackend::new(backend.clone(), cache.clone()), runner);
    Harness {
      backend,
      mutations,
      cache,
      notifier,
    }
  }

  fn cached_item(cache: &QueryClient, item_id: &str) -> MenuItem {
    cache
      .get_query_data::<MenuSnapshot>(&QueryKey::menu("r1"))
      .and_then(|m| m.find(item_id).cloned())
      .unwrap()
  }

  #[tokio::test]
  async fn test_availability_patch_survives_success() {
    let h = harness(FakeBackend::new().with_menu(menu()));
    h.cache.set_query_data(&QueryKey::menu("r1"), &menu());
    h.backend.set_write_delay(Duration::from_millis(30));

    let mutations = h.mutations.clone();
    let write = tokio::spawn(async move { mutations.set_item_availability("r1", "X", false).await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!cached_item(&h.cache, "X").is_available);
    assert!(h.mutations.availability().is_pending());

    write.await.unwrap().unwrap();
    assert!(!cached_item(&h.cache, "X").is_available);
    assert!(cached_item(&h.cache, "Y").is_available);
    assert!(h.mutations.availability().state().is_success());
  }

  #[tokio::test]
  async fn test_availability_rolls_back_on_failure() {
    let h = harness(FakeBackend::new().with_menu(menu()));
    h.cache.set_query_data(&QueryKey::menu("r1"), &menu());
    h.backend
      .fail_next_write(ApiError::from_status(400, "Update failed"));

    let result = h.mutations.set_item_availability("r1", "X", false).await;

    assert!(result.is_err());
    assert!(cached_item(&h.cache, "X").is_available);
    assert!(h.mutations.availability().is_error());
    assert_eq!(
      h.notifier.messages(NotificationLevel::Error),
      vec!["Update failed"]
    );
  }

  #[tokio::test]
  async fn test_menu_item_replaced_with_server_copy() {
    let h = harness(FakeBackend::new().with_menu(menu()));
    h.cache.set_query_data(&QueryKey::menu("r1"), &menu());

    let patch = MenuItemPatch {
      price: Some(Money::from_cents(1150)),
      ..Default::default()
    };
    let server = h.mutations.update_menu_item("r1", "X", patch).await.unwrap();

    assert_eq!(server.price, Money::from_cents(1150));
    assert_eq!(cached_item(&h.cache, "X"), server);
  }

  #[tokio::test]
  async fn test_accept_conflict_shows_backend_message() {
    let h = harness(FakeBackend::new().with_order(order("o1", OrderStatus::ReadyForPickup)));
    h.cache
      .set_query_data(&QueryKey::order("o1"), &order("o1", OrderStatus::ReadyForPickup));
    h.backend.fail_next_write(ApiError::from_status(
      409,
      "Order already accepted by another driver",
    ));

    let err = h.mutations.accept_order("o1").await.unwrap_err();

    assert!(matches!(err, ApiError::Conflict(_)));
    let cached: Order = h.cache.get_query_data(&QueryKey::order("o1")).unwrap();
    assert_eq!(cached.status, OrderStatus::ReadyForPickup);
    assert_eq!(
      h.notifier.messages(NotificationLevel::Error),
      vec!["Order already accepted by another driver"]
    );
  }

  #[tokio::test]
  async fn test_accept_success_takes_server_order() {
    let h = harness(FakeBackend::new().with_order(order("o1", OrderStatus::ReadyForPickup)));
    h.cache
      .set_query_data(&QueryKey::order("o1"), &order("o1", OrderStatus::ReadyForPickup));

    let accepted = h.mutations.accept_order("o1").await.unwrap();

    let cached: Order = h.cache.get_query_data(&QueryKey::order("o1")).unwrap();
    assert_eq!(cached, accepted);
    assert_eq!(cached.status, OrderStatus::DriverAssigned);
  }

  #[tokio::test]
  async fn test_status_update_invalidates_lists() {
    let h = harness(FakeBackend::new().with_order(order("o1", OrderStatus::Confirmed)));
    let list_key = QueryKey::orders(crate::api::OrderScope::Customer, None);
    h.cache
      .set_query_data(&list_key, &vec![order("o1", OrderStatus::Confirmed)]);
    h.cache
      .set_query_data(&QueryKey::order("o1"), &order("o1", OrderStatus::Confirmed));

    h.mutations
      .update_order_status("o1", OrderStatus::Preparing)
      .await
      .unwrap();

    assert!(h.cache.is_stale(&list_key));
    let cached: Order = h.cache.get_query_data(&QueryKey::order("o1")).unwrap();
    assert_eq!(cached.status, OrderStatus::Preparing);
  }

  #[tokio::test]
  async fn test_checkout_places_order_and_clears_cart() {
    let h = harness(
      FakeBackend::new()
        .with_menu(menu())
        .with_promo("SAVE5", Money::from_cents(500)),
    );
    let sync = CartSync::new(
      CartStore::in_memory(),
      CachedBackend::new(h.backend.clone(), h.cache.clone()),
      h.notifier.clone(),
    );
    sync.cart().add_item("r1", None, &menu().items[0], 2);

    let order = h
      .mutations
      .checkout(&sync, "1 Main St", Some(" save5 "))
      .await
      .unwrap();

    assert_eq!(order.total, Money::from_cents(2000));
    assert!(sync.cart().get_state().is_empty());
    assert_eq!(
      h.cache.get_query_data::<Order>(&QueryKey::order(order.id.as_str())),
      Some(order)
    );
    assert!(h
      .notifier
      .messages(NotificationLevel::Success)
      .contains(&"Order placed!".to_string()));
  }

  #[tokio::test]
  async fn test_invalid_promo_blocks_checkout_and_keeps_cart() {
    let h = harness(FakeBackend::new().with_menu(menu()));
    let sync = CartSync::new(
      CartStore::in_memory(),
      CachedBackend::new(h.backend.clone(), h.cache.clone()),
      h.notifier.clone(),
    );
    sync.cart().add_item("r1", None, &menu().items[0], 1);

    let err = h
      .mutations
      .checkout(&sync, "1 Main St", Some("BOGUS"))
      .await
      .unwrap_err();

    assert!(matches!(err, CheckoutError::InvalidPromo(ref m) if m == "Invalid promo code"));
    assert_eq!(sync.cart().get_state().lines.len(), 1);
    assert_eq!(
      h.notifier.messages(NotificationLevel::Warning),
      vec!["Invalid promo code"]
    );
  }

  #[tokio::test]
  async fn test_failed_order_keeps_cart() {
    let h = harness(FakeBackend::new().with_menu(menu()));
    let cart = CartStore::in_memory();
    cart.add_item("r1", None, &menu().items[0], 1);
    h.backend
      .fail_next_write(ApiError::Network("connection reset".to_string()));

    let request = CreateOrderRequest {
      restaurant_id: "r1".to_string(),
      items: cart.get_state().order_lines(),
      delivery_address: "1 Main St".to_string(),
      promo_code: None,
    };
    assert!(h.mutations.place_order(request, &cart).await.is_err());
    assert!(h.mutations.place().is_error());
    assert_eq!(cart.get_state().lines.len(), 1);
    assert_eq!(
      h.notifier.messages(NotificationLevel::Error),
      vec!["Failed to place order"]
    );
  }
}
