//! Backend REST contract.
//!
//! The rest of the crate only talks to the backend through [`Backend`], so
//! the mutation and reconciliation logic can be exercised without a server.

pub mod api_types;
pub mod cached_client;
pub mod client;
pub mod types;

use std::future::Future;

use crate::error::ApiError;

pub use cached_client::CachedBackend;
pub use client::ApiClient;
pub use types::{
  CreateOrderRequest, DriverInfo, DriverLocation, MenuItem, MenuItemPatch, MenuSnapshot, Money,
  Order, OrderLine, OrderScope, OrderStatus, PromoValidation,
};

/// Async operations the client core needs from the backend.
pub trait Backend: Clone + Send + Sync + 'static {
  /// `GET /restaurants/:id/menu`
  fn get_menu(&self, restaurant_id: &str)
    -> impl Future<Output = Result<MenuSnapshot, ApiError>> + Send;

  /// `GET /orders/:id`
  fn get_order(&self, order_id: &str) -> impl Future<Output = Result<Order, ApiError>> + Send;

  fn list_orders(&self, scope: &OrderScope)
    -> impl Future<Output = Result<Vec<Order>, ApiError>> + Send;

  /// `PATCH /restaurants/:rid/menu/:itemId`
  fn update_menu_item(
    &self,
    restaurant_id: &str,
    item_id: &str,
    patch: &MenuItemPatch,
  ) -> impl Future<Output = Result<MenuItem, ApiError>> + Send;

  /// `POST /orders`
  fn create_order(&self, request: &CreateOrderRequest)
    -> impl Future<Output = Result<Order, ApiError>> + Send;

  /// `PATCH /orders/:id/status`
  fn update_order_status(
    &self,
    order_id: &str,
    status: OrderStatus,
  ) -> impl Future<Output = Result<Order, ApiError>> + Send;

  /// `POST /drivers/orders/:id/accept`
  fn accept_order(&self, order_id: &str) -> impl Future<Output = Result<Order, ApiError>> + Send;

  fn validate_promo(
    &self,
    code: &str,
    subtotal: Money,
  ) -> impl Future<Output = Result<PromoValidation, ApiError>> + Send;
}

#[cfg(test)]
pub(crate) mod testing {
  //! In-memory backend for unit tests.

  use super::*;
  use chrono::Utc;
  use std::collections::HashMap;
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  #[derive(Default)]
  struct FakeState {
    menus: HashMap<String, MenuSnapshot>,
    orders: HashMap<String, Order>,
    /// Next write fails with this error
    fail_next_write: Option<ApiError>,
    /// Reads fail with this error until cleared
    fail_reads: Option<ApiError>,
    write_delay: Option<Duration>,
    menu_fetches: u32,
    promos: HashMap<String, Money>,
  }

  #[derive(Clone, Default)]
  pub struct FakeBackend {
    state: Arc<Mutex<FakeState>>,
  }

  impl FakeBackend {
    pub fn new() -> Self {
      Self::default()
    }

    pub fn with_menu(self, menu: MenuSnapshot) -> Self {
      self.put_menu(menu);
      self
    }

    pub fn with_order(self, order: Order) -> Self {
      self
        .state
        .lock()
        .unwrap()
        .orders
        .insert(order.id.clone(), order);
      self
    }

    pub fn with_promo(self, code: &str, discount: Money) -> Self {
      self
        .state
        .lock()
        .unwrap()
        .promos
        .insert(code.to_string(), discount);
      self
    }

    pub fn put_menu(&self, menu: MenuSnapshot) {
      self
        .state
        .lock()
        .unwrap()
        .menus
        .insert(menu.restaurant_id.clone(), menu);
    }

    pub fn fail_next_write(&self, err: ApiError) {
      self.state.lock().unwrap().fail_next_write = Some(err);
    }

    pub fn fail_reads(&self, err: Option<ApiError>) {
      self.state.lock().unwrap().fail_reads = err;
    }

    pub fn set_write_delay(&self, delay: Duration) {
      self.state.lock().unwrap().write_delay = Some(delay);
    }

    pub fn menu_fetches(&self) -> u32 {
      self.state.lock().unwrap().menu_fetches
    }

    pub fn menu(&self, restaurant_id: &str) -> Option<MenuSnapshot> {
      self.state.lock().unwrap().menus.get(restaurant_id).cloned()
    }

    pub fn order(&self, order_id: &str) -> Option<Order> {
      self.state.lock().unwrap().orders.get(order_id).cloned()
    }

    async fn before_write(&self) -> Result<(), ApiError> {
      let (delay, failure) = {
        let mut state = self.state.lock().unwrap();
        (state.write_delay, state.fail_next_write.take())
      };
      if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
      }
      match failure {
        Some(err) => Err(err),
        None => Ok(()),
      }
    }

    fn check_reads(&self) -> Result<(), ApiError> {
      match &self.state.lock().unwrap().fail_reads {
        Some(err) => Err(err.clone()),
        None => Ok(()),
      }
    }

    fn set_status(&self, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
      let mut state = self.state.lock().unwrap();
      let order = state
        .orders
        .get_mut(order_id)
        .ok_or_else(|| ApiError::from_status(404, "Order not found"))?;
      order.status = status;
      order.updated_at = Utc::now();
      Ok(order.clone())
    }
  }

  impl Backend for FakeBackend {
    async fn get_menu(&self, restaurant_id: &str) -> Result<MenuSnapshot, ApiError> {
      self.check_reads()?;
      let mut state = self.state.lock().unwrap();
      state.menu_fetches += 1;
      state
        .menus
        .get(restaurant_id)
        .cloned()
        .ok_or_else(|| ApiError::from_status(404, "Restaurant not found"))
    }

    async fn get_order(&self, order_id: &str) -> Result<Order, ApiError> {
      self.check_reads()?;
      self
        .order(order_id)
        .ok_or_else(|| ApiError::from_status(404, "Order not found"))
    }

    async fn list_orders(&self, scope: &OrderScope) -> Result<Vec<Order>, ApiError> {
      self.check_reads()?;
      let state = self.state.lock().unwrap();
      let mut orders: Vec<Order> = state
        .orders
        .values()
        .filter(|o| match scope {
          OrderScope::Restaurant { restaurant_id } => &o.restaurant_id == restaurant_id,
          _ => true,
        })
        .cloned()
        .collect();
      orders.sort_by(|a, b| a.id.cmp(&b.id));
      Ok(orders)
    }

    async fn update_menu_item(
      &self,
      restaurant_id: &str,
      item_id: &str,
      patch: &MenuItemPatch,
    ) -> Result<MenuItem, ApiError> {
      self.before_write().await?;
      let mut state = self.state.lock().unwrap();
      let item = state
        .menus
        .get_mut(restaurant_id)
        .and_then(|menu| menu.find_mut(item_id))
        .ok_or_else(|| ApiError::from_status(404, "Menu item not found"))?;
      patch.apply_to(item);
      Ok(item.clone())
    }

    async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
      self.before_write().await?;
      let mut state = self.state.lock().unwrap();
      let id = format!("o{}", state.orders.len() + 1);
      let order = Order {
        id: id.clone(),
        restaurant_id: request.restaurant_id.clone(),
        status: OrderStatus::Pending,
        items: request.items.clone(),
        total: request.items.iter().map(|l| l.price.times(l.quantity)).sum(),
        driver_info: None,
        driver_location: None,
        estimated_arrival: None,
        updated_at: Utc::now(),
      };
      state.orders.insert(id, order.clone());
      Ok(order)
    }

    async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
      self.before_write().await?;
      self.set_status(order_id, status)
    }

    async fn accept_order(&self, order_id: &str) -> Result<Order, ApiError> {
      self.before_write().await?;
      self.set_status(order_id, OrderStatus::DriverAssigned)
    }

    async fn validate_promo(&self, code: &str, _subtotal: Money) -> Result<PromoValidation, ApiError> {
      self.check_reads()?;
      let state = self.state.lock().unwrap();
      Ok(match state.promos.get(code) {
        Some(discount) => PromoValidation {
          valid: true,
          discount_amount: *discount,
          message: None,
        },
        None => PromoValidation {
          valid: false,
          discount_amount: Money::ZERO,
          message: Some("Invalid promo code".to_string()),
        },
      })
    }
  }
}
