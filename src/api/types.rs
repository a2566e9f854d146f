//! Domain types shared by the cache, the cart and the live status bridge.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Amount of money in minor units (cents).
///
/// The backend sends prices as decimal numbers (`12.5`); they are rounded to
/// whole cents on the way in so that price comparisons are exact.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Money(i64);

impl Money {
  pub const ZERO: Money = Money(0);

  pub fn from_cents(cents: i64) -> Self {
    Self(cents)
  }

  pub fn cents(self) -> i64 {
    self.0
  }

  pub fn times(self, quantity: u32) -> Self {
    Self(self.0 * i64::from(quantity))
  }
}

impl From<f64> for Money {
  fn from(value: f64) -> Self {
    Self((value * 100.0).round() as i64)
  }
}

impl From<Money> for f64 {
  fn from(value: Money) -> Self {
    value.0 as f64 / 100.0
  }
}

impl std::ops::Add for Money {
  type Output = Money;

  fn add(self, rhs: Money) -> Money {
    Money(self.0 + rhs.0)
  }
}

impl std::iter::Sum for Money {
  fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
    iter.fold(Money::ZERO, |acc, m| acc + m)
  }
}

impl fmt::Display for Money {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let sign = if self.0 < 0 { "-" } else { "" };
    let abs = self.0.abs();
    write!(f, "{}${}.{:02}", sign, abs / 100, abs % 100)
  }
}

/// One entry of a restaurant's menu, as the backend knows it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
  #[serde(alias = "id")]
  pub item_id: String,
  pub name: String,
  pub price: Money,
  pub is_available: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub category: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
}

/// Authoritative menu for one restaurant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuSnapshot {
  pub restaurant_id: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub restaurant_name: Option<String>,
  #[serde(default)]
  pub items: Vec<MenuItem>,
}

impl MenuSnapshot {
  pub fn find(&self, item_id: &str) -> Option<&MenuItem> {
    self.items.iter().find(|item| item.item_id == item_id)
  }

  pub fn find_mut(&mut self, item_id: &str) -> Option<&mut MenuItem> {
    self.items.iter_mut().find(|item| item.item_id == item_id)
  }

  /// Digest of the snapshot's content, used to tell a changed menu from a
  /// re-delivered identical one.
  pub fn content_hash(&self) -> String {
    let bytes = serde_json::to_vec(self).unwrap_or_default();
    hex::encode(Sha256::digest(&bytes))
  }
}

/// Partial update of a menu item. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemPatch {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub price: Option<Money>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub is_available: Option<bool>,
}

impl MenuItemPatch {
  pub fn availability(is_available: bool) -> Self {
    Self {
      is_available: Some(is_available),
      ..Self::default()
    }
  }

  pub fn apply_to(&self, item: &mut MenuItem) {
    if let Some(name) = &self.name {
      item.name = name.clone();
    }
    if let Some(price) = self.price {
      item.price = price;
    }
    if let Some(is_available) = self.is_available {
      item.is_available = is_available;
    }
  }
}

/// Lifecycle of an order, from placement to hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
  Pending,
  Confirmed,
  Preparing,
  ReadyForPickup,
  DriverAssigned,
  PickedUp,
  OutForDelivery,
  Delivered,
  Cancelled,
}

impl OrderStatus {
  pub const ALL: [OrderStatus; 9] = [
    OrderStatus::Pending,
    OrderStatus::Confirmed,
    OrderStatus::Preparing,
    OrderStatus::ReadyForPickup,
    OrderStatus::DriverAssigned,
    OrderStatus::PickedUp,
    OrderStatus::OutForDelivery,
    OrderStatus::Delivered,
    OrderStatus::Cancelled,
  ];

  pub fn as_str(self) -> &'static str {
    match self {
      Self::Pending => "pending",
      Self::Confirmed => "confirmed",
      Self::Preparing => "preparing",
      Self::ReadyForPickup => "ready_for_pickup",
      Self::DriverAssigned => "driver_assigned",
      Self::PickedUp => "picked_up",
      Self::OutForDelivery => "out_for_delivery",
      Self::Delivered => "delivered",
      Self::Cancelled => "cancelled",
    }
  }

  /// No further status changes are expected after this one.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Delivered | Self::Cancelled)
  }

  pub fn label(self) -> &'static str {
    match self {
      Self::Pending => "Order placed",
      Self::Confirmed => "Confirmed by restaurant",
      Self::Preparing => "Being prepared",
      Self::ReadyForPickup => "Ready for pickup",
      Self::DriverAssigned => "Driver assigned",
      Self::PickedUp => "Picked up",
      Self::OutForDelivery => "Out for delivery",
      Self::Delivered => "Delivered",
      Self::Cancelled => "Cancelled",
    }
  }
}

impl fmt::Display for OrderStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for OrderStatus {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let wanted = s.trim().to_lowercase().replace('-', "_");
    Self::ALL
      .into_iter()
      .find(|status| status.as_str() == wanted)
      .ok_or_else(|| format!("unknown order status '{}'", s))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverInfo {
  pub id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub phone: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub vehicle: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DriverLocation {
  pub lat: f64,
  pub lng: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub heading: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
  pub item_id: String,
  pub name: String,
  pub price: Money,
  pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
  #[serde(alias = "_id")]
  pub id: String,
  pub restaurant_id: String,
  pub status: OrderStatus,
  #[serde(default)]
  pub items: Vec<OrderLine>,
  #[serde(default)]
  pub total: Money,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub driver_info: Option<DriverInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub driver_location: Option<DriverLocation>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub estimated_arrival: Option<DateTime<Utc>>,
  pub updated_at: DateTime<Utc>,
}

/// Which list of orders a query refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum OrderScope {
  /// Orders placed by the signed-in customer.
  Customer,
  /// Incoming orders for one restaurant.
  Restaurant { restaurant_id: String },
  /// Orders open for pickup, or assigned to the signed-in driver.
  Driver,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
  pub restaurant_id: String,
  pub items: Vec<OrderLine>,
  pub delivery_address: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub promo_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoValidation {
  pub valid: bool,
  #[serde(default)]
  pub discount_amount: Money,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_money_rounds_decimal_prices() {
    let m: Money = serde_json::from_str("12.5").unwrap();
    assert_eq!(m.cents(), 1250);
    let m: Money = serde_json::from_str("0.1").unwrap();
    assert_eq!(m.cents(), 10);
    assert_eq!(serde_json::to_string(&Money::from_cents(1099)).unwrap(), "10.99");
    assert_eq!(Money::from_cents(705).to_string(), "$7.05");
  }

  #[test]
  fn test_menu_item_accepts_id_alias() {
    let item: MenuItem =
      serde_json::from_str(r#"{"id":"i1","name":"Pad Thai","price":10,"isAvailable":true}"#).unwrap();
    assert_eq!(item.item_id, "i1");
    assert_eq!(item.price, Money::from_cents(1000));
  }

  #[test]
  fn test_content_hash_ignores_identity() {
    let menu = MenuSnapshot {
      restaurant_id: "r1".to_string(),
      restaurant_name: None,
      items: vec![],
    };
    assert_eq!(menu.content_hash(), menu.clone().content_hash());

    let mut changed = menu.clone();
    changed.restaurant_name = Some("Thai Corner".to_string());
    assert_ne!(menu.content_hash(), changed.content_hash());
  }

  #[test]
  fn test_order_status_parse() {
    assert_eq!("out-for-delivery".parse::<OrderStatus>(), Ok(OrderStatus::OutForDelivery));
    assert!("teleported".parse::<OrderStatus>().is_err());
    assert!(OrderStatus::Delivered.is_terminal());
    assert!(!OrderStatus::Preparing.is_terminal());
  }

  #[test]
  fn test_patch_only_touches_present_fields() {
    let mut item = MenuItem {
      item_id: "i1".to_string(),
      name: "Soup".to_string(),
      price: Money::from_cents(500),
      is_available: true,
      description: None,
      category: None,
      image: None,
    };
    MenuItemPatch::availability(false).apply_to(&mut item);
    assert!(!item.is_available);
    assert_eq!(item.name, "Soup");
    assert_eq!(item.price, Money::from_cents(500));
  }
}
