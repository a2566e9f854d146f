//! Key schema for the resource cache.
//!
//! A key is a resource type plus the filter parameters that select one
//! snapshot of it. Two keys that differ only in cosmetic ways (whitespace,
//! promo code case) hash to the same slot.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

use crate::api::{Money, OrderScope, OrderStatus};

/// Resource types held in the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
  Menu,
  Order,
  Orders,
  Promo,
}

impl Resource {
  pub fn as_str(self) -> &'static str {
    match self {
      Resource::Menu => "menu",
      Resource::Order => "order",
      Resource::Orders => "orders",
      Resource::Promo => "promo",
    }
  }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum QueryKey {
  /// Menu of one restaurant
  Menu { restaurant_id: String },
  /// A single order
  Order { order_id: String },
  /// A list of orders, optionally narrowed to one status
  Orders {
    scope: OrderScope,
    status: Option<OrderStatus>,
  },
  /// Result of validating a promo code against a subtotal
  Promo { code: String, subtotal: Money },
}

impl QueryKey {
  pub fn menu(restaurant_id: impl Into<String>) -> Self {
    Self::Menu {
      restaurant_id: restaurant_id.into(),
    }
  }

  pub fn order(order_id: impl Into<String>) -> Self {
    Self::Order {
      order_id: order_id.into(),
    }
  }

  pub fn orders(scope: OrderScope, status: Option<OrderStatus>) -> Self {
    Self::Orders { scope, status }
  }

  pub fn promo(code: &str, subtotal: Money) -> Self {
    Self::Promo {
      code: normalize_code(code),
      subtotal,
    }
  }

  pub fn resource(&self) -> Resource {
    match self {
      Self::Menu { .. } => Resource::Menu,
      Self::Order { .. } => Resource::Order,
      Self::Orders { .. } => Resource::Orders,
      Self::Promo { .. } => Resource::Promo,
    }
  }

  /// Canonical `resource:params` form of the key.
  fn canonical(&self) -> String {
    let params = match self {
      Self::Menu { restaurant_id } => restaurant_id.trim().to_string(),
      Self::Order { order_id } => order_id.trim().to_string(),
      Self::Orders { scope, status } => {
        let scope = match scope {
          OrderScope::Customer => "customer".to_string(),
          OrderScope::Restaurant { restaurant_id } => format!("restaurant={}", restaurant_id.trim()),
          OrderScope::Driver => "driver".to_string(),
        };
        match status {
          Some(status) => format!("{}:status={}", scope, status),
          None => scope,
        }
      }
      Self::Promo { code, subtotal } => format!("{}:{}", normalize_code(code), subtotal.cents()),
    };
    format!("{}:{}", self.resource().as_str(), params)
  }

  /// Stable, fixed-length slot identifier.
  pub fn cache_hash(&self) -> String {
    let mut hasher = Sha256::new();
    hasher.update(self.canonical().as_bytes());
    hex::encode(hasher.finalize())
  }

  pub fn description(&self) -> String {
    match self {
      Self::Menu { restaurant_id } => format!("menu of restaurant {}", restaurant_id),
      Self::Order { order_id } => format!("order {}", order_id),
      Self::Orders { scope, status } => {
        let who = match scope {
          OrderScope::Customer => "my orders".to_string(),
          OrderScope::Restaurant { restaurant_id } => format!("orders of restaurant {}", restaurant_id),
          OrderScope::Driver => "driver orders".to_string(),
        };
        match status {
          Some(status) => format!("{} ({})", who, status),
          None => who,
        }
      }
      Self::Promo { code, .. } => format!("promo {}", code),
    }
  }
}

impl fmt::Display for QueryKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.canonical())
  }
}

/// Promo codes are case- and whitespace-insensitive.
pub fn normalize_code(code: &str) -> String {
  code.trim().to_uppercase()
}
