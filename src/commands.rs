//! Command-line surface.

use clap::Subcommand;

use crate::api::OrderStatus;

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
  /// Show a restaurant's menu
  #[command(alias = "m")]
  Menu {
    /// Restaurant id (default: `default_restaurant` from the config)
    restaurant: Option<String>,
  },

  /// Inspect or edit the cart
  #[command(alias = "c")]
  Cart {
    #[command(subcommand)]
    action: Option<CartAction>,
  },

  /// Re-check the cart against the live menu and place the order
  Checkout {
    /// Delivery address (default: `delivery_address` from the config)
    #[arg(short, long)]
    address: Option<String>,
    #[arg(short, long)]
    promo: Option<String>,
  },

  /// Check a promo code against the current cart subtotal
  Promo { code: String },

  /// List orders
  #[command(alias = "o")]
  Orders {
    /// Incoming orders for this restaurant
    #[arg(long, conflicts_with = "driver")]
    restaurant: Option<String>,
    /// Orders open for pickup or assigned to you
    #[arg(long)]
    driver: bool,
    /// Only orders in this status
    #[arg(short, long)]
    status: Option<OrderStatus>,
  },

  /// Mark a menu item available or unavailable (restaurant)
  Availability {
    restaurant: String,
    item: String,
    #[arg(value_parser = parse_toggle, action = clap::ArgAction::Set)]
    available: bool,
  },

  /// Move an order to a new status (restaurant/driver)
  #[command(name = "order-status", alias = "status")]
  OrderStatus { order: String, status: OrderStatus },

  /// Accept a delivery (driver)
  Accept { order: String },

  /// Follow orders live until they are delivered or Ctrl-C
  #[command(alias = "t")]
  Track {
    #[arg(required = true)]
    orders: Vec<String>,
  },
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CartAction {
  Show,
  Add {
    item: String,
    #[arg(short, long, default_value_t = 1)]
    quantity: u32,
    /// Restaurant id (default: the cart's restaurant, then `default_restaurant`)
    #[arg(short, long)]
    restaurant: Option<String>,
  },
  /// Set a line's quantity; 0 removes it
  Set { item: String, quantity: u32 },
  Remove { item: String },
  Clear,
  /// Reconcile the cart against the restaurant's current menu
  Sync,
}

fn parse_toggle(value: &str) -> Result<bool, String> {
  match value.trim().to_lowercase().as_str() {
    "on" | "yes" | "true" | "available" => Ok(true),
    "off" | "no" | "false" | "unavailable" => Ok(false),
    other => Err(format!("expected on or off, got '{}'", other)),
  }
}
