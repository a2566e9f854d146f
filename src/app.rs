use crate::api::{ApiClient, Backend, CachedBackend, MenuItem, MenuSnapshot, Order, OrderScope, OrderStatus};
use crate::cache::{CacheOptions, CacheSource, QueryClient};
use crate::cart::{AddOutcome, CartState, CartStorage, CartStore, CartSync, SqliteCartStorage};
use crate::commands::{CartAction, Command};
use crate::config::Config;
use crate::event::{Event, EventHandler};
use crate::live::{LiveStatusBridge, PushChannel, StatusSource, TrackedOrder};
use crate::mutation::{MutationRunner, Mutations};
use crate::notify::{SharedNotifier, TracingNotifier};
use color_eyre::{eyre::eyre, Result};
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

/// Main application state
pub struct App<B: Backend> {
  /// Application configuration
  config: Config,

  /// Backend with the shared resource cache in front of it
  backend: CachedBackend<B>,

  mutations: Mutations<B>,

  /// Persistent cart kept in line with the restaurant's menu
  cart: CartSync<B>,
}

impl App<ApiClient> {
  pub fn new(config: Config) -> Result<Self> {
    let client = ApiClient::new(&config)?;

    let storage: Arc<dyn CartStorage> = match &config.cart.path {
      Some(path) => Arc::new(SqliteCartStorage::open(path)?),
      None => Arc::new(SqliteCartStorage::open_default()?),
    };

    Ok(Self::with_backend(
      config,
      client,
      CartStore::open(storage),
      Arc::new(TracingNotifier),
    ))
  }
}

impl<B: Backend> App<B> {
  pub fn with_backend(config: Config, backend: B, cart: CartStore, notifier: SharedNotifier) -> Self {
    let cache = QueryClient::new(CacheOptions::from(&config.cache));
    let backend = CachedBackend::new(backend, cache.clone());
    let mutations = Mutations::new(backend.clone(), MutationRunner::new(cache, notifier.clone()));
    let cart = CartSync::new(cart, backend.clone(), notifier);

    Self {
      config,
      backend,
      mutations,
      cart,
    }
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    // Any menu that lands in the cache while we work re-checks the cart
    let watcher = self.cart.watch_menus();

    let result = match command {
      Command::Track { orders } => self.track(&orders).await,
      command => self.execute(command).await.map(|output| println!("{}", output)),
    };

    watcher.abort();
    result
  }

  /// Run a one-shot command and return what to print.
  pub async fn execute(&self, command: Command) -> Result<String> {
    match command {
      Command::Menu { restaurant } => self.show_menu(restaurant).await,
      Command::Cart { action } => self.cart_command(action.unwrap_or(CartAction::Show)).await,
      Command::Checkout { address, promo } => self.checkout(address, promo).await,
      Command::Promo { code } => self.check_promo(&code).await,
      Command::Orders {
        restaurant,
        driver,
        status,
      } => {
        let scope = match (restaurant, driver) {
          (Some(restaurant_id), _) => OrderScope::Restaurant { restaurant_id },
          (None, true) => OrderScope::Driver,
          (None, false) => OrderScope::Customer,
        };
        self.list_orders(&scope, status).await
      }
      Command::Availability {
        restaurant,
        item,
        available,
      } => {
        let item = self
          .mutations
          .set_item_availability(&restaurant, &item, available)
          .await?;
        Ok(format!(
          "{} is now {}",
          item.name,
          if item.is_available { "available" } else { "unavailable" }
        ))
      }
      Command::OrderStatus { order, status } => {
        let order = self.mutations.update_order_status(&order, status).await?;
        Ok(format!("{}  {}", order.id, order.status.label()))
      }
      Command::Accept { order } => {
        let order = self.mutations.accept_order(&order).await?;
        Ok(format!("Accepted {}\n{}", order.id, render_order(&order)))
      }
      Command::Track { .. } => Err(eyre!("track is interactive and cannot be executed as a one-shot command")),
    }
  }

  fn restaurant_or_default(&self, explicit: Option<String>) -> Result<String> {
    explicit
      .or_else(|| self.cart.cart().get_state().restaurant_id)
      .or_else(|| self.config.default_restaurant.clone())
      .ok_or_else(|| eyre!("No restaurant given and no default_restaurant configured"))
  }

  async fn show_menu(&self, restaurant: Option<String>) -> Result<String> {
    let restaurant_id = self.restaurant_or_default(restaurant)?;
    let menu = self.backend.get_menu(&restaurant_id).await?;
    let mut out = render_menu(&menu.data);
    if menu.source == CacheSource::Offline {
      out.push_str("\n(offline: showing the last menu we saw)");
    }
    Ok(out)
  }

  async fn cart_command(&self, action: CartAction) -> Result<String> {
    let cart = self.cart.cart();
    match action {
      CartAction::Show => {
        self.cart.refresh().await;
        Ok(render_cart(&cart.get_state()))
      }
      CartAction::Add {
        item,
        quantity,
        restaurant,
      } => {
        let restaurant_id = self.restaurant_or_default(restaurant)?;
        let menu = self.backend.get_menu(&restaurant_id).await?.data;
        let menu_item = find_item(&menu, &item)
          .ok_or_else(|| eyre!("No item '{}' on the menu of {}", item, restaurant_id))?;

        let summary = match cart.add_item(&restaurant_id, menu.restaurant_name.as_deref(), menu_item, quantity) {
          AddOutcome::Added | AddOutcome::Merged => format!("Added {} x {}", quantity, menu_item.name),
          AddOutcome::StartedNewCart { previous_restaurant } => format!(
            "Started a new cart (items from {} were removed)\nAdded {} x {}",
            previous_restaurant, quantity, menu_item.name
          ),
          AddOutcome::Unavailable => return Err(eyre!("{} is currently unavailable", menu_item.name)),
        };
        Ok(format!("{}\n\n{}", summary, render_cart(&cart.get_state())))
      }
      CartAction::Set { item, quantity } => {
        if !cart.update_quantity(&item, quantity) {
          return Err(eyre!("'{}' is not in the cart", item));
        }
        Ok(render_cart(&cart.get_state()))
      }
      CartAction::Remove { item } => {
        if !cart.remove_item(&item) {
          return Err(eyre!("'{}' is not in the cart", item));
        }
        Ok(render_cart(&cart.get_state()))
      }
      CartAction::Clear => {
        cart.clear();
        Ok("Cart cleared".to_string())
      }
      CartAction::Sync => {
        if cart.get_state().is_empty() {
          return Ok(render_cart(&cart.get_state()));
        }
        match self.cart.refresh().await {
          None => Err(eyre!("Couldn't fetch the menu; the cart was left as it is")),
          Some(result) if !result.has_changes() => Ok("Cart is up to date".to_string()),
          Some(result) => Ok(format!(
            "{} removed, {} unavailable, {} repriced\n\n{}",
            result.removed_items.len(),
            result.unavailable_items.len(),
            result.price_changed_items.len(),
            render_cart(&cart.get_state())
          )),
        }
      }
    }
  }

  async fn checkout(&self, address: Option<String>, promo: Option<String>) -> Result<String> {
    let address = address
      .or_else(|| self.config.delivery_address.clone())
      .ok_or_else(|| eyre!("No delivery address given and no delivery_address configured"))?;

    let order = self
      .mutations
      .checkout(&self.cart, &address, promo.as_deref())
      .await?;
    Ok(format!("Order {} placed\n{}", order.id, render_order(&order)))
  }

  async fn check_promo(&self, code: &str) -> Result<String> {
    let state = self.cart.cart().get_state();
    if state.is_empty() {
      return Err(eyre!("Your cart is empty"));
    }
    let promo = self.mutations.validate_promo(code, state.subtotal()).await?;
    if promo.valid {
      Ok(format!(
        "{} off a subtotal of {}",
        promo.discount_amount,
        state.subtotal()
      ))
    } else {
      Err(eyre!(
        "{}",
        promo.message.unwrap_or_else(|| "Invalid promo code".to_string())
      ))
    }
  }

  async fn list_orders(&self, scope: &OrderScope, status: Option<OrderStatus>) -> Result<String> {
    let orders = self.backend.list_orders(scope, status).await?;
    if orders.data.is_empty() {
      return Ok("No orders".to_string());
    }
    let mut out = orders
      .data
      .iter()
      .map(|order| format!("{}  {:<24} {}", order.id, order.status.label(), order.total))
      .collect::<Vec<_>>()
      .join("\n");
    if orders.source == CacheSource::Offline {
      out.push_str("\n(offline: showing the last list we saw)");
    }
    Ok(out)
  }

  /// Follow orders until each reaches a terminal status or Ctrl-C.
  ///
  /// Push events take precedence over fetched state. While the push channel
  /// is down the orders are refetched on every tick instead.
  async fn track(&self, order_ids: &[String]) -> Result<()> {
    let (bridge, commands) = LiveStatusBridge::new();
    let channel = PushChannel::new(self.config.ws_url()?, self.config.live.reconnect.clone())
      .with_token(Config::get_api_token())
      .spawn(bridge.clone(), commands);

    let mut events = EventHandler::new(self.config.live.poll_interval());
    events.listen_for_interrupt();
    events.watch_connection(bridge.connection());
    for order_id in order_ids {
      events.watch_order(bridge.subscribe(order_id));
      if let Err(e) = self.backend.get_order(order_id).await {
        warn!(order = %order_id, error = %e, "initial order fetch failed");
      }
    }

    let cache = self.backend.cache();
    let mut shown: HashMap<String, TrackedOrder> = HashMap::new();
    print_changes(&bridge, cache, order_ids, &mut shown);

    while !all_finished(order_ids, &shown) {
      match events.next().await {
        Some(Event::Order(order_id)) => debug!(order = %order_id, "live update"),
        Some(Event::Tick) => {
          if !bridge.connection_state().is_connected() {
            let refetches = order_ids
              .iter()
              .map(|id| self.backend.refetch_order_in_background(id));
            futures::future::join_all(refetches).await;
          }
        }
        Some(Event::Connection(state)) => eprintln!("[{}]", state),
        Some(Event::Quit) | None => break,
      }
      print_changes(&bridge, cache, order_ids, &mut shown);
    }

    drop(events);
    channel.abort();
    Ok(())
  }
}

fn print_changes(
  bridge: &LiveStatusBridge,
  cache: &QueryClient,
  order_ids: &[String],
  shown: &mut HashMap<String, TrackedOrder>,
) {
  for order_id in order_ids {
    let Some(current) = bridge.current(order_id, cache) else {
      continue;
    };
    if shown.get(order_id) != Some(&current) {
      println!("{}", render_tracked(&current));
      shown.insert(order_id.clone(), current);
    }
  }
}

fn all_finished(order_ids: &[String], shown: &HashMap<String, TrackedOrder>) -> bool {
  order_ids
    .iter()
    .all(|id| shown.get(id).is_some_and(|t| t.status.is_terminal()))
}

/// Look an item up by id, falling back to a case-insensitive name match.
fn find_item<'a>(menu: &'a MenuSnapshot, wanted: &str) -> Option<&'a MenuItem> {
  menu
    .find(wanted)
    .or_else(|| menu.items.iter().find(|i| i.name.eq_ignore_ascii_case(wanted.trim())))
}

fn render_menu(menu: &MenuSnapshot) -> String {
  let mut out = format!(
    "{} ({})\n",
    menu.restaurant_name.as_deref().unwrap_or("Menu"),
    menu.restaurant_id
  );
  for item in &menu.items {
    let _ = write!(out, "\n  {:<16} {:<28} {:>8}", item.item_id, item.name, item.price.to_string());
    if !item.is_available {
      out.push_str("  unavailable");
    }
  }
  out
}

fn render_cart(state: &CartState) -> String {
  if state.is_empty() {
    return "Cart is empty".to_string();
  }
  let mut out = format!(
    "Cart from {}\n",
    state
      .restaurant_name
      .as_deref()
      .or(state.restaurant_id.as_deref())
      .unwrap_or("unknown restaurant")
  );
  for line in &state.lines {
    let _ = write!(
      out,
      "\n  {:>3} x {:<28} {:>8}",
      line.quantity,
      line.name,
      line.line_total().to_string()
    );
  }
  let _ = write!(
    out,
    "\n\nSubtotal: {} ({} items)",
    state.subtotal(),
    state.item_count()
  );
  out
}

fn render_order(order: &Order) -> String {
  let mut out = format!("  {}  total {}", order.status.label(), order.total);
  for line in &order.items {
    let _ = write!(out, "\n  {:>3} x {}", line.quantity, line.name);
  }
  out
}

fn render_tracked(order: &TrackedOrder) -> String {
  let mut out = format!("{}  {}", order.order_id, order.status.label());
  if let Some(driver) = &order.driver_info {
    let _ = write!(out, "  driver {}", driver.name);
  }
  if let Some(eta) = order.estimated_arrival {
    let _ = write!(out, "  eta {}", eta.with_timezone(&chrono::Local).format("%H:%M"));
  }
  if order.source == StatusSource::Fetched {
    out.push_str("  (fetched)");
  }
  out
}
