//! Applying reconciliation to the live cart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{Backend, CachedBackend, MenuSnapshot};
use crate::cache::{CacheEvent, CacheEventKind, CacheSource, QueryKey};
use crate::error::{ApiError, ERROR_TOAST_DURATION};
use crate::notify::SharedNotifier;

use super::reconcile::{reconcile, ReconciliationResult};
use super::store::{CartLine, CartState, CartStore};

#[derive(Debug, thiserror::Error)]
pub enum CheckoutError {
  #[error("Your cart is empty")]
  EmptyCart,
  /// Some lines could not be ordered and have been taken out of the cart
  #[error("Some items can no longer be ordered: {}", .items.join(", "))]
  Blocked {
    result: ReconciliationResult,
    items: Vec<String>,
  },
  #[error("Couldn't check your cart against the menu: {0}")]
  MenuUnavailable(ApiError),
  #[error("{0}")]
  InvalidPromo(String),
  #[error(transparent)]
  Api(#[from] ApiError),
}

/// Keeps the cart consistent with the menu of the restaurant it belongs to.
#[derive(Clone)]
pub struct CartSync<B: Backend> {
  cart: CartStore,
  backend: CachedBackend<B>,
  notifier: SharedNotifier,
  /// Content hash of the last menu the cart was synced against
  last_synced: Arc<Mutex<Option<String>>>,
}

impl<B: Backend> CartSync<B> {
  pub fn new(cart: CartStore, backend: CachedBackend<B>, notifier: SharedNotifier) -> Self {
    Self {
      cart,
      backend,
      notifier,
      last_synced: Arc::new(Mutex::new(None)),
    }
  }

  pub fn cart(&self) -> &CartStore {
    &self.cart
  }

  /// Correct the cart against `menu` and tell the user what changed.
  ///
  /// A menu for another restaurant than the cart's is ignored.
  pub fn sync_with_menu(&self, menu: &MenuSnapshot) -> ReconciliationResult {
    let mut result = ReconciliationResult::clean();
    let mut before = Vec::new();
    let mut matched = false;

    self.cart.set_state(|state| {
      if state.restaurant_id.as_deref() != Some(menu.restaurant_id.as_str()) {
        return;
      }
      matched = true;
      let reconciliation = reconcile(&state.lines, Some(menu));
      before = std::mem::replace(&mut state.lines, reconciliation.lines);
      result = reconciliation.result;
    });

    if !matched {
      return result;
    }
    self.remember(menu);
    if result.has_changes() {
      info!(
        restaurant = %menu.restaurant_id,
        removed = result.removed_items.len(),
        unavailable = result.unavailable_items.len(),
        repriced = result.price_changed_items.len(),
        "cart reconciled against menu"
      );
      self.notify_result(&result, &before);
    }
    result
  }

  /// Dry run: what reconciling would find, without touching the cart.
  pub fn validate_cart(&self, menu: Option<&MenuSnapshot>) -> ReconciliationResult {
    let state = self.cart.get_state();
    match menu {
      Some(menu) if state.restaurant_id.as_deref() == Some(menu.restaurant_id.as_str()) => {
        reconcile(&state.lines, Some(menu)).result
      }
      _ => ReconciliationResult::clean(),
    }
  }

  /// One notification per non-empty bucket, naming the items. `lines` is
  /// the cart as it was before reconciling, for names.
  pub fn notify_result(&self, result: &ReconciliationResult, lines: &[CartLine]) {
    let names: HashMap<&str, &str> = lines
      .iter()
      .map(|l| (l.item_id.as_str(), l.name.as_str()))
      .collect();
    let join = |ids: &[String]| {
      ids
        .iter()
        .map(|id| names.get(id.as_str()).copied().unwrap_or(id.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
    };

    if !result.removed_items.is_empty() {
      self.notifier.error(
        &format!(
          "No longer on the menu and removed from your cart: {}",
          join(&result.removed_items)
        ),
        Some(ERROR_TOAST_DURATION),
      );
    }
    if !result.unavailable_items.is_empty() {
      self.notifier.warning(&format!(
        "Currently unavailable and removed from your cart: {}",
        join(&result.unavailable_items)
      ));
    }
    if !result.price_changed_items.is_empty() {
      let changes = result
        .price_changed_items
        .iter()
        .map(|c| format!("{} ({} → {})", c.name, c.old_price, c.new_price))
        .collect::<Vec<_>>()
        .join(", ");
      self.notifier.info(&format!("Prices updated: {}", changes));
    }
  }

  /// Read the cart's menu (cache first) and sync against it.
  ///
  /// Returns `None` when there is nothing to sync or no fresh menu could be
  /// had; the cart is left as it was and nobody is notified.
  pub async fn refresh(&self) -> Option<ReconciliationResult> {
    let restaurant_id = self.cart.get_state().restaurant_id?;
    match self.backend.get_menu(&restaurant_id).await {
      Ok(menu) if menu.source != CacheSource::Offline => Some(self.sync_with_menu(&menu.data)),
      Ok(_) => {
        debug!(restaurant = %restaurant_id, "offline, skipping cart sync");
        None
      }
      Err(e) => {
        debug!(restaurant = %restaurant_id, error = %e, "menu fetch failed, skipping cart sync");
        None
      }
    }
  }

  /// Last check before an order is placed.
  ///
  /// Always asks the backend for the menu. Lines that can't be ordered are
  /// taken out of the cart and checkout is refused, so the customer sees the
  /// corrected cart before paying. Price changes are applied and announced
  /// but don't block.
  pub async fn prepare_checkout(&self) -> Result<CartState, CheckoutError> {
    let state = self.cart.get_state();
    let restaurant_id = match state.restaurant_id.clone() {
      Some(id) if !state.is_empty() => id,
      _ => return Err(CheckoutError::EmptyCart),
    };

    let menu = match self.backend.refetch_menu(&restaurant_id).await {
      Ok(menu) if menu.source != CacheSource::Offline => menu.data,
      Ok(_) => {
        let err = ApiError::Network("menu could not be refreshed".to_string());
        self.notifier.error(&err.user_message(), Some(ERROR_TOAST_DURATION));
        return Err(CheckoutError::MenuUnavailable(err));
      }
      Err(err) => {
        self.notifier.error(&err.user_message(), Some(ERROR_TOAST_DURATION));
        return Err(CheckoutError::MenuUnavailable(err));
      }
    };

    // Gate on the cart the customer actually saw; the menu watcher may sync
    // the store before we get to it.
    let gate = reconcile(&state.lines, Some(&menu)).result;
    self.sync_with_menu(&menu);

    if !gate.valid {
      let items = state
        .lines
        .iter()
        .filter(|l| gate.removed_items.contains(&l.item_id) || gate.unavailable_items.contains(&l.item_id))
        .map(|l| l.name.clone())
        .collect();
      warn!(restaurant = %restaurant_id, "checkout blocked by reconciliation");
      return Err(CheckoutError::Blocked {
        result: gate,
        items,
      });
    }

    Ok(self.cart.get_state())
  }

  /// Re-sync the cart every time a server-confirmed menu for its restaurant
  /// lands in the cache.
  ///
  /// Optimistic patches and their rollbacks are not menus the server sent, so
  /// they never touch the cart.
  pub fn watch_menus(&self) -> JoinHandle<()> {
    let sync = self.clone();
    let mut events = self.backend.cache().subscribe();
    tokio::spawn(async move {
      loop {
        match events.recv().await {
          Ok(event) => sync.on_cache_event(&event),
          Err(RecvError::Lagged(skipped)) => {
            // The cache may hold an unconfirmed patch; ask the server
            warn!(skipped, "menu watcher lagged, re-checking cart");
            sync.resync().await;
          }
          Err(RecvError::Closed) => break,
        }
      }
      debug!("menu watcher stopped");
    })
  }

  async fn resync(&self) {
    let Some(restaurant_id) = self.cart.get_state().restaurant_id else {
      return;
    };
    match self.backend.refetch_menu(&restaurant_id).await {
      Ok(menu) if menu.source != CacheSource::Offline => {
        if self.is_new(&menu.data) {
          self.sync_with_menu(&menu.data);
        }
      }
      Ok(_) => debug!(restaurant = %restaurant_id, "offline, skipping cart sync"),
      Err(e) => debug!(restaurant = %restaurant_id, error = %e, "menu fetch failed, skipping cart sync"),
    }
  }

  fn on_cache_event(&self, event: &CacheEvent) {
    if event.kind != CacheEventKind::Updated {
      return;
    }
    let QueryKey::Menu { restaurant_id } = &event.key else {
      return;
    };
    if self.cart.get_state().restaurant_id.as_deref() != Some(restaurant_id.as_str()) {
      return;
    }
    if let Some(menu) = self.backend.cache().get_query_data::<MenuSnapshot>(&event.key) {
      if self.is_new(&menu) {
        self.sync_with_menu(&menu);
      }
    }
  }

  fn is_new(&self, menu: &MenuSnapshot) -> bool {
    let last = self.last_synced.lock().unwrap_or_else(PoisonError::into_inner);
    last.as_deref() != Some(menu.content_hash().as_str())
  }

  fn remember(&self, menu: &MenuSnapshot) {
    *self.last_synced.lock().unwrap_or_else(PoisonError::into_inner) = Some(menu.content_hash());
  }
}
