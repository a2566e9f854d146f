//! Process-wide cart state.
//!
//! One `watch` channel holds the cart; every change (user actions and
//! reconciliation alike) goes through [`CartStore::set_state`], which applies
//! it under the channel's lock, wakes subscribers and writes through to
//! storage.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::api::{MenuItem, Money, OrderLine};

use super::storage::{CartStorage, MemoryCartStorage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
  pub item_id: String,
  pub name: String,
  pub price: Money,
  pub quantity: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub image: Option<String>,
}

impl CartLine {
  pub fn line_total(&self) -> Money {
    self.price.times(self.quantity)
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartState {
  pub restaurant_id: Option<String>,
  pub restaurant_name: Option<String>,
  #[serde(default)]
  pub lines: Vec<CartLine>,
}

impl CartState {
  pub fn is_empty(&self) -> bool {
    self.lines.is_empty()
  }

  pub fn subtotal(&self) -> Money {
    self.lines.iter().map(CartLine::line_total).sum()
  }

  pub fn item_count(&self) -> u32 {
    self.lines.iter().map(|l| l.quantity).sum()
  }

  pub fn line(&self, item_id: &str) -> Option<&CartLine> {
    self.lines.iter().find(|l| l.item_id == item_id)
  }

  pub fn order_lines(&self) -> Vec<OrderLine> {
    self
      .lines
      .iter()
      .map(|l| OrderLine {
        item_id: l.item_id.clone(),
        name: l.name.clone(),
        price: l.price,
        quantity: l.quantity,
      })
      .collect()
  }

  /// Drop empty lines; an empty cart belongs to no restaurant.
  fn normalize(&mut self) {
    self.lines.retain(|l| l.quantity > 0);
    if self.lines.is_empty() {
      self.restaurant_id = None;
      self.restaurant_name = None;
    }
  }
}

/// Result of adding an item to the cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
  Added,
  /// The item was already in the cart; quantities were merged
  Merged,
  /// The cart held items from another restaurant and was replaced
  StartedNewCart { previous_restaurant: String },
  /// The menu says this item cannot be ordered right now
  Unavailable,
}

/// Observable cart with write-through persistence.
#[derive(Clone)]
pub struct CartStore {
  state: Arc<watch::Sender<CartState>>,
  storage: Arc<dyn CartStorage>,
  /// Held from applying a change until it is saved, so saves land in order
  writes: Arc<Mutex<()>>,
}

impl CartStore {
  /// Load the persisted cart (or start empty) and keep it in sync with `storage`.
  pub fn open(storage: Arc<dyn CartStorage>) -> Self {
    let initial = match storage.load() {
      Ok(state) => state.unwrap_or_default(),
      Err(e) => {
        warn!(error = %e, "failed to load saved cart, starting empty");
        CartState::default()
      }
    };
    debug!(lines = initial.lines.len(), "cart loaded");
    let (state, _) = watch::channel(initial);
    Self {
      state: Arc::new(state),
      storage,
      writes: Arc::new(Mutex::new(())),
    }
  }

  pub fn in_memory() -> Self {
    Self::open(Arc::new(MemoryCartStorage::default()))
  }

  pub fn get_state(&self) -> CartState {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<CartState> {
    self.state.subscribe()
  }

  /// Apply `f` to the cart. Subscribers are woken and the cart persisted only
  /// if something actually changed. Returns whether it did.
  pub fn set_state(&self, f: impl FnOnce(&mut CartState)) -> bool {
    let _writing = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
    let mut snapshot = None;
    self.state.send_if_modified(|state| {
      let before = state.clone();
      f(state);
      state.normalize();
      if *state == before {
        return false;
      }
      snapshot = Some(state.clone());
      true
    });
    match snapshot {
      Some(snapshot) => {
        self.persist(&snapshot);
        true
      }
      None => false,
    }
  }

  fn persist(&self, snapshot: &CartState) {
    if let Err(e) = self.storage.save(snapshot) {
      warn!(error = %e, "failed to persist cart");
    }
  }

  pub fn add_item(
    &self,
    restaurant_id: &str,
    restaurant_name: Option<&str>,
    item: &MenuItem,
    quantity: u32,
  ) -> AddOutcome {
    if !item.is_available {
      return AddOutcome::Unavailable;
    }
    let mut outcome = AddOutcome::Added;
    self.set_state(|state| {
      if let Some(previous) = state.restaurant_id.as_deref() {
        if previous != restaurant_id && !state.lines.is_empty() {
          outcome = AddOutcome::StartedNewCart {
            previous_restaurant: previous.to_string(),
          };
          state.lines.clear();
        }
      }
      state.restaurant_id = Some(restaurant_id.to_string());
      if let Some(name) = restaurant_name {
        state.restaurant_name = Some(name.to_string());
      }

      match state.lines.iter_mut().find(|l| l.item_id == item.item_id) {
        Some(line) => {
          line.quantity = line.quantity.saturating_add(quantity);
          outcome = AddOutcome::Merged;
        }
        None => state.lines.push(CartLine {
          item_id: item.item_id.clone(),
          name: item.name.clone(),
          price: item.price,
          quantity,
          image: item.image.clone(),
        }),
      }
    });
    outcome
  }

  pub fn remove_item(&self, item_id: &str) -> bool {
    self.set_state(|state| state.lines.retain(|l| l.item_id != item_id))
  }

  /// Set the quantity of a line; 0 removes it.
  pub fn update_quantity(&self, item_id: &str, quantity: u32) -> bool {
    self.set_state(|state| {
      if let Some(line) = state.lines.iter_mut().find(|l| l.item_id == item_id) {
        line.quantity = quantity;
      }
    })
  }

  pub fn clear(&self) {
    self.set_state(|state| state.lines.clear());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn menu_item(id: &str, cents: i64, available: bool) -> MenuItem {
    MenuItem {
      item_id: id.to_string(),
      name: format!("Item {}", id),
      price: Money::from_cents(cents),
      is_available: available,
      description: None,
      category: None,
      image: None,
    }
  }

  #[test]
  fn test_add_merges_same_item() {
    let cart = CartStore::in_memory();
    assert_eq!(cart.add_item("r1", None, &menu_item("i1", 1000, true), 1), AddOutcome::Added);
    assert_eq!(cart.add_item("r1", None, &menu_item("i1", 1000, true), 2), AddOutcome::Merged);

    let state = cart.get_state();
    assert_eq!(state.lines.len(), 1);
    assert_eq!(state.item_count(), 3);
    assert_eq!(state.subtotal(), Money::from_cents(3000));
  }

  #[test]
  fn test_other_restaurant_starts_new_cart() {
    let cart = CartStore::in_memory();
    cart.add_item("r1", Some("Thai Corner"), &menu_item("i1", 1000, true), 1);
    let outcome = cart.add_item("r2", Some("Burger Barn"), &menu_item("b1", 800, true), 1);

    assert_eq!(
      outcome,
      AddOutcome::StartedNewCart {
        previous_restaurant: "r1".to_string()
      }
    );
    let state = cart.get_state();
    assert_eq!(state.restaurant_id.as_deref(), Some("r2"));
    assert_eq!(state.restaurant_name.as_deref(), Some("Burger Barn"));
    assert_eq!(state.lines.len(), 1);
  }

  #[test]
  fn test_unavailable_item_not_added() {
    let cart = CartStore::in_memory();
    assert_eq!(
      cart.add_item("r1", None, &menu_item("i1", 1000, false), 1),
      AddOutcome::Unavailable
    );
    assert!(cart.get_state().is_empty());
  }

  #[test]
  fn test_zero_quantity_removes_and_empty_cart_forgets_restaurant() {
    let cart = CartStore::in_memory();
    cart.add_item("r1", None, &menu_item("i1", 1000, true), 1);
    assert!(cart.update_quantity("i1", 0));

    let state = cart.get_state();
    assert!(state.is_empty());
    assert_eq!(state.restaurant_id, None);
  }

  #[test]
  fn test_noop_update_does_not_notify() {
    let cart = CartStore::in_memory();
    let rx = cart.subscribe();
    assert!(!cart.remove_item("missing"));
    assert!(!rx.has_changed().unwrap());
  }

  #[tokio::test]
  async fn test_subscribers_see_changes() {
    let cart = CartStore::in_memory();
    let mut rx = cart.subscribe();
    cart.add_item("r1", None, &menu_item("i1", 1000, true), 1);
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow().lines.len(), 1);
  }

  #[test]
  fn test_changes_are_persisted() {
    let storage = Arc::new(MemoryCartStorage::default());
    let cart = CartStore::open(storage.clone());
    cart.add_item("r1", None, &menu_item("i1", 1000, true), 2);

    let reopened = CartStore::open(storage);
    assert_eq!(reopened.get_state().item_count(), 2);
  }

  #[test]
  fn test_concurrent_changes_save_the_latest_cart() {
    let storage = Arc::new(MemoryCartStorage::default());
    let cart = CartStore::open(storage.clone());

    let workers: Vec<_> = (0..4)
      .map(|n| {
        let cart = cart.clone();
        std::thread::spawn(move || {
          for _ in 0..50 {
            cart.add_item("r1", None, &menu_item(&format!("i{}", n), 100, true), 1);
          }
        })
      })
      .collect();
    for worker in workers {
      worker.join().unwrap();
    }

    assert_eq!(cart.get_state().item_count(), 200);
    assert_eq!(storage.load().unwrap(), Some(cart.get_state()));
  }

  #[test]
  fn test_merged_quantity_saturates() {
    let cart = CartStore::in_memory();
    cart.add_item("r1", None, &menu_item("i1", 1000, true), u32::MAX - 1);
    assert_eq!(cart.add_item("r1", None, &menu_item("i1", 1000, true), 5), AddOutcome::Merged);
    assert_eq!(cart.get_state().lines[0].quantity, u32::MAX);
  }
}
