//! Cart vs. menu classification.
//!
//! Everything here is pure: the same cart and menu always give the same
//! result. Applying the result to the store and telling the user about it is
//! [`CartSync`](super::CartSync)'s job.

use serde::Serialize;

use crate::api::{MenuSnapshot, Money};

use super::store::CartLine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceChange {
  pub item_id: String,
  pub name: String,
  pub old_price: Money,
  pub new_price: Money,
}

/// What reconciling a cart against a menu found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationResult {
  /// False when anything would have to be removed before checkout
  pub valid: bool,
  /// Items no longer on the menu at all
  pub removed_items: Vec<String>,
  /// Items on the menu but not orderable right now
  pub unavailable_items: Vec<String>,
  pub price_changed_items: Vec<PriceChange>,
}

impl ReconciliationResult {
  /// Nothing to reconcile.
  pub fn clean() -> Self {
    Self {
      valid: true,
      removed_items: Vec::new(),
      unavailable_items: Vec::new(),
      price_changed_items: Vec::new(),
    }
  }

  pub fn has_changes(&self) -> bool {
    !self.removed_items.is_empty()
      || !self.unavailable_items.is_empty()
      || !self.price_changed_items.is_empty()
  }
}

impl Default for ReconciliationResult {
  fn default() -> Self {
    Self::clean()
  }
}

/// How one cart line compares to the menu. First match wins, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineVerdict {
  Removed,
  Unavailable,
  PriceChanged { new_price: Money },
  Unchanged,
}

pub fn classify(line: &CartLine, menu: &MenuSnapshot) -> LineVerdict {
  match menu.find(&line.item_id) {
    None => LineVerdict::Removed,
    Some(item) if !item.is_available => LineVerdict::Unavailable,
    Some(item) if item.price != line.price => LineVerdict::PriceChanged {
      new_price: item.price,
    },
    Some(_) => LineVerdict::Unchanged,
  }
}

/// A reconciliation result together with the cart lines that should remain.
#[derive(Debug, Clone, PartialEq)]
pub struct Reconciliation {
  pub result: ReconciliationResult,
  /// Removed and unavailable lines stripped, changed prices updated
  pub lines: Vec<CartLine>,
}

/// Compare cart lines against the latest menu.
///
/// An empty cart or a missing menu reconciles to a clean, valid result with
/// the lines untouched.
pub fn reconcile(lines: &[CartLine], menu: Option<&MenuSnapshot>) -> Reconciliation {
  let menu = match menu {
    Some(menu) if !lines.is_empty() => menu,
    _ => {
      return Reconciliation {
        result: ReconciliationResult::clean(),
        lines: lines.to_vec(),
      }
    }
  };

  let mut result = ReconciliationResult::clean();
  let mut kept = Vec::with_capacity(lines.len());

  for line in lines {
    match classify(line, menu) {
      LineVerdict::Removed => result.removed_items.push(line.item_id.clone()),
      LineVerdict::Unavailable => result.unavailable_items.push(line.item_id.clone()),
      LineVerdict::PriceChanged { new_price } => {
        result.price_changed_items.push(PriceChange {
          item_id: line.item_id.clone(),
          name: line.name.clone(),
          old_price: line.price,
          new_price,
        });
        kept.push(CartLine {
          price: new_price,
          ..line.clone()
        });
      }
      LineVerdict::Unchanged => kept.push(line.clone()),
    }
  }

  result.valid = result.removed_items.is_empty() && result.unavailable_items.is_empty();

  Reconciliation {
    result,
    lines: kept,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::MenuItem;
  use std::collections::HashSet;

  fn line(id: &str, cents: i64) -> CartLine {
    CartLine {
      item_id: id.to_string(),
      name: format!("Item {}", id),
      price: Money::from_cents(cents),
      quantity: 1,
      image: None,
    }
  }

  fn item(id: &str, cents: i64, available: bool) -> MenuItem {
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

  fn menu(items: Vec<MenuItem>) -> MenuSnapshot {
    MenuSnapshot {
      restaurant_id: "r1".to_string(),
      restaurant_name: None,
      items,
    }
  }

  #[test]
  fn test_price_change_keeps_line_with_new_price() {
    let cart = vec![line("i1", 1000)];
    let menu = menu(vec![item("i1", 1200, true)]);

    let rec = reconcile(&cart, Some(&menu));
    assert!(rec.result.valid);
    assert!(rec.result.removed_items.is_empty());
    assert!(rec.result.unavailable_items.is_empty());
    assert_eq!(
      rec.result.price_changed_items,
      vec![PriceChange {
        item_id: "i1".to_string(),
        name: "Item i1".to_string(),
        old_price: Money::from_cents(1000),
        new_price: Money::from_cents(1200),
      }]
    );
    assert_eq!(rec.lines[0].price, Money::from_cents(1200));
  }

  #[test]
  fn test_removed_and_unavailable_are_stripped() {
    let cart = vec![line("i1", 1000), line("i2", 500)];
    let menu = menu(vec![item("i1", 1000, false)]);

    let rec = reconcile(&cart, Some(&menu));
    assert!(!rec.result.valid);
    assert_eq!(rec.result.unavailable_items, vec!["i1"]);
    assert_eq!(rec.result.removed_items, vec!["i2"]);
    assert!(rec.lines.is_empty());
  }

  #[test]
  fn test_unavailable_wins_over_price_change() {
    let cart = vec![line("i1", 1000)];
    let menu = menu(vec![item("i1", 1500, false)]);

    let rec = reconcile(&cart, Some(&menu));
    assert_eq!(rec.result.unavailable_items, vec!["i1"]);
    assert!(rec.result.price_changed_items.is_empty());
  }

  #[test]
  fn test_empty_cart_or_missing_menu_is_clean() {
    let menu = menu(vec![item("i1", 1000, true)]);
    assert_eq!(reconcile(&[], Some(&menu)).result, ReconciliationResult::clean());

    let cart = vec![line("gone", 100)];
    let rec = reconcile(&cart, None);
    assert_eq!(rec.result, ReconciliationResult::clean());
    assert_eq!(rec.lines, cart);
  }

  #[test]
  fn test_same_inputs_same_result() {
    let cart = vec![line("i1", 1000), line("i2", 700), line("i3", 300)];
    let menu = menu(vec![item("i1", 1100, true), item("i3", 300, false)]);

    let first = reconcile(&cart, Some(&menu));
    let second = reconcile(&cart, Some(&menu));
    assert_eq!(first, second);
  }

  #[test]
  fn test_buckets_are_complete_and_disjoint() {
    let cart: Vec<CartLine> = (0..12).map(|n| line(&format!("i{}", n), 100 + n)).collect();
    // every third item missing, every fourth unavailable, odd ones repriced
    let items = (0..12)
      .filter(|n| n % 3 != 0)
      .map(|n| {
        let price = if n % 2 == 1 { 999 } else { 100 + n };
        item(&format!("i{}", n), price, n % 4 != 0)
      })
      .collect();
    let menu = menu(items);

    let rec = reconcile(&cart, Some(&menu));
    let removed: HashSet<_> = rec.result.removed_items.iter().cloned().collect();
    let unavailable: HashSet<_> = rec.result.unavailable_items.iter().cloned().collect();
    let repriced: HashSet<_> = rec
      .result
      .price_changed_items
      .iter()
      .map(|c| c.item_id.clone())
      .collect();

    for l in &cart {
      match menu.find(&l.item_id) {
        None => assert!(removed.contains(&l.item_id)),
        Some(i) if !i.is_available => assert!(unavailable.contains(&l.item_id)),
        _ => {}
      }
    }
    assert!(removed.is_disjoint(&unavailable));
    assert!(removed.is_disjoint(&repriced));
    assert!(unavailable.is_disjoint(&repriced));
    assert_eq!(rec.lines.len(), cart.len() - removed.len() - unavailable.len());
  }

  #[test]
  fn test_valid_ignores_price_changes() {
    let cart = vec![line("i1", 1000), line("i2", 1000)];
    let repriced = menu(vec![item("i1", 1, true), item("i2", 2, true)]);
    assert!(reconcile(&cart, Some(&repriced)).result.valid);

    let with_unavailable = menu(vec![item("i1", 1, true), item("i2", 1000, false)]);
    assert!(!reconcile(&cart, Some(&with_unavailable)).result.valid);
  }
}
