//! Cart persistence trait and SQLite implementation.

use chrono::Utc;
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::api::Money;

use super::store::{CartLine, CartState};

/// Where the cart survives between runs.
pub trait CartStorage: Send + Sync {
  /// Load the saved cart, if any.
  fn load(&self) -> Result<Option<CartState>>;

  /// Replace the saved cart.
  fn save(&self, state: &CartState) -> Result<()>;
}

/// Storage that only lives as long as the process.
#[derive(Default)]
pub struct MemoryCartStorage {
  state: Mutex<Option<CartState>>,
}

impl CartStorage for MemoryCartStorage {
  fn load(&self) -> Result<Option<CartState>> {
    let state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    Ok(state.clone())
  }

  fn save(&self, cart: &CartState) -> Result<()> {
    let mut state = self
      .state
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;
    *state = Some(cart.clone());
    Ok(())
  }
}

/// SQLite-backed cart storage.
pub struct SqliteCartStorage {
  conn: Mutex<Connection>,
}

impl SqliteCartStorage {
  /// Open the cart database at the default location.
  pub fn open_default() -> Result<Self> {
    Self::open(&Self::default_path()?)
  }

  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cart directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cart database at {}: {}", path.display(), e))?;

    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;

    Ok(storage)
  }

  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("courier").join("cart.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    conn
      .execute_batch(CART_SCHEMA)
      .map_err(|e| eyre!("Failed to run cart migrations: {}", e))?;

    Ok(())
  }
}

const CART_SCHEMA: &str = r#"
-- Single row describing whose cart this is
CREATE TABLE IF NOT EXISTS cart_meta (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    restaurant_id TEXT,
    restaurant_name TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS cart_lines (
    position INTEGER NOT NULL,
    item_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    price_cents INTEGER NOT NULL,
    quantity INTEGER NOT NULL,
    image TEXT
);
"#;

impl CartStorage for SqliteCartStorage {
  fn load(&self) -> Result<Option<CartState>> {
    let conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let meta: Option<(Option<String>, Option<String>)> = conn
      .query_row(
        "SELECT restaurant_id, restaurant_name FROM cart_meta WHERE id = 1",
        [],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read cart: {}", e))?;

    let Some((restaurant_id, restaurant_name)) = meta else {
      return Ok(None);
    };

    let mut stmt = conn
      .prepare(
        "SELECT item_id, name, price_cents, quantity, image FROM cart_lines ORDER BY position",
      )
      .map_err(|e| eyre!("Failed to prepare cart query: {}", e))?;

    let lines = stmt
      .query_map([], |row| {
        Ok(CartLine {
          item_id: row.get(0)?,
          name: row.get(1)?,
          price: Money::from_cents(row.get(2)?),
          quantity: row.get(3)?,
          image: row.get(4)?,
        })
      })
      .map_err(|e| eyre!("Failed to query cart lines: {}", e))?
      .collect::<std::result::Result<Vec<_>, _>>()
      .map_err(|e| eyre!("Failed to read cart line: {}", e))?;

    Ok(Some(CartState {
      restaurant_id,
      restaurant_name,
      lines,
    }))
  }

  fn save(&self, state: &CartState) -> Result<()> {
    let mut conn = self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))?;

    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "INSERT OR REPLACE INTO cart_meta (id, restaurant_id, restaurant_name, updated_at)
       VALUES (1, ?1, ?2, ?3)",
      params![
        state.restaurant_id,
        state.restaurant_name,
        Utc::now().to_rfc3339()
      ],
    )
    .map_err(|e| eyre!("Failed to store cart: {}", e))?;

    tx.execute("DELETE FROM cart_lines", [])
      .map_err(|e| eyre!("Failed to clear cart lines: {}", e))?;

    for (position, line) in state.lines.iter().enumerate() {
      tx.execute(
        "INSERT INTO cart_lines (position, item_id, name, price_cents, quantity, image)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
          position as i64,
          line.item_id,
          line.name,
          line.price.cents(),
          line.quantity,
          line.image
        ],
      )
      .map_err(|e| eyre!("Failed to store cart line {}: {}", line.item_id, e))?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit cart: {}", e))?;

    Ok(())
  }
}
