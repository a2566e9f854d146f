//! Customer cart.
//!
//! The cart lives outside the resource cache: it is local state the
//! customer owns, persisted across runs, and kept honest against the menu by
//! [`CartSync`].

mod reconcile;
mod storage;
mod store;
mod sync;

pub use reconcile::{classify, reconcile, LineVerdict, PriceChange, Reconciliation, ReconciliationResult};
pub use storage::{CartStorage, MemoryCartStorage, SqliteCartStorage};
pub use store::{AddOutcome, CartLine, CartState, CartStore};
pub use sync::{CartSync, CheckoutError};
