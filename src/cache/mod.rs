//! Resource cache shared by every reader of server state.
//!
//! This module provides:
//! - A documented key schema (resource type + filter parameters)
//! - Per-key staleness with explicit invalidation
//! - In-flight de-duplication and cancellation of fetches
//! - Basic offline mode (serve stale data when the network is unavailable)
//!
//! Writes outside of fetches come from the mutation runner and explicit
//! invalidation calls only.

mod client;
mod entry;
mod key;

pub use client::{CacheEvent, CacheEventKind, CacheOptions, QueryClient};
pub use entry::{CacheEntry, CacheResult, CacheSource};
pub use key::{normalize_code, QueryKey, Resource};
