//! Client core for a food-delivery app: a shared resource cache with
//! optimistic mutations, a cart that stays consistent with live menus, and
//! push-based order tracking.

pub mod api;
pub mod app;
pub mod cache;
pub mod cart;
pub mod commands;
pub mod config;
pub mod error;
pub mod event;
pub mod live;
pub mod logging;
pub mod mutation;
pub mod notify;
