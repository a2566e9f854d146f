//! Live order tracking.
//!
//! [`LiveStatusBridge`] holds the latest pushed status per tracked order and
//! merges it over fetched state. [`PushChannel`] is the WebSocket transport
//! that feeds it and keeps subscriptions alive across reconnects.

mod bridge;
mod channel;
mod state;
mod types;

pub use bridge::{ChannelCommand, LiveStatusBridge, OrderSubscription};
pub use channel::{Backoff, PushChannel};
pub use state::{ChannelSignal, ConnectionState};
pub use types::{LiveStatusRecord, StatusEvent, StatusSource, TrackedOrder};
