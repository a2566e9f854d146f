//! Merging push events over fetched order state.
//!
//! The bridge keeps one [`LiveStatusRecord`] per subscribed order. What a
//! view shows is the live record when there is one, and otherwise whatever
//! the resource cache last fetched. A live record is only ever replaced by a
//! newer push event, so a slow refetch can't drag the view backwards.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::api::Order;
use crate::cache::{QueryClient, QueryKey};

use super::state::{ChannelSignal, ConnectionState};
use super::types::{LiveStatusRecord, StatusEvent, TrackedOrder};

/// What the transport should tell the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelCommand {
  Subscribe(String),
  Unsubscribe(String),
}

struct Tracked {
  subscribers: usize,
  record: watch::Sender<Option<LiveStatusRecord>>,
}

#[derive(Default)]
struct Inner {
  orders: HashMap<String, Tracked>,
}

/// Latest known status per tracked order, shared by every view.
#[derive(Clone)]
pub struct LiveStatusBridge {
  inner: Arc<Mutex<Inner>>,
  connection: Arc<watch::Sender<ConnectionState>>,
  commands: mpsc::UnboundedSender<ChannelCommand>,
}

impl LiveStatusBridge {
  /// Create a bridge and the command stream its transport consumes.
  pub fn new() -> (Self, mpsc::UnboundedReceiver<ChannelCommand>) {
    let (commands, rx) = mpsc::unbounded_channel();
    let (connection, _) = watch::channel(ConnectionState::Disconnected);
    let bridge = Self {
      inner: Arc::new(Mutex::new(Inner::default())),
      connection: Arc::new(connection),
      commands,
    };
    (bridge, rx)
  }

  fn lock(&self) -> MutexGuard<'_, Inner> {
    self.inner.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start following an order. The order stays tracked until every
  /// returned guard is dropped.
  pub fn subscribe(&self, order_id: &str) -> OrderSubscription {
    let mut inner = self.lock();
    let tracked = inner.orders.entry(order_id.to_string()).or_insert_with(|| {
      debug!(order = order_id, "tracking order");
      let _ = self
        .commands
        .send(ChannelCommand::Subscribe(order_id.to_string()));
      Tracked {
        subscribers: 0,
        record: watch::channel(None).0,
      }
    });
    tracked.subscribers += 1;

    OrderSubscription {
      bridge: self.clone(),
      order_id: order_id.to_string(),
      updates: tracked.record.subscribe(),
    }
  }

  fn release(&self, order_id: &str) {
    let mut inner = self.lock();
    let Some(tracked) = inner.orders.get_mut(order_id) else {
      return;
    };
    tracked.subscribers = tracked.subscribers.saturating_sub(1);
    if tracked.subscribers == 0 {
      inner.orders.remove(order_id);
      debug!(order = order_id, "stopped tracking order");
      let _ = self
        .commands
        .send(ChannelCommand::Unsubscribe(order_id.to_string()));
    }
  }

  /// Take in one push event. Returns whether it changed anything.
  ///
  /// Events for orders nobody tracks, and events older than the record
  /// already held, are dropped.
  pub fn apply_event(&self, event: StatusEvent) -> bool {
    let inner = self.lock();
    let Some(tracked) = inner.orders.get(&event.order_id) else {
      debug!(order = %event.order_id, "event for untracked order");
      return false;
    };

    let order_id = event.order_id.clone();
    let record = LiveStatusRecord::from(event);
    tracked.record.send_if_modified(|current| match current {
      Some(existing) if existing.last_update > record.last_update => {
        debug!(order = %order_id, "ignoring out-of-order event");
        false
      }
      _ => {
        *current = Some(record);
        true
      }
    })
  }

  pub fn record(&self, order_id: &str) -> Option<LiveStatusRecord> {
    self
      .lock()
      .orders
      .get(order_id)
      .and_then(|t| t.record.borrow().clone())
  }

  /// Live record if any event arrived, otherwise the cached order.
  pub fn current(&self, order_id: &str, cache: &QueryClient) -> Option<TrackedOrder> {
    match self.record(order_id) {
      Some(record) => Some(TrackedOrder::from_live(order_id, &record)),
      None => cache
        .get_query_data::<Order>(&QueryKey::order(order_id))
        .map(|order| TrackedOrder::from_fetched(&order)),
    }
  }

  /// Every order with at least one subscriber, sorted.
  pub fn tracked_orders(&self) -> Vec<String> {
    let mut ids: Vec<String> = self.lock().orders.keys().cloned().collect();
    ids.sort();
    ids
  }

  pub fn connection(&self) -> watch::Receiver<ConnectionState> {
    self.connection.subscribe()
  }

  pub fn connection_state(&self) -> ConnectionState {
    *self.connection.borrow()
  }

  /// Feed a socket lifecycle event into the connection state machine.
  ///
  /// On every transition into `Connected` returns the orders the transport
  /// must subscribe to again. Live records survive disconnects.
  pub fn signal(&self, signal: ChannelSignal) -> Option<Vec<String>> {
    let mut entered = false;
    self.connection.send_if_modified(|state| {
      let next = state.on(signal);
      if next == *state {
        return false;
      }
      info!(from = %state, to = %next, "push channel");
      entered = next.is_connected();
      *state = next;
      true
    });
    entered.then(|| self.tracked_orders())
  }
}

/// Keeps one order tracked while alive.
pub struct OrderSubscription {
  bridge: LiveStatusBridge,
  order_id: String,
  updates: watch::Receiver<Option<LiveStatusRecord>>,
}

impl OrderSubscription {
  pub fn order_id(&self) -> &str {
    &self.order_id
  }

  pub fn latest(&self) -> Option<LiveStatusRecord> {
    self.updates.borrow().clone()
  }

  /// What to show for this order right now.
  pub fn current(&self, cache: &QueryClient) -> Option<TrackedOrder> {
    self.bridge.current(&self.order_id, cache)
  }

  /// Wait for the next live record.
  pub async fn changed(&mut self) -> Option<LiveStatusRecord> {
    self.updates.changed().await.ok()?;
    self.updates.borrow_and_update().clone()
  }
}

impl Drop for OrderSubscription {
  fn drop(&mut self) {
    self.bridge.release(&self.order_id);
  }
}
