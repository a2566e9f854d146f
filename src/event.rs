use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::live::{ConnectionState, OrderSubscription};

/// Events driving the `track` loop
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
  /// Periodic tick for polling while the push channel is down
  Tick,
  /// A live record arrived for this order
  Order(String),
  /// The push channel changed state
  Connection(ConnectionState),
  /// Ctrl-C
  Quit,
}

/// Merges ticks, live order updates and connection changes into one stream.
///
/// Owns the forwarding tasks; dropping the handler aborts them, which also
/// drops the order subscriptions they hold.
pub struct EventHandler {
  tx: mpsc::UnboundedSender<Event>,
  rx: mpsc::UnboundedReceiver<Event>,
  tasks: Vec<JoinHandle<()>>,
}

impl EventHandler {
  /// Create a new event handler with the given tick rate
  pub fn new(tick_rate: Duration) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    let ticks = tx.clone();
    let ticker = tokio::spawn(async move {
      let mut interval = tokio::time::interval(tick_rate);
      interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
      // the first tick completes immediately
      interval.tick().await;
      loop {
        interval.tick().await;
        if ticks.send(Event::Tick).is_err() {
          break;
        }
      }
    });

    Self {
      tx,
      rx,
      tasks: vec![ticker],
    }
  }

  /// Emit [`Event::Quit`] on Ctrl-C.
  pub fn listen_for_interrupt(&mut self) {
    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        let _ = tx.send(Event::Quit);
      }
    }));
  }

  /// Forward every live record of `subscription` as [`Event::Order`].
  pub fn watch_order(&mut self, mut subscription: OrderSubscription) {
    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      let order_id = subscription.order_id().to_string();
      while subscription.changed().await.is_some() {
        if tx.send(Event::Order(order_id.clone())).is_err() {
          break;
        }
      }
    }));
  }

  pub fn watch_connection(&mut self, mut connection: watch::Receiver<ConnectionState>) {
    let tx = self.tx.clone();
    self.tasks.push(tokio::spawn(async move {
      while connection.changed().await.is_ok() {
        let state = *connection.borrow_and_update();
        if tx.send(Event::Connection(state)).is_err() {
          break;
        }
      }
    }));
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

impl Drop for EventHandler {
  fn drop(&mut self) {
    for task in &self.tasks {
      task.abort();
    }
  }
}
