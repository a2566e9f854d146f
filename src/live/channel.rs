//! WebSocket transport for order status events, with reconnect backoff.

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};
use url::Url;

use crate::config::ReconnectConfig;

use super::bridge::{ChannelCommand, LiveStatusBridge};
use super::state::ChannelSignal;
use super::types::StatusEvent;

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ClientFrame<'a> {
  Subscribe {
    #[serde(rename = "orderId")]
    order_id: &'a str,
  },
  Unsubscribe {
    #[serde(rename = "orderId")]
    order_id: &'a str,
  },
}

impl ClientFrame<'_> {
  fn into_message(self) -> Option<Message> {
    match serde_json::to_string(&self) {
      Ok(text) => Some(Message::Text(text)),
      Err(e) => {
        warn!(error = %e, "failed to encode frame");
        None
      }
    }
  }
}

impl ChannelCommand {
  fn frame(&self) -> ClientFrame<'_> {
    match self {
      ChannelCommand::Subscribe(id) => ClientFrame::Subscribe { order_id: id },
      ChannelCommand::Unsubscribe(id) => ClientFrame::Unsubscribe { order_id: id },
    }
  }
}

/// Capped exponential backoff with jitter.
#[derive(Debug, Clone)]
pub struct Backoff {
  config: ReconnectConfig,
  current_ms: u64,
  attempts: u32,
}

impl Backoff {
  pub fn new(config: ReconnectConfig) -> Self {
    let current_ms = config.initial_ms;
    Self {
      config,
      current_ms,
      attempts: 0,
    }
  }

  /// Delay before the next attempt; grows the base for the one after.
  pub fn next_delay(&mut self) -> Duration {
    let delay = jittered(self.current_ms, self.config.jitter_ms);
    let next = (self.current_ms as f64 * self.config.multiplier) as u64;
    self.current_ms = next.min(self.config.max_ms);
    self.attempts += 1;
    Duration::from_millis(delay)
  }

  pub fn reset(&mut self) {
    self.current_ms = self.config.initial_ms;
    self.attempts = 0;
  }

  /// Out of attempts according to `max_attempts`.
  pub fn exhausted(&self) -> bool {
    self
      .config
      .max_attempts
      .is_some_and(|max| self.attempts >= max)
  }
}

fn jittered(base_ms: u64, jitter_ms: u64) -> u64 {
  if jitter_ms == 0 {
    return base_ms;
  }
  let nanos = SystemTime::now()
    .duration_since(UNIX_EPOCH)
    .unwrap_or_else(|_| Duration::from_nanos(0))
    .subsec_nanos() as u64;
  base_ms.saturating_add(nanos % jitter_ms)
}

/// Why a connected session ended.
enum SessionEnd {
  Dropped,
  /// Command stream closed
  Shutdown,
}

/// Push channel feeding a [`LiveStatusBridge`].
pub struct PushChannel {
  url: Url,
  token: Option<String>,
  reconnect: ReconnectConfig,
}

impl PushChannel {
  pub fn new(url: Url, reconnect: ReconnectConfig) -> Self {
    Self {
      url,
      token: None,
      reconnect,
    }
  }

  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  /// Run the channel on a background task. It stops on its own only when
  /// the reconnect budget runs out or the command stream closes; abort the
  /// handle to stop it otherwise.
  pub fn spawn(
    self,
    bridge: LiveStatusBridge,
    commands: mpsc::UnboundedReceiver<ChannelCommand>,
  ) -> JoinHandle<()> {
    tokio::spawn(self.run(bridge, commands))
  }

  async fn run(self, bridge: LiveStatusBridge, mut commands: mpsc::UnboundedReceiver<ChannelCommand>) {
    let mut backoff = Backoff::new(self.reconnect.clone());
    bridge.signal(ChannelSignal::Connect);

    loop {
      match self.connect().await {
        Ok(stream) => {
          backoff.reset();
          match session(stream, &bridge, &mut commands).await {
            SessionEnd::Shutdown => {
              bridge.signal(ChannelSignal::Closed);
              return;
            }
            SessionEnd::Dropped => {}
          }
        }
        Err(e) => warn!(url = %self.url, error = %e, "push channel connect failed"),
      }

      bridge.signal(ChannelSignal::Dropped);
      if backoff.exhausted() {
        warn!("push channel giving up");
        bridge.signal(ChannelSignal::GaveUp);
        return;
      }

      let delay = backoff.next_delay();
      debug!(delay_ms = delay.as_millis() as u64, "push channel reconnecting");
      let sleep = tokio::time::sleep(delay);
      tokio::pin!(sleep);
      // Commands issued while offline are covered by the resubscribe on
      // connect; only watch for the bridge going away.
      loop {
        tokio::select! {
          _ = &mut sleep => break,
          command = commands.recv() => {
            if command.is_none() {
              bridge.signal(ChannelSignal::Closed);
              return;
            }
          }
        }
      }
    }
  }

  async fn connect(
    &self,
  ) -> Result<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    tokio_tungstenite::tungstenite::Error,
  > {
    let mut request = self.url.as_str().into_client_request()?;
    if let Some(token) = &self.token {
      if let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token)) {
        request.headers_mut().insert("Authorization", value);
      }
    }
    let (stream, _) = tokio_tungstenite::connect_async(request).await?;
    Ok(stream)
  }
}

async fn session<S>(
  stream: tokio_tungstenite::WebSocketStream<S>,
  bridge: &LiveStatusBridge,
  commands: &mut mpsc::UnboundedReceiver<ChannelCommand>,
) -> SessionEnd
where
  S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
  let (mut sink, mut source) = stream.split();

  // Anything queued while offline is covered by the full resubscribe below
  while commands.try_recv().is_ok() {}

  let resubscribe = bridge.signal(ChannelSignal::Opened).unwrap_or_default();
  for order_id in &resubscribe {
    let frame = ClientFrame::Subscribe { order_id };
    if let Some(message) = frame.into_message() {
      if let Err(e) = sink.send(message).await {
        warn!(error = %e, "failed to resubscribe");
        return SessionEnd::Dropped;
      }
    }
  }
  debug!(orders = resubscribe.len(), "push channel subscribed");

  loop {
    tokio::select! {
      command = commands.recv() => {
        let Some(command) = command else {
          let _ = sink.send(Message::Close(None)).await;
          return SessionEnd::Shutdown;
        };
        if let Some(message) = command.frame().into_message() {
          if let Err(e) = sink.send(message).await {
            warn!(error = %e, "push channel send failed");
            return SessionEnd::Dropped;
          }
        }
      }
      message = source.next() => match message {
        Some(Ok(Message::Text(text))) => match serde_json::from_str::<StatusEvent>(&text) {
          Ok(event) => {
            bridge.apply_event(event);
          }
          Err(e) => debug!(error = %e, "ignoring unrecognised frame"),
        },
        Some(Ok(Message::Close(_))) | None => return SessionEnd::Dropped,
        Some(Ok(_)) => {}
        Some(Err(e)) => {
          warn!(error = %e, "push channel read failed");
          return SessionEnd::Dropped;
        }
      },
    }
  }
}
