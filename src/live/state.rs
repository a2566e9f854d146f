//! Connection state machine of the push channel.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
  #[default]
  Disconnected,
  Connecting,
  Connected,
  /// Lost the connection (or never got one); `attempt` counts failures
  /// since the last successful connect
  Reconnecting { attempt: u32 },
}

/// Socket lifecycle events that drive [`ConnectionState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSignal {
  /// Start connecting
  Connect,
  /// Handshake completed
  Opened,
  /// Connect failed or an open connection went away
  Dropped,
  /// Out of reconnect attempts
  GaveUp,
  /// Shut down on purpose
  Closed,
}

impl ConnectionState {
  pub fn is_connected(self) -> bool {
    self == ConnectionState::Connected
  }

  /// The state after `signal`. Signals that make no sense in the current
  /// state leave it unchanged.
  pub fn on(self, signal: ChannelSignal) -> ConnectionState {
    use ChannelSignal as S;
    use ConnectionState as C;

    match (self, signal) {
      (_, S::Closed) => C::Disconnected,
      (C::Disconnected, S::Connect) => C::Connecting,
      (C::Connecting | C::Reconnecting { .. }, S::Opened) => C::Connected,
      (C::Connecting | C::Connected, S::Dropped) => C::Reconnecting { attempt: 1 },
      (C::Reconnecting { attempt }, S::Dropped) => C::Reconnecting {
        attempt: attempt.saturating_add(1),
      },
      (C::Reconnecting { .. }, S::GaveUp) => C::Disconnected,
      (state, _) => state,
    }
  }

  /// Label for a "tracking paused" style indicator.
  pub fn label(self) -> &'static str {
    match self {
      ConnectionState::Disconnected => "offline",
      ConnectionState::Connecting => "connecting",
      ConnectionState::Connected => "live",
      ConnectionState::Reconnecting { .. } => "reconnecting",
    }
  }
}

impl fmt::Display for ConnectionState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ConnectionState::Reconnecting { attempt } => write!(f, "reconnecting (attempt {})", attempt),
      other => f.write_str(other.label()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_happy_path() {
    let state = ConnectionState::default()
      .on(ChannelSignal::Connect)
      .on(ChannelSignal::Opened);
    assert!(state.is_connected());
  }

  #[test]
  fn test_drops_count_attempts_until_reopened() {
    let state = ConnectionState::Connected
      .on(ChannelSignal::Dropped)
      .on(ChannelSignal::Dropped)
      .on(ChannelSignal::Dropped);
    assert_eq!(state, ConnectionState::Reconnecting { attempt: 3 });
    assert_eq!(state.on(ChannelSignal::Opened), ConnectionState::Connected);
    assert_eq!(state.on(ChannelSignal::GaveUp), ConnectionState::Disconnected);
  }

  #[test]
  fn test_first_connect_failure_reconnects() {
    assert_eq!(
      ConnectionState::Connecting.on(ChannelSignal::Dropped),
      ConnectionState::Reconnecting { attempt: 1 }
    );
  }

  #[test]
  fn test_nonsense_signals_are_ignored() {
    assert_eq!(
      ConnectionState::Disconnected.on(ChannelSignal::Opened),
      ConnectionState::Disconnected
    );
    assert_eq!(
      ConnectionState::Connected.on(ChannelSignal::Connect),
      ConnectionState::Connected
    );
    assert_eq!(
      ConnectionState::Connected.on(ChannelSignal::GaveUp),
      ConnectionState::Connected
    );
  }

  #[test]
  fn test_close_from_anywhere() {
    for state in [
      ConnectionState::Connecting,
      ConnectionState::Connected,
      ConnectionState::Reconnecting { attempt: 4 },
    ] {
      assert_eq!(state.on(ChannelSignal::Closed), ConnectionState::Disconnected);
    }
  }
}
