//! Observable status of the last run of a mutation.
//!
//! Lets a UI render "saving…", disable a button while a write is pending, or
//! show an error next to a field, without owning the future itself.

use std::future::Future;
use tokio::sync::watch;

use crate::error::ApiError;

/// The state of a mutation
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<R> {
  /// Never run, or reset
  Idle,
  /// Write dispatched, waiting for the backend
  Pending,
  /// Last run succeeded
  Success(R),
  /// Last run failed (the cache has already been rolled back)
  Error(String),
}

impl<R> MutationState<R> {
  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Pending)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, MutationState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, MutationState::Error(_))
  }

  pub fn data(&self) -> Option<&R> {
    match self {
      MutationState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn error(&self) -> Option<&str> {
    match self {
      MutationState::Error(e) => Some(e),
      _ => None,
    }
  }
}

/// Tracks the status of successive runs of one kind of mutation.
pub struct TrackedMutation<R> {
  state: watch::Sender<MutationState<R>>,
}

impl<R: Clone + Send + Sync + 'static> TrackedMutation<R> {
  pub fn new() -> Self {
    let (state, _) = watch::channel(MutationState::Idle);
    Self { state }
  }

  /// Run `write` and record its progress.
  pub async fn mutate<Fut>(&self, write: Fut) -> Result<R, ApiError>
  where
    Fut: Future<Output = Result<R, ApiError>>,
  {
    self.state.send_replace(MutationState::Pending);
    let result = write.await;
    self.state.send_replace(match &result {
      Ok(data) => MutationState::Success(data.clone()),
      Err(e) => MutationState::Error(e.user_message()),
    });
    result
  }

  pub fn state(&self) -> MutationState<R> {
    self.state.borrow().clone()
  }

  pub fn subscribe(&self) -> watch::Receiver<MutationState<R>> {
    self.state.subscribe()
  }

  pub fn is_pending(&self) -> bool {
    self.state.borrow().is_pending()
  }

  pub fn is_error(&self) -> bool {
    self.state.borrow().is_error()
  }

  pub fn reset(&self) {
    self.state.send_replace(MutationState::Idle);
  }
}

impl<R: Clone + Send + Sync + 'static> Default for TrackedMutation<R> {
  fn default() -> Self {
    Self::new()
  }
}
