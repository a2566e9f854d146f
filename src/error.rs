//! Error taxonomy for backend calls.
//!
//! The mutation runner treats every variant the same for rollback purposes;
//! the variant only decides what the user is told.

use std::time::Duration;

/// Failure of a single call against the REST backend.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
  /// No response reached us (connect failure, timeout, dropped connection).
  #[error("network error: {0}")]
  Network(String),
  /// The backend understood the request and refused it (4xx other than 401/403/409).
  #[error("{message}")]
  Rejected { status: u16, message: String },
  /// Another actor got there first (e.g. an order already accepted by a driver).
  #[error("{0}")]
  Conflict(String),
  /// Missing or expired credentials.
  #[error("not authorized: {0}")]
  Unauthorized(String),
  /// The backend answered with a body we could not understand, or a 5xx.
  #[error("unexpected response: {0}")]
  Server(String),
}

/// Coarse classification used by callers deciding between retry and redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  Transient,
  Validation,
  Conflict,
  Authorization,
}

impl ApiError {
  /// Classify an HTTP status code and backend-provided message.
  pub fn from_status(status: u16, message: impl Into<String>) -> Self {
    let message = message.into();
    match status {
      401 | 403 => Self::Unauthorized(message),
      409 => Self::Conflict(message),
      400..=499 => Self::Rejected { status, message },
      _ => Self::Server(message),
    }
  }

  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Network(_) | Self::Server(_) => ErrorKind::Transient,
      Self::Rejected { .. } => ErrorKind::Validation,
      Self::Conflict(_) => ErrorKind::Conflict,
      Self::Unauthorized(_) => ErrorKind::Authorization,
    }
  }

  pub fn is_retryable(&self) -> bool {
    self.kind() == ErrorKind::Transient
  }

  /// Message suitable for a toast.
  ///
  /// Structured rejections from the backend are shown verbatim; transport
  /// failures get a generic retryable message.
  pub fn user_message(&self) -> String {
    match self {
      Self::Network(_) | Self::Server(_) => {
        "Network error. Please check your connection and try again.".to_string()
      }
      Self::Rejected { message, .. } | Self::Conflict(message) => message.clone(),
      Self::Unauthorized(_) => "Your session has expired. Please sign in again.".to_string(),
    }
  }
}

impl From<reqwest::Error> for ApiError {
  fn from(err: reqwest::Error) -> Self {
    if err.is_decode() {
      return Self::Server(err.to_string());
    }
    match err.status() {
      Some(status) => Self::from_status(status.as_u16(), err.to_string()),
      None => Self::Network(err.to_string()),
    }
  }
}

impl From<serde_json::Error> for ApiError {
  fn from(err: serde_json::Error) -> Self {
    Self::Server(format!("failed to decode payload: {}", err))
  }
}

/// Default display time for error toasts.
pub const ERROR_TOAST_DURATION: Duration = Duration::from_secs(5);
