//! Request and response bodies that only exist on the wire.

use serde::{Deserialize, Serialize};

use super::types::{Money, OrderStatus};

/// Error body returned by the backend on 4xx/5xx responses.
///
/// Different endpoints use either `message` or `error` for the text.
#[derive(Debug, Default, Deserialize)]
pub struct ApiErrorBody {
  #[serde(default)]
  pub message: Option<String>,
  #[serde(default)]
  pub error: Option<String>,
}

impl ApiErrorBody {
  /// Best human-readable text for this body, falling back to the raw response.
  pub fn into_message(self, raw: &str, status: u16) -> String {
    self
      .message
      .or(self.error)
      .filter(|m| !m.trim().is_empty())
      .unwrap_or_else(|| {
        let raw = raw.trim();
        if raw.is_empty() {
          format!("request failed with status {}", status)
        } else {
          raw.to_string()
        }
      })
  }
}

#[derive(Debug, Serialize)]
pub struct ApiStatusUpdate {
  pub status: OrderStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPromoRequest<'a> {
  pub code: &'a str,
  pub subtotal: Money,
}

/// Some list endpoints wrap their payload, others return a bare array.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ApiList<T> {
  Wrapped { data: Vec<T> },
  Bare(Vec<T>),
}

impl<T> ApiList<T> {
  pub fn into_vec(self) -> Vec<T> {
    match self {
      ApiList::Wrapped { data } => data,
      ApiList::Bare(items) => items,
    }
  }
}
