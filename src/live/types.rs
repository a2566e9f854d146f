use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::api::{DriverInfo, DriverLocation, Order, OrderStatus};

/// One push event. The backend always sends the complete current state of
/// the order, never a delta.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
  pub order_id: String,
  pub status: OrderStatus,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub driver_info: Option<DriverInfo>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub driver_location: Option<DriverLocation>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub estimated_arrival: Option<DateTime<Utc>>,
  #[serde(deserialize_with = "timestamp")]
  pub timestamp: DateTime<Utc>,
}

/// Accept both RFC 3339 strings and epoch milliseconds.
fn timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Wire {
    Millis(i64),
    Text(DateTime<Utc>),
  }

  match Wire::deserialize(deserializer)? {
    Wire::Text(t) => Ok(t),
    Wire::Millis(ms) => Utc
      .timestamp_millis_opt(ms)
      .single()
      .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
  }
}

/// Latest live state of one order.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveStatusRecord {
  pub status: OrderStatus,
  pub driver_info: Option<DriverInfo>,
  pub driver_location: Option<DriverLocation>,
  pub estimated_arrival: Option<DateTime<Utc>>,
  pub last_update: DateTime<Utc>,
}

impl From<StatusEvent> for LiveStatusRecord {
  fn from(event: StatusEvent) -> Self {
    Self {
      status: event.status,
      driver_info: event.driver_info,
      driver_location: event.driver_location,
      estimated_arrival: event.estimated_arrival,
      last_update: event.timestamp,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
  /// From the push channel
  Live,
  /// From the last fetch of the order
  Fetched,
}

/// What a tracking view shows for an order.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedOrder {
  pub order_id: String,
  pub status: OrderStatus,
  pub driver_info: Option<DriverInfo>,
  pub driver_location: Option<DriverLocation>,
  pub estimated_arrival: Option<DateTime<Utc>>,
  pub last_update: Option<DateTime<Utc>>,
  pub source: StatusSource,
}

impl TrackedOrder {
  pub fn from_live(order_id: &str, record: &LiveStatusRecord) -> Self {
    Self {
      order_id: order_id.to_string(),
      status: record.status,
      driver_info: record.driver_info.clone(),
      driver_location: record.driver_location,
      estimated_arrival: record.estimated_arrival,
      last_update: Some(record.last_update),
      source: StatusSource::Live,
    }
  }

  pub fn from_fetched(order: &Order) -> Self {
    Self {
      order_id: order.id.clone(),
      status: order.status,
      driver_info: order.driver_info.clone(),
      driver_location: order.driver_location,
      estimated_arrival: order.estimated_arrival,
      last_update: Some(order.updated_at),
      source: StatusSource::Fetched,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_event_with_iso_timestamp() {
    let json = r#"{
      "orderId": "o1",
      "status": "out_for_delivery",
      "driverInfo": {"id": "d1", "name": "Sam"},
      "driverLocation": {"lat": 52.52, "lng": 13.405},
      "timestamp": "2026-03-01T12:30:00Z"
    }"#;
    let event: StatusEvent = serde_json::from_str(json).unwrap();
    assert_eq!(event.status, OrderStatus::OutForDelivery);
    assert_eq!(event.driver_info.unwrap().name, "Sam");
    assert_eq!(event.timestamp.to_rfc3339(), "2026-03-01T12:30:00+00:00");
  }

  #[test]
  fn test_event_with_millis_timestamp() {
    let json = r#"{"orderId": "o1", "status": "preparing", "timestamp": 1772368200000}"#;
    let event: StatusEvent = serde_json::from_str(json).unwrap();
    assert_eq!(event.timestamp.timestamp_millis(), 1_772_368_200_000);
    assert!(event.driver_location.is_none());
  }

  #[test]
  fn test_record_replaces_every_field() {
    let event = StatusEvent {
      order_id: "o1".to_string(),
      status: OrderStatus::Delivered,
      driver_info: None,
      driver_location: None,
      estimated_arrival: None,
      timestamp: Utc::now(),
    };
    let record = LiveStatusRecord::from(event.clone());
    assert_eq!(record.status, OrderStatus::Delivered);
    assert_eq!(record.last_update, event.timestamp);
    assert!(record.driver_info.is_none());
  }
}
