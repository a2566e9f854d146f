use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::Config;
use crate::error::ApiError;

use super::api_types::{ApiErrorBody, ApiList, ApiPromoRequest, ApiStatusUpdate};
use super::types::{
  CreateOrderRequest, MenuItem, MenuItemPatch, MenuSnapshot, Money, Order, OrderScope, OrderStatus,
  PromoValidation,
};
use super::Backend;

/// REST API client for the delivery backend
#[derive(Clone)]
pub struct ApiClient {
  client: reqwest::Client,
  base_url: Url,
}

impl ApiClient {
  pub fn new(config: &Config) -> color_eyre::Result<Self> {
    let mut headers = HeaderMap::new();
    if let Some(token) = Config::get_api_token() {
      let mut value = HeaderValue::from_str(&format!("Bearer {}", token))?;
      value.set_sensitive(true);
      headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
      .timeout(Duration::from_millis(config.backend.request_timeout_ms))
      .default_headers(headers)
      .build()?;

    // Url::join drops the last path segment unless the base ends with '/'
    let mut base = config.backend.url.trim_end_matches('/').to_string();
    base.push('/');
    let base_url = Url::parse(&base)?;

    Ok(Self { client, base_url })
  }

  fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| ApiError::Network(format!("invalid endpoint {}: {}", path, e)))
  }

  async fn request<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
  where
    T: DeserializeOwned,
    B: Serialize + ?Sized,
  {
    let url = self.endpoint(path)?;
    debug!(%method, %url, "backend request");

    let mut request = self.client.request(method, url);
    if let Some(body) = body {
      request = request.json(body);
    }

    let response = request.send().await?;
    Self::decode(response).await
  }

  async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
      let bytes = response.bytes().await?;
      return Ok(serde_json::from_slice(&bytes)?);
    }

    let raw = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&raw).unwrap_or_default();
    Err(ApiError::from_status(
      status.as_u16(),
      body.into_message(&raw, status.as_u16()),
    ))
  }

  async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
    self.request::<T, ()>(Method::GET, path, None).await
  }
}

impl Backend for ApiClient {
  async fn get_menu(&self, restaurant_id: &str) -> Result<MenuSnapshot, ApiError> {
    self.get(&format!("restaurants/{}/menu", restaurant_id)).await
  }

  async fn get_order(&self, order_id: &str) -> Result<Order, ApiError> {
    self.get(&format!("orders/{}", order_id)).await
  }

  async fn list_orders(&self, scope: &OrderScope) -> Result<Vec<Order>, ApiError> {
    let path = match scope {
      OrderScope::Customer => "orders".to_string(),
      OrderScope::Restaurant { restaurant_id } => format!("restaurants/{}/orders", restaurant_id),
      OrderScope::Driver => "drivers/orders".to_string(),
    };
    let list: ApiList<Order> = self.get(&path).await?;
    Ok(list.into_vec())
  }

  async fn update_menu_item(
    &self,
    restaurant_id: &str,
    item_id: &str,
    patch: &MenuItemPatch,
  ) -> Result<MenuItem, ApiError> {
    let path = format!("restaurants/{}/menu/{}", restaurant_id, item_id);
    self.request(Method::PATCH, &path, Some(patch)).await
  }

  async fn create_order(&self, request: &CreateOrderRequest) -> Result<Order, ApiError> {
    self.request(Method::POST, "orders", Some(request)).await
  }

  async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<Order, ApiError> {
    let path = format!("orders/{}/status", order_id);
    self
      .request(Method::PATCH, &path, Some(&ApiStatusUpdate { status }))
      .await
  }

  async fn accept_order(&self, order_id: &str) -> Result<Order, ApiError> {
    let path = format!("drivers/orders/{}/accept", order_id);
    self.request::<Order, ()>(Method::POST, &path, None).await
  }

  async fn validate_promo(&self, code: &str, subtotal: Money) -> Result<PromoValidation, ApiError> {
    let body = ApiPromoRequest { code, subtotal };
    self.request(Method::POST, "promos/validate", Some(&body)).await
  }
}
