//! Thin typed wrappers over the trading-assistant HTTP API.

pub mod types;

pub use types::{
  ApiEnvelope, Coin, CoinQuery, Dashboard, MarketAlert, Recommendation, SignalAction,
  TradingSignal,
};

use color_eyre::{eyre::eyre, Result};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::worker::{Fetch, Request};

/// API client. Requests go through whatever transport it is given, normally
/// the service worker handle.
#[derive(Clone)]
pub struct ApiClient {
  base: Url,
  transport: Arc<dyn Fetch>,
  token: Option<String>,
}

impl ApiClient {
  pub fn new(base: Url, transport: Arc<dyn Fetch>) -> Self {
    Self {
      base,
      transport,
      token: None,
    }
  }

  /// Send `Authorization: Bearer <token>` with every request.
  pub fn with_token(mut self, token: Option<String>) -> Self {
    self.token = token;
    self
  }

  pub fn base(&self) -> &Url {
    &self.base
  }

  pub fn health_url(&self) -> Result<Url> {
    self.endpoint("/api/health", &[])
  }

  pub async fn get_dashboard(&self, user_id: &str) -> Result<Dashboard> {
    let url = self.endpoint(&format!("/api/dashboard/{}", user_id), &[])?;
    self.get(url).await
  }

  pub async fn get_trading_signals(
    &self,
    user_id: &str,
    strategy: &str,
  ) -> Result<Vec<TradingSignal>> {
    let url = self.endpoint(
      "/api/signals",
      &[("user_id", user_id), ("strategy", strategy)],
    )?;
    self.get(url).await
  }

  pub async fn get_recommendations(&self, user_id: &str) -> Result<Vec<Recommendation>> {
    let url = self.endpoint(&format!("/api/recommendations/{}", user_id), &[])?;
    self.get(url).await
  }

  pub async fn get_coins(&self, query: &CoinQuery) -> Result<Vec<Coin>> {
    let search = query.search_term();
    let url = self.endpoint(
      "/api/coins",
      &[
        ("search", search.as_str()),
        ("sort_by", query.sort_by.as_str()),
        ("sort_order", query.sort_order.as_str()),
        ("filter_by", query.filter_by.as_str()),
      ],
    )?;
    self.get(url).await
  }

  fn endpoint(&self, path: &str, query: &[(&str, &str)]) -> Result<Url> {
    let mut url = self
      .base
      .join(path)
      .map_err(|e| eyre!("Invalid API path {}: {}", path, e))?;
    if !query.is_empty() {
      url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
  }

  async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
    let endpoint = url.path().to_string();
    let mut request = Request::get(url).header("accept", "application/json");
    if let Some(token) = &self.token {
      request = request.header("authorization", &format!("Bearer {}", token));
    }

    debug!(endpoint = %endpoint, "API request");
    let response = self.transport.fetch(request).await?;

    let envelope: ApiEnvelope<T> = match response.parse_json() {
      Ok(envelope) => envelope,
      Err(_) if !response.is_success() => {
        return Err(eyre!("{} returned status {}", endpoint, response.status));
      }
      Err(e) => return Err(eyre!("{}: {}", endpoint, e)),
    };
    envelope.into_result(&endpoint)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::worker::testing::FakeNetwork;
  use crate::worker::Response;
  use serde_json::json;

  fn client(net: &FakeNetwork) -> ApiClient {
    ApiClient::new(
      Url::parse("https://api.example.com").unwrap(),
      Arc::new(net.clone()),
    )
  }

  #[tokio::test]
  async fn test_signals_query_string() {
    let net = FakeNetwork::new();
    net.respond(
      "https://api.example.com/api/signals?user_id=u1&strategy=swing",
      Response::json(
        200,
        &json!({
          "success": true,
          "data": [{"id": "s1", "symbol": "ETH", "action": "BUY", "confidence": 0.7, "price": 3000.0}]
        }),
      ),
    );

    let signals = client(&net).get_trading_signals("u1", "swing").await.unwrap();
    assert_eq!(signals.len(), 1);
    assert_eq!(signals[0].symbol, "ETH");
  }

  #[tokio::test]
  async fn test_coin_query_params() {
    let net = FakeNetwork::new();
    net.respond(
      "https://api.example.com/api/coins?search=btc&sort_by=market_cap&sort_order=desc&filter_by=",
      Response::json(200, &json!({"success": true, "data": []})),
    );
    let query = CoinQuery {
      search: "  BTC ".into(),
      ..CoinQuery::default()
    };

    // the request carries the same normalized term as the cache key
    assert!(client(&net).get_coins(&query).await.unwrap().is_empty());
    assert_eq!(net.calls(), 1);
  }

  #[tokio::test]
  async fn test_degraded_response_is_error() {
    let net = FakeNetwork::new();
    net.respond(
      "https://api.example.com/api/dashboard/u1",
      Response::degraded("Network unavailable"),
    );
    let err = client(&net).get_dashboard("u1").await.unwrap_err();
    assert!(err.to_string().contains("Network unavailable"));
  }

  #[tokio::test]
  async fn test_non_json_error_status() {
    let net = FakeNetwork::new();
    let err = client(&net).get_recommendations("u1").await.unwrap_err();
    assert!(err.to_string().contains("404"));
  }

  #[test]
  fn test_health_url() {
    let net = FakeNetwork::new();
    assert_eq!(
      client(&net).health_url().unwrap().as_str(),
      "https://api.example.com/api/health"
    );
  }
}
