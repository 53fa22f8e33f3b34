//! Response shapes of the trading-assistant API.
//!
//! Only the fields this crate reads are modelled; anything else in a payload
//! is ignored.

use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::cache::QueryKey;

/// Every endpoint wraps its payload in this envelope.
#[derive(Debug, Deserialize)]
pub struct ApiEnvelope<T> {
  #[serde(default)]
  pub success: bool,
  pub data: Option<T>,
  pub error: Option<String>,
}

impl<T> ApiEnvelope<T> {
  /// The payload of a successful envelope, otherwise the reported error.
  pub fn into_result(self, endpoint: &str) -> Result<T> {
    if !self.success {
      return Err(eyre!(
        "{} failed: {}",
        endpoint,
        self.error.as_deref().unwrap_or("unknown error")
      ));
    }
    self
      .data
      .ok_or_else(|| eyre!("{} returned no data", endpoint))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalAction {
  Buy,
  Sell,
  Hold,
}

impl fmt::Display for SignalAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      SignalAction::Buy => "BUY",
      SignalAction::Sell => "SELL",
      SignalAction::Hold => "HOLD",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
  pub id: String,
  pub symbol: String,
  pub action: SignalAction,
  /// 0.0 to 1.0
  #[serde(default)]
  pub confidence: f64,
  pub price: f64,
  pub target_price: Option<f64>,
  pub stop_loss: Option<f64>,
  #[serde(default)]
  pub strategy: String,
  pub reasoning: Option<String>,
  #[serde(default)]
  pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
  pub id: String,
  pub symbol: String,
  pub action: SignalAction,
  #[serde(default)]
  pub confidence: f64,
  #[serde(default)]
  pub reason: String,
  #[serde(default)]
  pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coin {
  pub id: String,
  pub symbol: String,
  pub name: String,
  pub current_price: f64,
  pub price_change_percentage_24h: Option<f64>,
  pub market_cap: Option<f64>,
  pub total_volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketAlert {
  pub id: String,
  pub title: String,
  #[serde(default)]
  pub message: String,
  #[serde(default)]
  pub severity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dashboard {
  #[serde(default)]
  pub portfolio_value: f64,
  #[serde(default)]
  pub daily_change: f64,
  #[serde(default)]
  pub active_signals: u32,
  #[serde(default)]
  pub alerts: Vec<MarketAlert>,
}

/// Search and ordering of the coin list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoinQuery {
  pub search: String,
  pub sort_by: String,
  pub sort_order: String,
  pub filter_by: String,
}

impl Default for CoinQuery {
  fn default() -> Self {
    Self {
      search: String::new(),
      sort_by: "market_cap".to_string(),
      sort_order: "desc".to_string(),
      filter_by: String::new(),
    }
  }
}

impl CoinQuery {
  /// Search input as sent and cached: trimmed and lowercased.
  pub fn search_term(&self) -> String {
    self.search.trim().to_lowercase()
  }

  pub fn key(&self) -> QueryKey {
    QueryKey::coins(&self.search_term(), &self.sort_by, &self.sort_order, &self.filter_by)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_envelope_success() {
    let envelope: ApiEnvelope<Vec<u32>> =
      serde_json::from_value(json!({"success": true, "data": [1, 2], "timestamp": "now"})).unwrap();
    assert_eq!(envelope.into_result("/api/x").unwrap(), vec![1, 2]);
  }

  #[test]
  fn test_coin_search_normalized_for_key() {
    let messy = CoinQuery {
      search: "  BTC ".into(),
      ..CoinQuery::default()
    };
    let clean = CoinQuery {
      search: "btc".into(),
      ..CoinQuery::default()
    };
    assert_eq!(messy.search_term(), "btc");
    assert_eq!(messy.key(), clean.key());
  }

  #[test]
  fn test_envelope_failure_carries_message() {
    let envelope: ApiEnvelope<Vec<u32>> =
      serde_json::from_value(json!({"success": false, "error": "rate limited"})).unwrap();
    let err = envelope.into_result("/api/x").unwrap_err();
    assert!(err.to_string().contains("rate limited"));
  }

  #[test]
  fn test_signal_action_wire_format() {
    let signal: TradingSignal = serde_json::from_value(json!({
      "id": "s1",
      "symbol": "BTC",
      "action": "SELL",
      "confidence": 0.8,
      "price": 64000.0
    }))
    .unwrap();
    assert_eq!(signal.action, SignalAction::Sell);
    assert!(signal.target_price.is_none());
  }
}
