//! Ready-made watches for the API resources worth polling.

use crate::api::{ApiClient, Coin, CoinQuery, Dashboard, MarketAlert, Recommendation, TradingSignal};
use crate::cache::QueryKey;
use crate::notify::{Action, Notification, NotificationKind, Priority};

use super::Watch;

/// Price move, in percent between two ticks, that raises a price alert.
pub const DEFAULT_PRICE_MOVE_PCT: f64 = 5.0;

pub fn trading_signals(
  api: ApiClient,
  user_id: &str,
  strategy: &str,
) -> Watch<Vec<TradingSignal>, TradingSignal> {
  let key = QueryKey::trading_signals(user_id, strategy);
  let (user_id, strategy) = (user_id.to_string(), strategy.to_string());

  Watch::list(
    key,
    move || {
      let (api, user_id, strategy) = (api.clone(), user_id.clone(), strategy.clone());
      async move { api.get_trading_signals(&user_id, &strategy).await }
    },
    |s: &TradingSignal| s.id.clone(),
  )
  .announce(signal_notification)
}

pub fn recommendations(api: ApiClient, user_id: &str) -> Watch<Vec<Recommendation>, Recommendation> {
  let key = QueryKey::recommendations(user_id);
  let user_id = user_id.to_string();

  Watch::list(
    key,
    move || {
      let (api, user_id) = (api.clone(), user_id.clone());
      async move { api.get_recommendations(&user_id).await }
    },
    |r: &Recommendation| r.id.clone(),
  )
  .announce(|r| {
    Notification::new(
      NotificationKind::MarketUpdate,
      format!("New recommendation: {}", r.symbol),
      format!("{} {} ({:.0}% confidence). {}", r.action, r.symbol, r.confidence * 100.0, r.reason)
        .trim_end()
        .to_string(),
    )
  })
}

/// Coin list watch that raises a price alert when a coin moves by at least
/// `threshold_pct` between two ticks.
pub fn coins(api: ApiClient, query: CoinQuery, threshold_pct: f64) -> Watch<Vec<Coin>, Coin> {
  let key = query.key();

  Watch::list(
    key,
    move || {
      let (api, query) = (api.clone(), query.clone());
      async move { api.get_coins(&query).await }
    },
    |c: &Coin| c.id.clone(),
  )
  .on_change(move |before, after| price_alert(before, after, threshold_pct))
}

/// Watches the alerts embedded in the dashboard payload.
pub fn dashboard_alerts(api: ApiClient, user_id: &str) -> Watch<Dashboard, MarketAlert> {
  let key = QueryKey::dashboard(user_id);
  let user_id = user_id.to_string();

  Watch::new(
    key,
    move || {
      let (api, user_id) = (api.clone(), user_id.clone());
      async move { api.get_dashboard(&user_id).await }
    },
    |d: &Dashboard| d.alerts.clone(),
    |a: &MarketAlert| a.id.clone(),
  )
  .announce(|a| {
    let priority = match a.severity.as_str() {
      "critical" => Priority::Critical,
      "high" => Priority::High,
      _ => Priority::Normal,
    };
    Notification::new(NotificationKind::MarketUpdate, a.title.clone(), a.message.clone())
      .with_priority(priority)
  })
}

fn signal_notification(s: &TradingSignal) -> Notification {
  let mut message = format!(
    "{} {} at ${:.2} ({:.0}% confidence)",
    s.action,
    s.symbol,
    s.price,
    s.confidence * 100.0
  );
  if let Some(target) = s.target_price {
    message.push_str(&format!(", target ${:.2}", target));
  }

  Notification::new(
    NotificationKind::TradingSignal,
    format!("New {} signal: {}", s.action, s.symbol),
    message,
  )
  .with_action(Action::new("View", format!("view-signal:{}", s.id)))
}

fn price_alert(before: &Coin, after: &Coin, threshold_pct: f64) -> Option<Notification> {
  if before.current_price <= 0.0 {
    return None;
  }
  let change = (after.current_price - before.current_price) / before.current_price * 100.0;
  if change.abs() < threshold_pct {
    return None;
  }

  let direction = if change > 0.0 { "up" } else { "down" };
  Some(
    Notification::new(
      NotificationKind::PriceAlert,
      format!("{} is {} {:.1}%", after.symbol.to_uppercase(), direction, change.abs()),
      format!(
        "{} moved from ${:.2} to ${:.2}",
        after.name, before.current_price, after.current_price
      ),
    )
    .with_action(Action::new("View", format!("view-coin:{}", after.id))),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::api::SignalAction;

  fn coin(price: f64) -> Coin {
    Coin {
      id: "bitcoin".into(),
      symbol: "btc".into(),
      name: "Bitcoin".into(),
      current_price: price,
      price_change_percentage_24h: None,
      market_cap: None,
      total_volume: None,
    }
  }

  #[test]
  fn test_price_alert_threshold() {
    assert!(price_alert(&coin(100.0), &coin(104.9), 5.0).is_none());

    let up = price_alert(&coin(100.0), &coin(106.0), 5.0).unwrap();
    assert_eq!(up.kind, NotificationKind::PriceAlert);
    assert_eq!(up.title, "BTC is up 6.0%");

    let down = price_alert(&coin(100.0), &coin(90.0), 5.0).unwrap();
    assert_eq!(down.title, "BTC is down 10.0%");
  }

  #[test]
  fn test_price_alert_ignores_zero_base() {
    assert!(price_alert(&coin(0.0), &coin(10.0), 5.0).is_none());
  }

  #[test]
  fn test_signal_notification_text() {
    let signal = TradingSignal {
      id: "s9".into(),
      symbol: "SOL".into(),
      action: SignalAction::Buy,
      confidence: 0.82,
      price: 150.0,
      target_price: Some(165.0),
      stop_loss: None,
      strategy: "swing".into(),
      reasoning: None,
      timestamp: String::new(),
    };
    let n = signal_notification(&signal);
    assert_eq!(n.kind, NotificationKind::TradingSignal);
    assert_eq!(n.title, "New BUY signal: SOL");
    assert_eq!(n.message, "BUY SOL at $150.00 (82% confidence), target $165.00");
    assert_eq!(n.actions[0].action, "view-signal:s9");
  }
}
