use color_eyre::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::api::{ApiClient, CoinQuery};
use crate::cache::{CacheStore, QueryClient, QueryKey, StrategyTable};
use crate::config::Config;
use crate::db::Database;
use crate::network::{ConnectivityProbe, NetworkMonitor, NetworkState};
use crate::notify::{Notification, Notifier};
use crate::refresh::{watches, RefreshCoordinator};
use crate::worker::{BucketStorage, Fetch, HttpFetch, ServiceWorker};

const GC_EVERY: Duration = Duration::from_secs(60);

/// Everything `sigwatch watch` runs, wired together.
pub struct App {
  config: Config,
  notifier: Notifier,
  client: QueryClient,
  coordinator: RefreshCoordinator,
  api: ApiClient,
  network: Arc<dyn Fetch>,
  state: watch::Sender<NetworkState>,
  tasks: Vec<JoinHandle<()>>,
}

impl App {
  pub fn new(config: Config, db: Database) -> Result<Self> {
    let notifier = open_notifier(&config, &db);

    let network: Arc<dyn Fetch> = Arc::new(HttpFetch::new(Duration::from_secs(
      config.api.timeout_secs,
    ))?);
    let worker = ServiceWorker::new(
      config.worker_config()?,
      Arc::clone(&network),
      BucketStorage::new(db),
    );
    let (worker, worker_task) = worker.spawn();
    // take over as soon as the shell is cached
    worker.skip_waiting()?;

    let api = ApiClient::new(config.base_url()?, Arc::new(worker.clone()))
      .with_token(Config::get_api_token());

    let (state, state_rx) = watch::channel(NetworkState::online(None));
    let strategies = StrategyTable::with_overrides(&config.strategies);
    let client = QueryClient::new(CacheStore::new(), strategies, state_rx);
    let coordinator = RefreshCoordinator::new(client.clone(), notifier.clone());

    Ok(Self {
      config,
      notifier,
      client,
      coordinator,
      api,
      network,
      state,
      tasks: vec![worker_task],
    })
  }

  /// Poll until Ctrl-C, printing every notification raised.
  pub async fn run(mut self) -> Result<()> {
    let mut notifications = self.notifier.subscribe();

    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let probe = ConnectivityProbe::new(
      self.api.health_url()?,
      Arc::clone(&self.network),
      Duration::from_secs(self.config.probe.interval_secs.max(1)),
    )
    .with_timeout(Duration::from_secs(self.config.probe.timeout_secs.max(1)));
    let monitor = NetworkMonitor::new(
      self.state.clone(),
      self.client.clone(),
      self.notifier.clone(),
    )
    .with_coordinator(self.coordinator.clone());

    self.tasks.push(probe.spawn(events_tx));
    self.tasks.push(monitor.spawn(events_rx));
    self.tasks.push(self.client.spawn_gc(GC_EVERY));

    self.load_dashboard().await;
    self.start_watches()?;
    info!(base_url = %self.api.base(), "Watching for updates");

    loop {
      tokio::select! {
        received = notifications.recv() => match received {
          Ok(notification) => print_notification(&notification),
          Err(broadcast::error::RecvError::Lagged(n)) => {
            warn!(skipped = n, "Notification printer fell behind");
          }
          Err(broadcast::error::RecvError::Closed) => break,
        },
        _ = tokio::signal::ctrl_c() => {
          info!("Shutting down");
          break;
        }
      }
    }

    self.shutdown()
  }

  /// First dashboard read goes through the query cache so the coordinator's
  /// first tick has a snapshot to diff against.
  async fn load_dashboard(&self) {
    let user = &self.config.api.user_id;
    let key = QueryKey::dashboard(user);
    let api = self.api.clone();
    match self.client.fetch(&key, || async move { api.get_dashboard(user).await }).await {
      Ok(result) => {
        let dashboard = &result.data;
        info!(source = ?result.source, "Dashboard loaded");
        println!(
          "Portfolio ${:.2} ({:+.2}%), {} active signals, {} alerts",
          dashboard.portfolio_value,
          dashboard.daily_change,
          dashboard.active_signals,
          dashboard.alerts.len()
        );
      }
      Err(e) => warn!(error = %e, "Dashboard not available yet"),
    }
  }

  fn start_watches(&self) -> Result<()> {
    let user = &self.config.api.user_id;
    self.coordinator.start(watches::trading_signals(
      self.api.clone(),
      user,
      &self.config.api.strategy,
    ))?;
    self
      .coordinator
      .start(watches::recommendations(self.api.clone(), user))?;
    self.coordinator.start(watches::coins(
      self.api.clone(),
      CoinQuery::default(),
      self.config.api.price_alert_pct,
    ))?;
    self
      .coordinator
      .start(watches::dashboard_alerts(self.api.clone(), user))?;
    Ok(())
  }

  fn shutdown(self) -> Result<()> {
    self.coordinator.stop_all()?;
    for task in &self.tasks {
      task.abort();
    }
    Ok(())
  }
}

/// Notifier backed by the kv table, with the configured history cap.
pub fn open_notifier(config: &Config, db: &Database) -> Notifier {
  let notifier = Notifier::persistent(db.kv());
  let mut settings = notifier.settings();
  if settings.max_history != config.notifications.max_history {
    settings.max_history = config.notifications.max_history;
    notifier.update_settings(settings);
  }
  notifier
}

pub fn print_notification(n: &Notification) {
  println!(
    "[{}] {:<14} {}: {}",
    n.created_at.format("%Y-%m-%d %H:%M:%S"),
    n.kind.name(),
    n.title,
    n.message
  );
}
