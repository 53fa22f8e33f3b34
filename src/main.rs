mod api;
mod app;
mod cache;
mod config;
mod db;
mod logging;
mod network;
mod notify;
mod refresh;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::worker::{BucketStorage, HttpFetch, ServiceWorker};

#[derive(Parser, Debug)]
#[command(name = "sigwatch")]
#[command(about = "Caching and live refresh for a crypto trading assistant API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/sigwatch/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
  /// Poll signals, recommendations, coins and the dashboard; print notifications
  Watch,
  /// Show stored notification history
  History {
    /// Delete the history instead of printing it
    #[arg(long)]
    clear: bool,
  },
  /// Drop every cached response held by the service worker
  ClearCache,
  /// Print the bytes held by the service worker cache
  CacheSize,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let config = config::Config::load(args.config.as_deref())?;
  let _log_guard = logging::init(&db::data_dir()?.join("logs"))?;
  let db = Database::open()?;

  match args.command {
    Cmd::Watch => {
      let app = app::App::new(config, db)?;
      app.run().await?;
    }
    Cmd::History { clear } => {
      let notifier = app::open_notifier(&config, &db);
      if clear {
        notifier.clear_history();
        println!("Notification history cleared");
      } else {
        for notification in notifier.history() {
          app::print_notification(&notification);
        }
      }
    }
    Cmd::ClearCache => {
      let worker = offline_worker(&config, db)?;
      let reply = worker.clear_cache();
      println!("{}", serde_json::to_string(&reply)?);
    }
    Cmd::CacheSize => {
      let worker = offline_worker(&config, db)?;
      let reply = worker.cache_size();
      println!("{}", serde_json::to_string(&reply)?);
    }
  }

  Ok(())
}

/// A worker over the shared buckets that is never installed or spawned.
fn offline_worker(config: &config::Config, db: Database) -> Result<ServiceWorker> {
  let network = HttpFetch::new(Duration::from_secs(config.api.timeout_secs))?;
  Ok(ServiceWorker::new(
    config.worker_config()?,
    Arc::new(network),
    BucketStorage::new(db),
  ))
}
