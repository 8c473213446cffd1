mod cache;
mod config;
mod error;
mod origin;
mod proxy;
mod push;
mod routes;
#[cfg(test)]
mod testing;
mod worker;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use url::Url;

use crate::cache::{CacheRouter, CacheStorage, SqliteStorage};
use crate::config::Config;
use crate::origin::{Destination, OriginClient, Request};
use crate::push::{Clients, Notification, PushPayload};
use crate::worker::Worker;

type AppWorker = Worker<SqliteStorage, OriginClient>;

#[derive(Parser, Debug)]
#[command(name = "offline-router")]
#[command(about = "Offline-aware request/cache router for the L8teFuel web client")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/offline-router/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// App origin to route for
  #[arg(long, global = true)]
  origin: Option<Url>,

  /// Cache generation to use
  #[arg(short, long, global = true)]
  generation: Option<String>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fill the current generation from the manifest
  Install,
  /// Delete every stored generation except the current one
  Activate,
  /// Route one request and write the body to stdout
  Fetch {
    /// Path (and query) on the origin
    path: String,
    /// Treat the request as a page load
    #[arg(long)]
    document: bool,
  },
  /// List stored generations
  Generations,
  /// Run the proxy in front of the origin
  Serve {
    /// Listen address (overrides the config file)
    #[arg(short, long)]
    listen: Option<SocketAddr>,
  },
  /// Turn a push payload into a notification and click it
  Push {
    /// JSON payload; read from stdin when omitted
    payload: Option<String>,
  },
  /// Fire a background sync event
  Sync {
    #[arg(default_value = "check-prices")]
    tag: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_tracing(args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Command line overrides
  let config = Config {
    origin: args.origin.unwrap_or(config.origin),
    generation: args.generation.unwrap_or(config.generation),
    ..config
  };

  match args.command {
    Command::Install => {
      let router = build_router(&config)?;
      let manifest = config.manifest()?;
      router.initialize(&manifest).await?;
      println!("installed {} ({} resources)", config.generation, manifest.entries().len());
    }
    Command::Activate => {
      let router = build_router(&config)?;
      let removed = router.activate().await?;
      println!("{} active, {} generation(s) removed", config.generation, removed);
    }
    Command::Fetch { path, document } => {
      let worker = build_worker(&config)?;
      worker.resume()?;

      let url = config
        .origin
        .join(&path)
        .map_err(|e| eyre!("Invalid path '{}': {}", path, e))?;
      let destination = if document {
        Destination::Document
      } else {
        Destination::Empty
      };

      let response = worker
        .fetch(Request::get(url).with_destination(destination))
        .await?;
      worker.settle().await;

      eprintln!("{} ({})", response.status, response.source.as_str());
      std::io::stdout().write_all(&response.body)?;
    }
    Command::Generations => {
      let storage = open_storage(&config)?;
      for generation in storage.generations()? {
        let marker = if generation == config.generation { "*" } else { " " };
        println!(
          "{} {} ({} entries)",
          marker,
          generation,
          storage.keys(&generation)?.len()
        );
      }
    }
    Command::Serve { listen } => {
      let worker = Worker::start(build_router(&config)?, config.manifest()?, config.origin.clone()).await?;
      proxy::serve(
        Arc::new(worker),
        listen.unwrap_or(config.listen),
        config.max_body_bytes,
      )
      .await?;
    }
    Command::Push { payload } => {
      let raw = match payload {
        Some(p) => p.into_bytes(),
        None => {
          let mut buf = Vec::new();
          std::io::stdin().read_to_end(&mut buf)?;
          buf
        }
      };
      let data = (!raw.is_empty()).then_some(raw.as_slice());
      let notification = Notification::from(PushPayload::from_bytes(data));
      println!("{}", serde_json::to_string_pretty(&notification)?);

      let mut clients = Clients::new(config.origin.clone());
      let outcome = clients.notification_click(&notification)?;
      println!("click: {:?}", outcome);
    }
    Command::Sync { tag } => {
      let worker = build_worker(&config)?;
      worker.resume()?;
      match worker.sync(&tag).await? {
        Some(response) => println!("{} {} ({})", tag, response.status, response.source.as_str()),
        None => println!("{}: nothing to do", tag),
      }
    }
  }

  Ok(())
}

fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  match log_file {
    Some(path) => {
      let dir = path.parent().unwrap_or_else(|| Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(writer).with_ansi(false))
        .init();
      Ok(Some(guard))
    }
    None => {
      tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
      Ok(None)
    }
  }
}

fn open_storage(config: &Config) -> Result<SqliteStorage> {
  match &config.store_path {
    Some(path) => SqliteStorage::open_at(path),
    None => SqliteStorage::open(),
  }
}

fn build_router(config: &Config) -> Result<CacheRouter<SqliteStorage, OriginClient>> {
  let storage = Arc::new(open_storage(config)?);
  let network = Arc::new(OriginClient::new(&config.upstream)?);

  Ok(
    CacheRouter::new(storage, network, config.generation.clone())
      .with_routes(config.route_table())
      .with_fallback_document(config.fallback_document()),
  )
}

fn build_worker(config: &Config) -> Result<AppWorker> {
  let router = build_router(config)?;
  Ok(Worker::new(router, config.manifest()?, config.origin.clone()))
}
