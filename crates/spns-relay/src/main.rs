//! SPNS Relay Server
//!
//! Push notification relay: device and closed group registries, dispatch
//! queue, push worker and a JSON management surface.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use spns_core::config::{self, Config, SinkKind};
use spns_core::tracing_init::{default_filter, init_tracing};
use spns_relay::dispatch::dispatch_queue;
use spns_relay::notifications::{LogSink, NotificationService, PushSink, PushWorker};
use spns_relay::registry::{ClosedGroupRegistry, DeviceRegistry};
use spns_relay::router::NotificationRouter;
use spns_relay::server::{AppState, build_router};
use spns_relay::storage::{MemoryStore, RegistryStore, RelayDatabase};

#[derive(Parser, Debug)]
#[command(name = "spns-relay")]
#[command(version, about = "SPNS relay server - push token registries and dispatch")]
struct Args {
    /// Path to a JSON config file.
    #[arg(long, env = "SPNS_CONFIG")]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long)]
    addr: Option<SocketAddr>,

    /// Path to SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Keep registrations in memory only (lost on restart).
    #[arg(long, conflicts_with = "db_path")]
    ephemeral: bool,

    /// Push sink draining the queue (log or fcm).
    #[arg(long)]
    sink: Option<SinkKind>,

    /// Dispatch queue capacity; 0 means unbounded.
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Maximum concurrent push sends.
    #[arg(long)]
    workers: Option<usize>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

fn apply_args(config: &mut Config, args: &Args) {
    if let Some(addr) = args.addr {
        config.relay.listen = addr;
    }
    if let Some(path) = &args.db_path {
        config.relay.database_path = Some(path.clone());
    }
    if let Some(sink) = args.sink {
        config.notify.sink = sink;
    }
    if let Some(capacity) = args.queue_capacity {
        config.relay.queue_capacity = (capacity > 0).then_some(capacity);
    }
    if let Some(workers) = args.workers {
        config.relay.workers = workers;
    }
    if args.log_json {
        config.log.json = true;
    }
}

fn build_sink(config: &Config) -> anyhow::Result<Arc<dyn PushSink>> {
    match config.notify.sink {
        SinkKind::Log => Ok(Arc::new(LogSink)),
        #[cfg(feature = "push-notifications")]
        SinkKind::Fcm => Ok(Arc::new(
            spns_relay::notifications::FcmSink::from_config(&config.notify)?,
        )),
        #[cfg(not(feature = "push-notifications"))]
        SinkKind::Fcm => {
            anyhow::bail!("The fcm sink requires building with the push-notifications feature")
        }
    }
}

async fn open_store(config: &Config, ephemeral: bool) -> anyhow::Result<Arc<dyn RegistryStore>> {
    if ephemeral {
        warn!("Running with an in-memory store; registrations will not survive a restart");
        return Ok(Arc::new(MemoryStore::new()));
    }
    let path = match &config.relay.database_path {
        Some(path) => path.clone(),
        None => config::database_path().context("Cannot determine data directory")?,
    };
    info!(path = %path.display(), "Opening relay database");
    Ok(Arc::new(RelayDatabase::open(&path).await?))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = config::load_config(args.config.as_deref())?;
    apply_args(&mut config, &args);
    init_tracing(
        &default_filter("spns_relay", &config.log.level),
        config.log.json,
    );

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.relay.listen,
        sink = ?config.notify.sink,
        "Starting spns-relay"
    );

    let store = open_store(&config, args.ephemeral).await?;
    let devices = Arc::new(
        DeviceRegistry::load(Arc::clone(&store), config.relay.max_push_failures).await?,
    );
    let groups = Arc::new(ClosedGroupRegistry::load(store).await?);

    let (queue, receiver) = dispatch_queue(config.relay.queue_capacity);
    let notifications = NotificationService::new(
        NotificationRouter::new(Arc::clone(&devices), Arc::clone(&groups)),
        queue,
    );

    let sink = build_sink(&config)?;
    let worker = tokio::spawn(
        PushWorker::new(receiver, sink, Arc::clone(&devices), config.relay.workers).run(),
    );

    let app = build_router(AppState {
        devices,
        groups,
        notifications,
    });
    let listener = tokio::net::TcpListener::bind(config.relay.listen).await?;
    info!(addr = %config.relay.listen, "Relay listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The router held the last queue producer; the worker drains and exits.
    let stats = worker.await?;
    info!(?stats, "Relay stopped");
    Ok(())
}
