// src/app.rs

//! Wires the client core together for the command-line binary.

use crate::config::Config;
use crate::core::client::{SwallowPolicy, fan_out};
use crate::core::database::InMemoryDatabaseStore;
use crate::core::events::ClientEventBus;
use crate::core::factory::DatabaseClientFactory;
use crate::core::metadata::{ClientContext, ClientMetadata, SessionMetadata};
use crate::core::monitor::{
    LogFileSink, MONITOR_DATA_EVENT, MonitorService, MonitorSink, Subscription,
};
use crate::core::native::{NodeRole, TcpConnector};
use crate::core::protocol::{CommandEvent, CommandOptions};
use crate::core::registry::ClientRegistry;
use crate::core::ssh::UnsupportedSshTunnelProvider;
use crate::core::strategy::ConnectionStrategy;
use crate::core::telemetry::{TelemetrySink, TracingTelemetry};
use crate::core::RediscopeError;
use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// What the binary was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Keep the pool and its idle sweeper running until interrupted.
    Serve,
    /// Print every command executed on the database until interrupted.
    Monitor { database_id: String, log_to_file: bool },
    /// Send `PING` to every primary of the database and print the replies.
    Ping { database_id: String },
}

pub struct AppContext {
    pub config: Config,
    pub store: Arc<InMemoryDatabaseStore>,
    pub factory: Arc<DatabaseClientFactory>,
    pub monitor: Arc<MonitorService>,
    pub shutdown_tx: broadcast::Sender<()>,
}

/// Builds the store, registry, factory and monitor service from `config`.
pub fn setup(config: Config) -> AppContext {
    let clients = &config.redis_clients;
    let store = Arc::new(InMemoryDatabaseStore::new(config.databases.clone()));
    let registry = ClientRegistry::new(clients.max_idle_threshold);
    let strategy = Arc::new(
        ConnectionStrategy::new(
            Arc::new(TcpConnector),
            Arc::new(UnsupportedSshTunnelProvider),
            clients.retry_policy(),
        )
        .with_max_retries_per_request(clients.max_retries_per_request),
    );
    let telemetry: Arc<dyn TelemetrySink> = Arc::new(TracingTelemetry);
    let factory = DatabaseClientFactory::new(
        store.clone(),
        registry,
        strategy,
        telemetry.clone(),
        ClientEventBus::new(),
        clients.connect_timeout,
    );
    let monitor = MonitorService::new(factory.clone(), telemetry, config.monitor.clone());
    let (shutdown_tx, _) = broadcast::channel(1);

    AppContext {
        config,
        store,
        factory,
        monitor,
        shutdown_tx,
    }
}

pub async fn run(config: Config, mode: Mode) -> Result<()> {
    let ctx = setup(config);
    let registry = ctx.factory.registry().clone();
    let sweeper = registry.start_idle_sweeper(ctx.config.redis_clients.idle_sync_interval);
    let listener = ctx
        .monitor
        .spawn_event_listener(ctx.factory.events(), ctx.shutdown_tx.subscribe());

    let outcome = match mode {
        Mode::Serve => {
            info!(
                "Client pool running with {} configured database(s)",
                ctx.store.ids().len()
            );
            wait_for_signal().await
        }
        Mode::Monitor {
            database_id,
            log_to_file,
        } => monitor(&ctx, &database_id, log_to_file).await,
        Mode::Ping { database_id } => ping(&ctx, &database_id).await,
    };

    let _ = ctx.shutdown_tx.send(());
    ctx.monitor.shutdown().await;
    registry.shutdown().await;
    if let Some(sweeper) = sweeper
        && let Err(e) = sweeper.await
    {
        warn!("Idle sweeper task failed: {e}");
    }
    if let Err(e) = listener.await {
        warn!("Monitor event listener failed: {e}");
    }
    info!("Shutdown complete.");
    outcome
}

async fn wait_for_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {e}"))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {e}"))?;
    tokio::select! {
        _ = sigint.recv() => info!("SIGINT received, shutting down."),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down."),
    }
    Ok(())
}

/// Prints batches to stdout and reports the end of the subscription on a channel.
struct StdoutSink {
    ended_tx: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl MonitorSink for StdoutSink {
    async fn emit(&self, event: &str, payload: Value) -> Result<(), RediscopeError> {
        if event == MONITOR_DATA_EVENT {
            let batch: Vec<CommandEvent> = serde_json::from_value(payload)?;
            for command in batch {
                println!("{}", command.to_line());
            }
        } else {
            eprintln!("{event}: {payload}");
        }
        Ok(())
    }

    async fn on_disconnect(&self) {
        let _ = self.ended_tx.send(());
    }
}

async fn monitor(ctx: &AppContext, database_id: &str, log_to_file: bool) -> Result<()> {
    let (ended_tx, mut ended_rx) = mpsc::unbounded_channel();
    let mut subscription = Subscription::new(Arc::new(StdoutSink { ended_tx }));
    if log_to_file {
        let log = LogFileSink::create(&ctx.config.monitor.log_dir, database_id).await?;
        info!("Logging commands to {}", log.path().display());
        subscription = subscription.with_sink(Arc::new(log));
    }
    let subscriber_id = subscription.subscriber_id().to_string();

    ctx.monitor.subscribe(database_id, subscription).await?;

    tokio::select! {
        result = wait_for_signal() => result?,
        _ = ended_rx.recv() => {
            error!("Monitor for {database_id} ended");
            return Err(anyhow!("monitor connection to '{database_id}' was lost"));
        }
    }
    ctx.monitor.unsubscribe(database_id, &subscriber_id).await;
    Ok(())
}

async fn ping(ctx: &AppContext, database_id: &str) -> Result<()> {
    let metadata = ClientMetadata::new(
        SessionMetadata::new("rediscope-cli", "ping"),
        database_id,
        ClientContext::Cli,
    );
    let client = ctx.factory.get_or_create_client(&metadata).await?;
    let nodes = client.nodes(NodeRole::Primary);
    let replies = fan_out(
        &nodes,
        |node| async move {
            let reply = node
                .send_command(["PING"], CommandOptions::default())
                .await?;
            Ok((node.address(), reply))
        },
        &SwallowPolicy::none(),
    )
    .await?;

    for (address, reply) in replies {
        let address = address.unwrap_or_else(|| database_id.to_string());
        let text = reply
            .as_str()
            .map(|s| s.into_owned())
            .unwrap_or_else(|| format!("{reply:?}"));
        println!("{address}: {text}");
    }
    Ok(())
}
