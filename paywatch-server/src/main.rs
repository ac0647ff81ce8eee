//! Paywatch Server
//!
//! Watches EVM chains for stablecoin transfers into deposit wallets, settles
//! payment orders, notifies merchants, and sweeps deposits to the master wallet.

mod config;
mod server;
mod shutdown;
mod state;
mod workers;

use clap::Parser;
use config::{ConfigLoader, get_database_url};
use paywatch_core::cache::{CacheStore, MemoryCache};
use paywatch_core::chain::{MnemonicWalletDeriver, WalletDeriver};
use paywatch_core::events::webhook_event_channel;
use paywatch_core::framework::DatabaseProcessor;
use paywatch_core::processors::{HttpWebhookDelivery, WebhookSender};
use paywatch_core::repositories::Repositories;
use server::{build_router, run_server};
use sqlx::postgres::PgPoolOptions;
use state::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use workers::{SharedComponents, spawn_network};

/// Paywatch - on-chain payment reconciliation for EVM stablecoins
#[derive(Parser, Debug)]
#[command(name = "paywatch-server")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "./paywatch.toml")]
    config: PathBuf,

    /// Override the health endpoint listen address (e.g., 0.0.0.0:3000)
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// Run database migrations on startup
    #[arg(long, default_value = "false")]
    migrate: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config_loader = ConfigLoader::new(&args.config, args.listen);
    let config = match config_loader.load() {
        Ok(config) => config,
        Err(e) => {
            init_tracing(false);
            tracing::error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(config.json_logs);
    tracing::info!("Starting paywatch-server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Configuration loaded from {:?}", args.config);

    let database_url = get_database_url().map_err(|e| {
        tracing::error!("DATABASE_URL environment variable not set");
        e
    })?;

    tracing::info!("Connecting to database...");
    let db_pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {}", e);
            e
        })?;
    tracing::info!("Database connection established");

    if args.migrate {
        tracing::info!("Running database migrations...");
        sqlx::migrate!("../migrations")
            .run(&db_pool)
            .await
            .map_err(|e| {
                tracing::error!("Failed to run migrations: {}", e);
                e
            })?;
        tracing::info!("Migrations completed successfully");
    }

    let deriver = Arc::new(MnemonicWalletDeriver::new(config.seed.clone()));
    let master = deriver.master().map_err(|e| {
        tracing::error!("Failed to derive the master wallet: {}", e);
        e
    })?;
    tracing::info!(master = %master.address, "Master wallet derived");

    let cache: Arc<dyn CacheStore> = Arc::new(MemoryCache::new());
    let (webhook_tx, webhook_rx) = webhook_event_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let shared = SharedComponents {
        repositories: Repositories::postgres(DatabaseProcessor::new(db_pool.clone())),
        cache: cache.clone(),
        deriver,
        covering: Arc::new(config.payment.covering),
        webhook_tx,
        shutdown_rx,
    };

    let mut handles = Vec::new();
    for network_config in &config.networks {
        match spawn_network(network_config, &config, &shared).await {
            Ok(network_handles) => handles.extend(network_handles),
            Err(e) => {
                tracing::error!(network = %network_config.network, "Failed to start network: {:#}", e);
                let _ = shutdown_tx.send(true);
                for handle in handles {
                    let _ = handle.await;
                }
                db_pool.close().await;
                return Err(e);
            }
        }
    }
    // Processors hold their own senders; the channel closes once they all stop.
    drop(shared);

    // Stopped only after every processor has exited, so late events still go out.
    let (sender_shutdown_tx, sender_shutdown_rx) = watch::channel(false);
    let webhook_sender = WebhookSender::new(
        webhook_rx,
        sender_shutdown_rx,
        Arc::new(HttpWebhookDelivery::new()),
        config.payment.webhook_concurrency,
    );
    let webhook_handle = tokio::spawn(webhook_sender.run());

    let state = AppState::new(
        db_pool.clone(),
        cache,
        config.networks.iter().map(|n| n.network).collect(),
    );
    let router = build_router(state);

    tracing::info!("Starting HTTP server on {}", config.listen);
    let result = run_server(router, config.listen, shutdown_tx.clone()).await;
    let _ = shutdown_tx.send(true);

    tracing::info!("Waiting for processors to stop...");
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Processor task failed: {}", e);
        }
    }
    let _ = sender_shutdown_tx.send(true);
    if let Err(e) = webhook_handle.await {
        tracing::error!("WebhookSender task failed: {}", e);
    }

    tracing::info!("Closing database connections...");
    db_pool.close().await;
    tracing::info!("Server shutdown complete");

    result.map_err(Into::into)
}

/// Initialize the tracing subscriber with environment-based filtering.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}
