//! Diligence API server

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use diligence_api::config::{ApiConfig, LoggingConfig};
use diligence_api::{bootstrap, build_router, ApiState};
use diligence_billing::{StripeClient, StripeConfig};
use diligence_storage::{HttpObjectStorage, HttpStorageConfig, MemoryObjectStorage, ObjectStorage};
use diligence_tenant::MemoryStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "diligence-api", version, about = "Diligence platform API server")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, env = "DILIGENCE_CONFIG")]
    config: Option<PathBuf>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let registry = tracing_subscriber::registry().with(filter);
    if logging.json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ApiConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let store = Arc::new(MemoryStore::new());
    let seeded = bootstrap(store.as_ref(), &config.bootstrap)
        .await
        .context("seeding bootstrap organizations")?;
    if seeded > 0 {
        tracing::info!(count = seeded, "bootstrap organizations created");
    }

    let storage: Arc<dyn ObjectStorage> = match &config.storage {
        Some(storage) => {
            tracing::info!(base_url = %storage.base_url, bucket = %storage.bucket, "using HTTP object storage");
            Arc::new(
                HttpObjectStorage::new(HttpStorageConfig {
                    base_url: storage.base_url.clone(),
                    service_key: storage.service_key.clone(),
                    bucket: storage.bucket.clone(),
                    timeout: Duration::from_secs(30),
                })
                .context("building storage client")?,
            )
        }
        None => {
            tracing::warn!("no storage configured, documents are kept in memory");
            Arc::new(MemoryObjectStorage::new())
        }
    };

    let mut state = ApiState::new(config.clone(), store, storage);
    match config.billing.as_ref().filter(|b| !b.secret_key.is_empty()) {
        Some(billing) => {
            let stripe_config = StripeConfig::new(billing.secret_key.clone()).with_api_base(billing.api_base.clone());
            let stripe = StripeClient::new(stripe_config).context("building payments client")?;
            state = state.with_payments(Arc::new(stripe));
        }
        None => tracing::warn!("payments not configured, checkout and portal are disabled"),
    }

    let app = build_router(Arc::new(state));
    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("binding {}", config.server.bind))?;
    tracing::info!(addr = %config.server.bind, "Diligence API listening");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;
    Ok(())
}
