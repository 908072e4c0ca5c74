//! assetsync-server: syncs asset registry events from the chain into a
//! relational store and serves them over HTTP.

mod api;
mod config;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;
use tracing_subscriber::EnvFilter;

use assetsync_core::Ledger;
use assetsync_evm::{EvmWsSubscription, HttpChainReader, LogStream, SyncEngine};
use assetsync_storage::SqliteLedger;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = ServerConfig::from_env()?;
    info!(
        contract = %cfg.contract_address,
        database = %cfg.database_url,
        "starting assetsync"
    );

    let ledger = open_ledger(&cfg.database_url).await?;
    let reader = HttpChainReader::new(
        &cfg.rpc_url,
        &cfg.contract_address,
        Duration::from_secs(cfg.request_timeout_secs),
    )?;
    let engine = Arc::new(SyncEngine::new(cfg.sync_config(), reader, ledger.clone()));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    tokio::spawn(engine.clone().run(shutdown_rx.clone()));

    if let Some(ws_url) = &cfg.ws_url {
        let stream: Arc<dyn LogStream> =
            Arc::new(EvmWsSubscription::new(ws_url, &cfg.contract_address));
        tokio::spawn(engine.clone().run_live(stream, shutdown_rx.clone()));
    } else {
        info!("WS_URL not set; running backfill-only");
    }

    let state = AppState {
        engine,
        ledger,
    };
    let app = api::router(state);

    let listener = TcpListener::bind(cfg.bind)
        .await
        .with_context(|| format!("failed to bind {}", cfg.bind))?;
    info!(addr = %cfg.bind, "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("http server failed")?;

    Ok(())
}

async fn open_ledger(database_url: &str) -> Result<Arc<dyn Ledger>> {
    if database_url.starts_with("postgres://") || database_url.starts_with("postgresql://") {
        #[cfg(feature = "postgres")]
        {
            let ledger = assetsync_storage::PostgresLedger::connect(database_url)
                .await
                .context("failed to connect to postgres")?;
            return Ok(Arc::new(ledger));
        }
        #[cfg(not(feature = "postgres"))]
        anyhow::bail!("DATABASE_URL is a postgres URL but the `postgres` feature is disabled");
    }

    let ledger = SqliteLedger::open(database_url)
        .await
        .context("failed to open sqlite database")?;
    Ok(Arc::new(ledger))
}
