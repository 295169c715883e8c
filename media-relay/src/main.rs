use std::sync::Arc;

use anyhow::Context;
use mimalloc::MiMalloc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use media_relay::acquisition::Orchestrator;
use media_relay::api::{ApiServer, AppState};
use media_relay::config::AppConfig;
use media_relay::logging::init_logging;
use media_relay::store::{ArtifactStore, ArtifactSweeper};
use media_relay::utils::http_client::build_http_client;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    // Keep the guard alive for the process lifetime
    let (logging, _log_guard) = init_logging(&config.log_dir)?;

    let shutdown = CancellationToken::new();
    logging.start_retention_cleanup(shutdown.clone());

    let store = Arc::new(ArtifactStore::open(&config.store.dir).await?);
    let sweeper = ArtifactSweeper::spawn(
        store.clone(),
        config.store.sweep_interval,
        config.store.ttl,
        shutdown.clone(),
    );

    let orchestrator = Arc::new(Orchestrator::from_config(
        &config.acquisition,
        store,
        build_http_client(config.acquisition.allow_private_sources),
    )?);
    info!(
        mode = ?orchestrator.mode(),
        strategies = ?orchestrator.strategies().iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
        "Orchestrator ready"
    );

    let state = AppState::new(&config, orchestrator);
    if !state.gate.requires_key() {
        warn!("API_KEY is not set; acquisition requests are not authenticated");
    }
    let server = ApiServer::new(config.server.clone(), state, shutdown.clone());

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_token.cancel();
    });

    server.run().await?;

    shutdown.cancel();
    let _ = sweeper.await;
    info!("media-relay stopped");
    Ok(())
}
