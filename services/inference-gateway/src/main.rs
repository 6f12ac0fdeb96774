use anyhow::Result;
use medscreen_core::{
    clear_ready, init_metrics, init_tracing, mark_ready, shutdown_metrics, start_health_server, FileVersions, FsArtifactStore,
    GatewayConfig, ModelRegistry,
};
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{info, warn};

mod api;
mod error;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("inference-gateway")?;
    init_metrics()?;

    let cfg = GatewayConfig::load()?;
    info!(?cfg, "config loaded");

    start_health_server(cfg.health_port).await?;

    let store = FsArtifactStore::new(&cfg.artifact_root);
    let versions = FileVersions::new(&cfg.versions_file);
    let registry = ModelRegistry::new(Arc::new(store), Arc::new(versions), cfg.registry_config());

    let preloaded = registry.preload(&cfg.preload).await;
    let failed = preloaded.iter().filter(|(_, r)| r.is_err()).count();
    info!(requested = preloaded.len(), failed, "preload finished");

    let state = api::AppState::new(registry.clone(), cfg.score_options(), cfg.app_name.as_str());
    let listener = TcpListener::bind(&cfg.bind_addr).await?;
    mark_ready();
    info!(addr = %cfg.bind_addr, "service ready");

    axum::serve(listener, api::router(state)).with_graceful_shutdown(shutdown_signal()).await?;

    clear_ready();
    registry.shutdown();
    shutdown_metrics();
    info!("shutdown");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = signal::ctrl_c().await {
        warn!(error = %e, "ctrl_c listener failed");
    }
}
