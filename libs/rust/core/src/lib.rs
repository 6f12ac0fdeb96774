//! Core library for MedScreen services: model-bundle registry, explain-on-read
//! inference, what-if comparison, plus the shared tracing/metrics/health plumbing.

use anyhow::Result;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{routing::get, Json, Router};
use once_cell::sync::OnceCell;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static TRACING_INIT: OnceCell<()> = OnceCell::new();
static METER_PROVIDER: OnceCell<SdkMeterProvider> = OnceCell::new();
static NODE_LIVENESS: AtomicBool = AtomicBool::new(true);
static NODE_READINESS: AtomicBool = AtomicBool::new(false);

pub fn mark_ready() { NODE_READINESS.store(true, Ordering::SeqCst); }
pub fn clear_ready() { NODE_READINESS.store(false, Ordering::SeqCst); }
pub fn mark_not_live() { NODE_LIVENESS.store(false, Ordering::SeqCst); }

/// Installs the global subscriber. `RUST_LOG` drives filtering (default `info`);
/// `MEDSCREEN_JSON_LOG=1` switches to flattened JSON lines.
pub fn init_tracing(service: &str) -> Result<()> {
    TRACING_INIT.get_or_try_init(|| -> Result<()> {
        let json = std::env::var("MEDSCREEN_JSON_LOG").ok().map(|v| v == "1" || v.eq_ignore_ascii_case("true")).unwrap_or(false);
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry().with(env_filter);
        if json {
            registry.with(fmt::layer().json().flatten_event(true).with_current_span(true).with_span_list(false)).try_init()?;
        } else {
            registry.with(fmt::layer().with_target(true).with_thread_ids(false).with_line_number(true)).try_init()?;
        }
        Ok(())
    })?;
    info!(target: "medscreen", %service, "tracing initialized");
    Ok(())
}

/// Routes OpenTelemetry instruments into the default prometheus registry
/// served on `/metrics`.
pub fn init_metrics() -> Result<()> {
    METER_PROVIDER.get_or_try_init(|| -> Result<SdkMeterProvider> {
        let exporter = opentelemetry_prometheus::exporter().with_registry(prometheus::default_registry().clone()).build()?;
        let provider = SdkMeterProvider::builder().with_reader(exporter).build();
        opentelemetry::global::set_meter_provider(provider.clone());
        Ok(provider)
    })?;
    Ok(())
}

pub fn shutdown_metrics() {
    if let Some(provider) = METER_PROVIDER.get() {
        if let Err(e) = provider.shutdown() { tracing::warn!(error = %e, "meter provider shutdown failed"); }
    }
}

/// `/live`, `/ready`, `/status` and `/metrics`.
pub fn health_router() -> Router {
    Router::new()
        .route("/live", get(|| async { Json(serde_json::json!({"live": NODE_LIVENESS.load(Ordering::SeqCst)})) }))
        .route("/ready", get(ready_handler))
        .route("/status", get(|| async {
            Json(serde_json::json!({
                "live": NODE_LIVENESS.load(Ordering::SeqCst),
                "ready": NODE_READINESS.load(Ordering::SeqCst),
                "metrics": METER_PROVIDER.get().is_some(),
            }))
        }))
        .route("/metrics", get(metrics_handler))
}

async fn ready_handler() -> Response {
    let ready = NODE_READINESS.load(Ordering::SeqCst);
    let status = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status, Json(serde_json::json!({"ready": ready}))).into_response()
}

async fn metrics_handler() -> Response {
    if METER_PROVIDER.get().is_none() {
        return (StatusCode::SERVICE_UNAVAILABLE, "metrics not initialized").into_response();
    }
    let families = prometheus::default_registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
        return (StatusCode::INTERNAL_SERVER_ERROR, format!("encode error: {e}")).into_response();
    }
    (StatusCode::OK, [(header::CONTENT_TYPE, "text/plain; version=0.0.4")], buf).into_response()
}

pub async fn start_health_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(?addr, "health server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, health_router()).await {
            tracing::error!(error = ?e, "health server failed");
        }
    });
    Ok(())
}

pub mod artifact_store;
pub mod bundle;
pub mod comparison;
pub mod config;
pub mod errors;
pub mod guidance;
pub mod inference;
pub mod metrics;
pub mod model_registry;
pub mod models;
pub mod resilience;
pub mod versions;

pub use artifact_store::{ArtifactStore, FsArtifactStore, MemoryArtifactStore};
pub use bundle::{ArtifactBundle, BundleDocument, BundleKey, BundleMetadata, FeatureSpec, ModelSpec, WarningRule};
pub use comparison::{compare, compare_with, ComparisonResult};
pub use config::GatewayConfig;
pub use errors::{ComparisonError, Error, ErrorKind, InferenceError, RegistryError, StoreError};
pub use inference::{score, score_with, ConfidenceLevel, Direction, FeatureContribution, FeatureVector, PredictionResult, ScoreOptions};
pub use model_registry::{EntrySnapshot, LoadState, ModelRegistry, RegistryConfig};
pub use models::{Explainer, Scorer};
pub use resilience::{retry_async, RetryConfig};
pub use versions::{FileVersions, StaticVersions, VersionSource};
