//! HTTP surface: thin JSON adapters over the registry, scoring and comparison.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use medscreen_core::guidance::{interpretation, lifestyle_tips, recommendation, warnings, DISCLAIMER};
use medscreen_core::{
    compare_with, score_with, ComparisonResult, EntrySnapshot, FeatureVector, ModelRegistry, PredictionResult, RegistryError,
    ScoreOptions,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub registry: ModelRegistry,
    pub options: ScoreOptions,
    pub app_name: Arc<str>,
}

impl AppState {
    pub fn new(registry: ModelRegistry, options: ScoreOptions, app_name: impl Into<Arc<str>>) -> Self {
        Self { registry, options, app_name: app_name.into() }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub result: PredictionResult,
    pub explanations: Vec<String>,
    pub recommendation: String,
    pub lifestyle_tips: Vec<String>,
    pub warnings: Vec<String>,
    pub disclaimer: String,
}

#[derive(Debug, Deserialize)]
pub struct WhatIfRequest {
    pub original_inputs: FeatureVector,
    pub modified_inputs: FeatureVector,
}

#[derive(Debug, Serialize)]
struct ModelsResponse {
    available: Vec<String>,
    loaded: Vec<EntrySnapshot>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/models", get(list_models))
        .route("/api/v1/models/:domain", get(model_info))
        .route("/api/v1/models/:domain/predict", post(predict))
        .route("/api/v1/models/:domain/what-if", post(what_if))
        .route("/api/v1/admin/models/:domain/:version/invalidate", post(invalidate))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({"status": "healthy", "app_name": &*state.app_name, "version": env!("CARGO_PKG_VERSION")}))
}

async fn list_models(State(state): State<AppState>) -> Result<Json<ModelsResponse>, ApiError> {
    let available = state.registry.store().domains().await?;
    Ok(Json(ModelsResponse { available, loaded: state.registry.snapshot() }))
}

async fn model_info(State(state): State<AppState>, Path(domain): Path<String>) -> Result<Json<Value>, ApiError> {
    match state.registry.get_active(&domain).await {
        Ok(bundle) => {
            let md = bundle.metadata();
            Ok(Json(json!({
                "domain": md.domain,
                "version": md.version,
                "status": "loaded",
                "model_name": md.model_name,
                "trained_at": md.trained_at,
                "training_samples": md.training_samples,
                "metrics": md.metrics,
                "calibrated": md.calibrated,
                "threshold": md.threshold,
                "features": md.features,
            })))
        }
        Err(e @ (RegistryError::LoadFailure { .. } | RegistryError::VersionLookup { .. })) => {
            Ok(Json(json!({"domain": domain, "status": "model_not_loaded", "detail": e.to_string()})))
        }
        Err(e) => Err(e.into()),
    }
}

async fn predict(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    payload: Result<Json<FeatureVector>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(features) = payload?;
    let bundle = state.registry.get_active(&domain).await?;
    let result = score_with(&bundle, &features, &state.options)?;
    Ok(Json(PredictResponse {
        explanations: result.top_factors.iter().map(interpretation).collect(),
        recommendation: recommendation(result.prediction, result.confidence_level, &result.domain),
        lifestyle_tips: lifestyle_tips(&result.top_factors, result.prediction),
        warnings: warnings(bundle.metadata(), &features),
        disclaimer: DISCLAIMER.to_string(),
        result,
    }))
}

async fn what_if(
    State(state): State<AppState>,
    Path(domain): Path<String>,
    payload: Result<Json<WhatIfRequest>, JsonRejection>,
) -> Result<Json<ComparisonResult>, ApiError> {
    let Json(req) = payload?;
    let bundle = state.registry.get_active(&domain).await?;
    Ok(Json(compare_with(&bundle, &req.original_inputs, &req.modified_inputs, &state.options)?))
}

async fn invalidate(State(state): State<AppState>, Path((domain, version)): Path<(String, String)>) -> StatusCode {
    let removed = state.registry.invalidate(&domain, &version);
    info!(%domain, %version, removed, "invalidate requested");
    StatusCode::NO_CONTENT
}
