use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use medscreen_core::{ComparisonError, Error, ErrorKind, InferenceError, RegistryError, StoreError};
use serde_json::json;
use tracing::warn;

/// Transport-level error; renders `{error, detail}` with a status derived from the kind.
#[derive(Debug)]
pub enum ApiError {
    Core(Error),
    Payload(JsonRejection),
    Store(StoreError),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self { ApiError::Core(e) }
}
impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self { ApiError::Core(e.into()) }
}
impl From<InferenceError> for ApiError {
    fn from(e: InferenceError) -> Self { ApiError::Core(e.into()) }
}
impl From<ComparisonError> for ApiError {
    fn from(e: ComparisonError) -> Self { ApiError::Core(e.into()) }
}
impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self { ApiError::Payload(e) }
}
impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self { ApiError::Store(e) }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::LoadFailure | ErrorKind::Closed => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::SchemaMismatch | ErrorKind::RangeViolation | ErrorKind::ScoringFailure | ErrorKind::NoChange => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, detail) = match self {
            ApiError::Core(e) => {
                let kind = e.kind();
                if e.retryable() { warn!(error = %e, "request failed on model load"); }
                (status_for(kind), kind.as_str(), e.to_string())
            }
            ApiError::Payload(r) => (r.status(), "invalid_payload", r.body_text()),
            ApiError::Store(e) => {
                warn!(error = %e, "artifact store listing failed");
                (StatusCode::SERVICE_UNAVAILABLE, "store_unavailable", e.to_string())
            }
        };
        (status, Json(json!({"error": kind, "detail": detail}))).into_response()
    }
}
