//! Error taxonomy shared by the store, registry, inference and comparison layers.
//!
//! Every error is scoped to the call that produced it. Only load failures are
//! eligible for a retry on the next call; everything else is a client-visible
//! input problem or a missing artifact.

use serde::Serialize;
use thiserror::Error;

/// Failures of the raw artifact read path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no artifact for {domain}@{version}")]
    NotFound { domain: String, version: String },
    #[error("artifact store unavailable: {0}")]
    Unavailable(String),
    #[error("artifact integrity check failed for {domain}@{version}: expected sha256 {expected}, got {actual}")]
    Integrity { domain: String, version: String, expected: String, actual: String },
}

impl StoreError {
    /// Transient failures the store may retry internally.
    pub fn is_transient(&self) -> bool { matches!(self, StoreError::Unavailable(_)) }
}

/// Failures surfaced by the registry. Cloned to every waiter of a shared load.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    #[error("unknown domain {domain} (version {version})")]
    NotFound { domain: String, version: String },
    #[error("failed to load {domain}@{version}: {reason}")]
    LoadFailure { domain: String, version: String, reason: String },
    #[error("active version lookup failed for {domain}: {reason}")]
    VersionLookup { domain: String, reason: String },
    #[error("model registry is shut down")]
    Closed,
}

/// Caller input rejected against bundle metadata.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InferenceError {
    #[error("feature schema mismatch: missing {missing:?}, unexpected {unexpected:?}")]
    SchemaMismatch { missing: Vec<String>, unexpected: Vec<String> },
    #[error("feature {feature} = {value} outside [{min}, {max}]")]
    RangeViolation { feature: String, value: f64, min: f64, max: f64 },
    #[error("model {domain}@{version} produced a non-finite score for these inputs")]
    NonFiniteScore { domain: String, version: String },
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComparisonError {
    #[error("modified inputs do not differ from the original in any declared feature")]
    NoChange,
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

/// Coarse classification used by transports to pick status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    LoadFailure,
    SchemaMismatch,
    RangeViolation,
    ScoringFailure,
    NoChange,
    Closed,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::LoadFailure => "load_failure",
            ErrorKind::SchemaMismatch => "schema_mismatch",
            ErrorKind::RangeViolation => "range_violation",
            ErrorKind::ScoringFailure => "scoring_failure",
            ErrorKind::NoChange => "no_change",
            ErrorKind::Closed => "closed",
        }
    }
}

/// Unified error for callers that drive the full resolve -> load -> score path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Comparison(#[from] ComparisonError),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Registry(RegistryError::NotFound { .. }) => ErrorKind::NotFound,
            Error::Registry(RegistryError::LoadFailure { .. })
            | Error::Registry(RegistryError::VersionLookup { .. }) => ErrorKind::LoadFailure,
            Error::Registry(RegistryError::Closed) => ErrorKind::Closed,
            Error::Inference(e) | Error::Comparison(ComparisonError::Inference(e)) => match e {
                InferenceError::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
                InferenceError::RangeViolation { .. } => ErrorKind::RangeViolation,
                InferenceError::NonFiniteScore { .. } => ErrorKind::ScoringFailure,
            },
            Error::Comparison(ComparisonError::NoChange) => ErrorKind::NoChange,
        }
    }

    /// Whether repeating the same call may succeed without changing the input.
    pub fn retryable(&self) -> bool { self.kind() == ErrorKind::LoadFailure }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
