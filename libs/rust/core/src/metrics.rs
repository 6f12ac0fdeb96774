//! Metric groups for the registry and the scoring path.
//!
//! Instruments are created lazily from the global meter, so call
//! [`crate::init_metrics`] before the first load or prediction for them to be
//! exported.

use once_cell::sync::Lazy;
use opentelemetry::metrics::{Counter, Histogram, Meter};
use opentelemetry::KeyValue;

pub struct RegistryMetrics {
    pub loads_total: Counter<u64>,
    pub load_failures_total: Counter<u64>,
    pub cache_hits_total: Counter<u64>,
    pub invalidations_total: Counter<u64>,
    pub load_latency_ms: Histogram<f64>,
}

pub struct InferenceMetrics {
    pub predictions_total: Counter<u64>,
    pub rejected_inputs_total: Counter<u64>,
    pub comparisons_total: Counter<u64>,
    pub scoring_latency_ms: Histogram<f64>,
}

static METER: Lazy<Meter> = Lazy::new(|| opentelemetry::global::meter("medscreen"));

pub static REGISTRY_METRICS: Lazy<RegistryMetrics> = Lazy::new(|| RegistryMetrics {
    loads_total: METER.u64_counter("medscreen_registry_loads_total").with_description("Bundle loads started").build(),
    load_failures_total: METER.u64_counter("medscreen_registry_load_failures_total").with_description("Bundle loads that ended FAILED").build(),
    cache_hits_total: METER.u64_counter("medscreen_registry_cache_hits_total").with_description("get_bundle calls served from a READY entry").build(),
    invalidations_total: METER.u64_counter("medscreen_registry_invalidations_total").with_description("Entries evicted by administrative action").build(),
    load_latency_ms: METER.f64_histogram("medscreen_registry_load_latency_ms").with_description("Fetch + decode latency per load (ms)").with_unit("ms").build(),
});

pub static INFERENCE_METRICS: Lazy<InferenceMetrics> = Lazy::new(|| InferenceMetrics {
    predictions_total: METER.u64_counter("medscreen_predictions_total").with_description("Successful predictions").build(),
    rejected_inputs_total: METER.u64_counter("medscreen_rejected_inputs_total").with_description("Inputs rejected by schema or range validation").build(),
    comparisons_total: METER.u64_counter("medscreen_comparisons_total").with_description("Successful what-if comparisons").build(),
    scoring_latency_ms: METER.f64_histogram("medscreen_scoring_latency_ms").with_description("Validate + score + explain latency (ms)").with_unit("ms").build(),
});

pub(crate) fn domain_attrs(domain: &str, version: &str) -> [KeyValue; 2] {
    [KeyValue::new("domain", domain.to_string()), KeyValue::new("version", version.to_string())]
}
