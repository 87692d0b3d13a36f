//! # Metrics
//!
//! Prometheus metrics for monitoring the webhook.
//!
//! ## Metrics Exposed
//!
//! - `secrets_consumer_admission_requests_total` - Admission reviews handled, by outcome
//! - `secrets_consumer_pods_mutated_total` - Pods patched, by backend
//! - `secrets_consumer_containers_mutated_total` - Containers rewritten, by backend
//! - `secrets_consumer_mutation_errors_total` - Failed mutations, by error kind
//! - `secrets_consumer_secret_references_detected_total` - Secret references found in container env
//! - `secrets_consumer_registry_lookups_total` - Image config lookups, by result
//! - `secrets_consumer_mutation_duration_seconds` - Duration of a pod mutation

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static ADMISSION_REQUESTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_consumer_admission_requests_total",
            "Total number of admission reviews handled by outcome",
        ),
        &["outcome"],
    )
    .expect("Failed to create ADMISSION_REQUESTS_TOTAL metric - this should never happen")
});

static PODS_MUTATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_consumer_pods_mutated_total",
            "Total number of pods mutated by backend",
        ),
        &["backend"],
    )
    .expect("Failed to create PODS_MUTATED_TOTAL metric - this should never happen")
});

static CONTAINERS_MUTATED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_consumer_containers_mutated_total",
            "Total number of containers rewritten to run through the wrapper by backend",
        ),
        &["backend"],
    )
    .expect("Failed to create CONTAINERS_MUTATED_TOTAL metric - this should never happen")
});

static MUTATION_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_consumer_mutation_errors_total",
            "Total number of failed pod mutations by error kind",
        ),
        &["kind"],
    )
    .expect("Failed to create MUTATION_ERRORS_TOTAL metric - this should never happen")
});

static SECRET_REFERENCES_DETECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "secrets_consumer_secret_references_detected_total",
        "Total number of secret references detected in container environments",
    )
    .expect("Failed to create SECRET_REFERENCES_DETECTED_TOTAL metric - this should never happen")
});

static REGISTRY_LOOKUPS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "secrets_consumer_registry_lookups_total",
            "Total number of image config lookups by result",
        ),
        &["result"],
    )
    .expect("Failed to create REGISTRY_LOOKUPS_TOTAL metric - this should never happen")
});

static MUTATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "secrets_consumer_mutation_duration_seconds",
            "Duration of pod mutation in seconds",
        )
        .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0]),
    )
    .expect("Failed to create MUTATION_DURATION metric - this should never happen")
});

/// Register all metrics with the process registry
///
/// # Errors
///
/// Fails when called more than once.
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(ADMISSION_REQUESTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(PODS_MUTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CONTAINERS_MUTATED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MUTATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SECRET_REFERENCES_DETECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(REGISTRY_LOOKUPS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MUTATION_DURATION.clone()))?;

    Ok(())
}

pub fn increment_admission_requests(outcome: &str) {
    ADMISSION_REQUESTS_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn increment_pods_mutated(backend: &str) {
    PODS_MUTATED_TOTAL.with_label_values(&[backend]).inc();
}

pub fn increment_containers_mutated(backend: &str, count: usize) {
    CONTAINERS_MUTATED_TOTAL
        .with_label_values(&[backend])
        .inc_by(count as u64);
}

pub fn increment_mutation_errors(kind: &str) {
    MUTATION_ERRORS_TOTAL.with_label_values(&[kind]).inc();
}

pub fn increment_secret_references_detected(count: usize) {
    SECRET_REFERENCES_DETECTED_TOTAL.inc_by(count as u64);
}

pub fn increment_registry_lookups(result: &str) {
    REGISTRY_LOOKUPS_TOTAL.with_label_values(&[result]).inc();
}

pub fn observe_mutation_duration(duration: f64) {
    MUTATION_DURATION.observe(duration);
}
