//! # Metrics
//!
//! Prometheus metrics for monitoring the sync engine.
//!
//! ## Metrics Exposed
//!
//! - `pki_sync_runs_total` - Total number of sync runs by destination
//! - `pki_sync_run_errors_total` - Total number of fatally failed sync runs
//! - `pki_sync_run_duration_seconds` - Duration of sync runs
//! - `pki_sync_certificates_uploaded_total` - Certificates created or updated
//! - `pki_sync_certificates_removed_total` - Destination objects removed
//! - `pki_sync_destination_operations_total` - Destination API calls by operation
//! - `pki_sync_destination_operation_duration_seconds` - Duration of destination API calls

use anyhow::Result;
use prometheus::{HistogramVec, IntCounterVec, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static SYNC_RUNS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new("pki_sync_runs_total", "Total number of sync runs"),
        &["destination"],
    )
    .expect("Failed to create SYNC_RUNS_TOTAL metric - this should never happen")
});

static SYNC_RUN_ERRORS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pki_sync_run_errors_total",
            "Total number of sync runs that failed fatally",
        ),
        &["destination"],
    )
    .expect("Failed to create SYNC_RUN_ERRORS_TOTAL metric - this should never happen")
});

static SYNC_RUN_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pki_sync_run_duration_seconds",
            "Duration of sync runs in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]),
        &["destination"],
    )
    .expect("Failed to create SYNC_RUN_DURATION metric - this should never happen")
});

static CERTIFICATES_UPLOADED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pki_sync_certificates_uploaded_total",
            "Total number of certificates created or updated in destinations",
        ),
        &["destination"],
    )
    .expect("Failed to create CERTIFICATES_UPLOADED_TOTAL metric - this should never happen")
});

static CERTIFICATES_REMOVED_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pki_sync_certificates_removed_total",
            "Total number of destination objects removed",
        ),
        &["destination"],
    )
    .expect("Failed to create CERTIFICATES_REMOVED_TOTAL metric - this should never happen")
});

static DESTINATION_OPERATIONS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        prometheus::Opts::new(
            "pki_sync_destination_operations_total",
            "Total number of destination API operations",
        ),
        &["destination", "operation"],
    )
    .expect("Failed to create DESTINATION_OPERATIONS_TOTAL metric - this should never happen")
});

static DESTINATION_OPERATION_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    HistogramVec::new(
        prometheus::HistogramOpts::new(
            "pki_sync_destination_operation_duration_seconds",
            "Duration of destination API operations in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0]),
        &["destination", "operation"],
    )
    .expect("Failed to create DESTINATION_OPERATION_DURATION metric - this should never happen")
});

#[allow(
    clippy::missing_errors_doc,
    reason = "Error documentation is provided in doc comments"
)]
pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(SYNC_RUNS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_RUN_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(SYNC_RUN_DURATION.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_UPLOADED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CERTIFICATES_REMOVED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DESTINATION_OPERATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(DESTINATION_OPERATION_DURATION.clone()))?;

    Ok(())
}

pub fn increment_sync_runs(destination: &str) {
    SYNC_RUNS_TOTAL.with_label_values(&[destination]).inc();
}

pub fn increment_sync_run_errors(destination: &str) {
    SYNC_RUN_ERRORS_TOTAL.with_label_values(&[destination]).inc();
}

pub fn observe_sync_run_duration(destination: &str, duration: f64) {
    SYNC_RUN_DURATION
        .with_label_values(&[destination])
        .observe(duration);
}

pub fn increment_certificates_uploaded(destination: &str, count: u64) {
    CERTIFICATES_UPLOADED_TOTAL
        .with_label_values(&[destination])
        .inc_by(count);
}

pub fn increment_certificates_removed(destination: &str, count: u64) {
    CERTIFICATES_REMOVED_TOTAL
        .with_label_values(&[destination])
        .inc_by(count);
}

pub fn record_destination_operation(destination: &str, operation: &str, duration: f64) {
    DESTINATION_OPERATIONS_TOTAL
        .with_label_values(&[destination, operation])
        .inc();
    DESTINATION_OPERATION_DURATION
        .with_label_values(&[destination, operation])
        .observe(duration);
}
