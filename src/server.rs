//! # Status Server
//!
//! HTTP endpoints served for the lifetime of a sync process:
//!
//! - `/metrics` - Prometheus metrics in text format
//! - `/healthz` - liveness probe, always 200
//! - `/readyz` - 503 until startup is complete, 200 after
//! - `/status` - JSON snapshot of run activity
//!
//! Listens on `METRICS_PORT` (default 5000). Readiness and run activity
//! come from the [`RunTracker`] shared with the sync driver.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::destination::SyncCertificatesResult;
use crate::error::SyncError;

/// Run activity shared between the sync driver and the status endpoints.
///
/// The driver calls [`run_started`](Self::run_started) /
/// [`run_finished`](Self::run_finished) around each reconciliation run;
/// `/readyz` and `/status` read the other side.
#[derive(Debug, Default)]
pub struct RunTracker {
    ready: AtomicBool,
    runs_in_flight: AtomicU64,
    runs_completed: AtomicU64,
    last_run: Mutex<Option<LastRun>>,
}

/// Outcome of the most recently finished run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LastRun {
    pub sync_id: String,
    pub finished_at: DateTime<Utc>,
    pub succeeded: bool,
    pub uploaded: u32,
    pub updated: u32,
    pub removed: u32,
    pub skipped: u32,
    pub failed_uploads: u32,
    pub failed_removals: u32,
    /// Fatal error text when the run aborted before producing a result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusSnapshot {
    ready: bool,
    runs_in_flight: u64,
    runs_completed: u64,
    last_run: Option<LastRun>,
}

impl RunTracker {
    /// Flip `/readyz` to 200 once startup (metrics registration, config
    /// loading) is complete
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    pub fn run_started(&self) {
        self.runs_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished run, fatal or not
    pub fn run_finished(&self, sync_id: &str, run: &Result<SyncCertificatesResult, SyncError>) {
        self.runs_in_flight.fetch_sub(1, Ordering::Relaxed);
        self.runs_completed.fetch_add(1, Ordering::Relaxed);

        let last = match run {
            Ok(result) => LastRun {
                sync_id: sync_id.to_string(),
                finished_at: Utc::now(),
                succeeded: result.details.failed_uploads.is_empty()
                    && result.failed_removals == 0,
                uploaded: result.uploaded,
                updated: result.updated,
                removed: result.removed,
                skipped: result.skipped,
                failed_uploads: result.details.failed_uploads.len() as u32,
                failed_removals: result.failed_removals,
                error: None,
            },
            Err(err) => LastRun {
                sync_id: sync_id.to_string(),
                finished_at: Utc::now(),
                succeeded: false,
                uploaded: 0,
                updated: 0,
                removed: 0,
                skipped: 0,
                failed_uploads: 0,
                failed_removals: 0,
                error: Some(err.to_string()),
            },
        };

        if let Ok(mut guard) = self.last_run.lock() {
            *guard = Some(last);
        }
    }

    fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            ready: self.is_ready(),
            runs_in_flight: self.runs_in_flight.load(Ordering::Relaxed),
            runs_completed: self.runs_completed.load(Ordering::Relaxed),
            last_run: self
                .last_run
                .lock()
                .ok()
                .and_then(|guard| guard.clone()),
        }
    }
}

pub async fn start_server(port: u16, tracker: Arc<RunTracker>) -> Result<(), anyhow::Error> {
    let app = Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/status", get(status_handler))
        .with_state(tracker);

    let addr = format!("0.0.0.0:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("Status server listening on {addr}");

    axum::serve(listener, app).await?;
    Ok(())
}

async fn metrics_handler() -> impl IntoResponse {
    let families = crate::observability::metrics::REGISTRY.gather();
    let mut buffer = Vec::new();
    match TextEncoder::new().encode(&families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(err) => {
            error!("Failed to encode metrics: {err}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {err}").into_bytes(),
            )
        }
    }
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(tracker): State<Arc<RunTracker>>) -> impl IntoResponse {
    if tracker.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn status_handler(State(tracker): State<Arc<RunTracker>>) -> impl IntoResponse {
    Json(tracker.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_starts_not_ready() {
        let tracker = RunTracker::default();
        assert!(!tracker.is_ready());
        tracker.mark_ready();
        assert!(tracker.is_ready());
    }

    #[test]
    fn test_successful_run_lands_in_snapshot() {
        let tracker = RunTracker::default();
        tracker.run_started();
        assert_eq!(tracker.snapshot().runs_in_flight, 1);

        let result = SyncCertificatesResult {
            uploaded: 2,
            skipped: 1,
            ..Default::default()
        };
        tracker.run_finished("sync-1", &Ok(result));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.runs_in_flight, 0);
        assert_eq!(snapshot.runs_completed, 1);
        let last = snapshot.last_run.expect("last run missing");
        assert_eq!(last.sync_id, "sync-1");
        assert!(last.succeeded);
        assert_eq!(last.uploaded, 2);
        assert_eq!(last.skipped, 1);
        assert!(last.error.is_none());
    }

    #[test]
    fn test_fatal_run_recorded_as_failure() {
        let tracker = RunTracker::default();
        tracker.run_started();
        tracker.run_finished("sync-1", &Err(SyncError::Auth("expired credentials".to_string())));

        let last = tracker.snapshot().last_run.expect("last run missing");
        assert!(!last.succeeded);
        assert!(last.error.expect("error missing").contains("expired credentials"));
    }

    #[test]
    fn test_per_item_failures_mark_run_unsuccessful() {
        let tracker = RunTracker::default();
        tracker.run_started();

        let mut result = SyncCertificatesResult {
            uploaded: 1,
            ..Default::default()
        };
        result.details.failed_uploads.push(crate::destination::ItemError {
            name: "bad-cert".to_string(),
            error: "create denied".to_string(),
        });
        tracker.run_finished("sync-1", &Ok(result));

        let last = tracker.snapshot().last_run.expect("last run missing");
        assert!(!last.succeeded);
        assert_eq!(last.failed_uploads, 1);
        assert!(last.error.is_none());
    }
}
