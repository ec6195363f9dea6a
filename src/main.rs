//! # PKI Sync Engine
//!
//! Reconciles issued certificates against external secret stores.
//!
//! ## Overview
//!
//! 1. **Enumerates** existing objects in the destination (AWS Secrets
//!    Manager secrets, Chef data bag items)
//! 2. **Plans** per-certificate actions from the desired set, sync records,
//!    and certificate renewal chains
//! 3. **Executes** creates, updates, and orphan deletions through a
//!    rate-limited connection queue, isolating per-item failures
//! 4. **Reports** granular counts plus itemized errors
//!
//! ## Features
//!
//! - **Idempotent**: re-running against converged state performs no writes
//! - **Rename on renewal**: schema-driven names follow certificate renewals,
//!   optionally preserving the predecessor's destination object
//! - **Prometheus metrics**: exposed on `/metrics` (port via `METRICS_PORT`)
//! - **Health probes**: `/healthz` and `/readyz` endpoints
//!
//! See the [README.md](../README.md) for usage details.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::warn;

use pki_sync_engine::cli::{self, Cli};
use pki_sync_engine::observability::metrics::register_metrics;
use pki_sync_engine::server::{start_server, RunTracker};

const DEFAULT_METRICS_PORT: u16 = 5000;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present; real environment wins
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pki_sync_engine=info".into()),
        )
        .init();

    register_metrics().context("Failed to register Prometheus metrics")?;

    // Serve metrics, probes, and run status for the lifetime of the run
    let port = metrics_port();
    let tracker = Arc::new(RunTracker::default());
    let server_tracker = Arc::clone(&tracker);
    tokio::spawn(async move {
        if let Err(e) = start_server(port, server_tracker).await {
            warn!("Status server failed: {}", e);
        }
    });
    tracker.mark_ready();

    cli::run(Cli::parse(), tracker).await
}

fn metrics_port() -> u16 {
    match std::env::var("METRICS_PORT") {
        Ok(value) => value.parse().unwrap_or_else(|_| {
            warn!("Invalid METRICS_PORT value {:?}, using {}", value, DEFAULT_METRICS_PORT);
            DEFAULT_METRICS_PORT
        }),
        Err(_) => DEFAULT_METRICS_PORT,
    }
}
