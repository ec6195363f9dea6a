//! # Observability
//!
//! Prometheus metrics for monitoring sync runs and destination API calls.

pub mod metrics;

// Re-export for convenience
pub use metrics::*;
