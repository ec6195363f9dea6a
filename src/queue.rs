//! # Rate-Limited Connection Queue
//!
//! Wraps destination API calls with bounded concurrency and retry-on-rate-limit.
//!
//! Every remote call a destination adapter makes goes through
//! [`ConnectionQueue::with_rate_limit_retry`]:
//!
//! - At most `max_concurrent_requests` operations are in flight per queue
//!   instance (a `tokio` semaphore; one queue instance per destination
//!   adapter, shared across syncs to the same destination type).
//! - Failures classified as rate limiting (named throttling errors, or HTTP
//!   statuses in `rate_limit_status_codes`) are retried with exponential
//!   backoff starting at `base_delay`, doubling up to `max_delay`, for at
//!   most `max_retries` retries (`max_retries + 1` attempts total).
//! - Any other failure propagates immediately.
//!
//! Queue instances are constructed explicitly and injected into adapters;
//! there is no process-global queue state.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::error::DestinationError;

/// Rate limiting configuration for one destination type
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub max_concurrent_requests: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_retries: u32,
    pub rate_limit_status_codes: Vec<u16>,
}

impl RateLimitConfig {
    /// AWS Secrets Manager limits
    pub fn aws_secrets_manager() -> Self {
        Self {
            max_concurrent_requests: 10,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            max_retries: 3,
            rate_limit_status_codes: vec![429, 503],
        }
    }

    /// Chef servers generally have lower rate limits
    pub fn chef() -> Self {
        Self {
            max_concurrent_requests: 5,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_millis(30_000),
            max_retries: 3,
            rate_limit_status_codes: vec![429, 503],
        }
    }
}

/// Identifies the wrapped operation in logs
#[derive(Debug, Clone, Copy)]
pub struct OperationContext<'a> {
    pub operation: &'a str,
    pub sync_id: &'a str,
}

/// Concurrency-bounded, retrying executor for destination API calls
#[derive(Debug, Clone)]
pub struct ConnectionQueue {
    semaphore: Arc<Semaphore>,
    config: RateLimitConfig,
}

impl ConnectionQueue {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_requests)),
            config,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Run `operation` under the concurrency cap, retrying rate-limited
    /// failures with exponential backoff.
    ///
    /// A post-retry error is a hard failure for this single operation only;
    /// callers must not let it abort sibling operations in the same run.
    pub async fn with_rate_limit_retry<T, F, Fut>(
        &self,
        ctx: OperationContext<'_>,
        mut operation: F,
    ) -> Result<T, DestinationError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, DestinationError>>,
    {
        // The semaphore is never closed, so acquire can only fail if the
        // queue itself was dropped mid-call.
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| DestinationError::api("connection queue shut down"))?;

        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        debug!(
                            "Operation {} succeeded after {} retries [syncId={}]",
                            ctx.operation, attempt, ctx.sync_id
                        );
                    }
                    return Ok(value);
                }
                Err(err)
                    if err.is_rate_limit(&self.config.rate_limit_status_codes)
                        && attempt < self.config.max_retries =>
                {
                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "Rate limited on {} [syncId={}], retrying in {:?} (attempt {}/{}): {}",
                        ctx.operation,
                        ctx.sync_id,
                        delay,
                        attempt + 1,
                        self.config.max_retries,
                        err
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.config
            .base_delay
            .saturating_mul(factor)
            .min(self.config.max_delay)
    }
}
