//! Bounded retry with exponential backoff for downstream calls
//!
//! Only errors classified as retryable (`DownstreamNetworkError`: transport
//! failures, timeouts, 429 and 502-504) are retried.

use crate::error::AtlassianMcpResult;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

/// First backoff delay
pub const INITIAL_RETRY_DELAY_MS: u64 = 500;

/// Backoff ceiling
pub const MAX_RETRY_DELAY_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: Duration::from_millis(INITIAL_RETRY_DELAY_MS),
            max_delay: Duration::from_millis(MAX_RETRY_DELAY_MS),
        }
    }

    /// A policy that never retries
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Backoff before retry number `retry` (0-based), without jitter
    pub fn base_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }

    /// Backoff with up to 25% random jitter added
    fn jittered_delay(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        let jitter_ms = (base.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return base;
        }
        base + Duration::from_millis(rand::rng().random_range(0..=jitter_ms))
    }
}

/// Run `operation`, retrying retryable failures per `policy`
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> AtlassianMcpResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AtlassianMcpResult<T>>,
{
    let mut retry = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if retry > 0 {
                    info!("{} succeeded after {} retries", operation_name, retry);
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_retryable() || retry >= policy.max_retries {
                    if retry > 0 {
                        warn!("{} failed after {} retries: {}", operation_name, retry, e);
                    }
                    return Err(e);
                }

                let delay = policy.jittered_delay(retry);
                warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    operation_name,
                    retry + 1,
                    policy.max_retries + 1,
                    delay.as_millis(),
                    e
                );

                tokio::time::sleep(delay).await;
                retry += 1;
            }
        }
    }
}
