//! Retry policy wrapper: exponential backoff with a per-attempt timeout.
//!
//! Only errors for which [`BackendError::is_retryable`] holds are retried.
//! Everything else is returned on the first occurrence.

use async_trait::async_trait;
use procloom_core::backend::{BackendRequest, BackendResponse, ModelBackend};
use procloom_core::error::BackendError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Longest single backoff, including server-requested `retry-after`.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Wraps a backend with retries.
pub struct RetryBackend {
    inner: Arc<dyn ModelBackend>,
    max_retries: u32,
    base_delay: Duration,
    attempt_timeout: Option<Duration>,
}

impl RetryBackend {
    pub fn new(inner: Arc<dyn ModelBackend>) -> Self {
        Self {
            inner,
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            attempt_timeout: None,
        }
    }

    /// Retries after the first attempt.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Delay before the first retry; doubles each time.
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Give up on a single attempt after `timeout`.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Worst-case wall time across every attempt, ignoring `retry-after`.
    pub fn budget(&self) -> Option<Duration> {
        let per_attempt = self.attempt_timeout?;
        let attempts = self.max_retries + 1;
        let backoff: Duration = (0..self.max_retries).map(|n| self.backoff(n)).sum();
        Some(per_attempt * attempts + backoff)
    }

    fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(MAX_DELAY)
    }

    async fn attempt(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        match self.attempt_timeout {
            Some(limit) => tokio::time::timeout(limit, self.inner.complete(request))
                .await
                .unwrap_or_else(|_| {
                    Err(BackendError::Timeout(format!(
                        "'{}' did not answer within {}ms",
                        self.inner.name(),
                        limit.as_millis()
                    )))
                }),
            None => self.inner.complete(request).await,
        }
    }
}

#[async_trait]
impl ModelBackend for RetryBackend {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut retry = 0;
        loop {
            match self.attempt(request.clone()).await {
                Ok(response) => {
                    if retry > 0 {
                        debug!(backend = self.inner.name(), retries = retry, "Backend recovered");
                    }
                    return Ok(response);
                }
                Err(e) if e.is_retryable() && retry < self.max_retries => {
                    let mut delay = self.backoff(retry);
                    if let BackendError::RateLimited { retry_after_secs } = &e {
                        delay = delay.max(Duration::from_secs(*retry_after_secs)).min(MAX_DELAY);
                    }
                    retry += 1;
                    warn!(
                        backend = self.inner.name(),
                        error = %e,
                        retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Backend call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn health_check(&self) -> Result<bool, BackendError> {
        self.inner.health_check().await
    }
}
