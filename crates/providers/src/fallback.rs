//! Fallback chains: the same request handed down an ordered list of backends.
//!
//! A configured backend with `fallback = [...]` becomes a chain whose first
//! link is the backend itself. Each link may carry a deadline; a link that
//! misses it counts as failed and the next one is tried. The error of the
//! last link is what the caller sees.

use async_trait::async_trait;
use procloom_core::backend::{BackendRequest, BackendResponse, ModelBackend};
use procloom_core::error::BackendError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// One backend in a chain.
#[derive(Clone)]
pub struct Link {
    backend: Arc<dyn ModelBackend>,
    deadline: Option<Duration>,
}

impl Link {
    pub fn new(backend: Arc<dyn ModelBackend>) -> Self {
        Self { backend, deadline: None }
    }

    /// Give up on this link after `deadline`, retries included.
    pub fn within(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    async fn call(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let Some(deadline) = self.deadline else {
            return self.backend.complete(request).await;
        };
        tokio::time::timeout(deadline, self.backend.complete(request))
            .await
            .unwrap_or_else(|_| {
                Err(BackendError::Timeout(format!(
                    "backend '{}' gave no answer within {:.1}s",
                    self.backend.name(),
                    deadline.as_secs_f64()
                )))
            })
    }
}

/// A named backend that tries its links in order until one answers.
pub struct FallbackBackend {
    name: String,
    links: Vec<Link>,
}

impl FallbackBackend {
    pub fn new(name: impl Into<String>, links: impl IntoIterator<Item = Link>) -> Self {
        Self {
            name: name.into(),
            links: links.into_iter().collect(),
        }
    }

    /// Names of the linked backends, in the order they are tried.
    pub fn backends(&self) -> Vec<&str> {
        self.links.iter().map(|l| l.backend.name()).collect()
    }
}

#[async_trait]
impl ModelBackend for FallbackBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: BackendRequest) -> Result<BackendResponse, BackendError> {
        let mut last_error = None;

        for (position, link) in self.links.iter().enumerate() {
            let backend = link.backend.name();
            debug!(chain = %self.name, backend, position, "Trying backend");
            match link.call(request.clone()).await {
                Ok(response) => {
                    if position > 0 {
                        info!(chain = %self.name, backend, skipped = position, "Served by fallback backend");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(chain = %self.name, backend, error = %e, "Backend failed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            BackendError::NotConfigured(format!("fallback chain '{}' has no backends", self.name))
        }))
    }

    /// Healthy while at least one link is.
    async fn health_check(&self) -> Result<bool, BackendError> {
        for link in &self.links {
            if matches!(link.backend.health_check().await, Ok(true)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
