//! Backend router: resolves configured backends by name.
//!
//! Every configured backend is wrapped in a [`RetryBackend`]; backends with a
//! `fallback` list are additionally wrapped in a [`FallbackBackend`] whose
//! chain is the backend itself followed by its fallbacks.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use procloom_config::{BackendConfig, BackendKind, RuntimeConfig};
use procloom_core::backend::ModelBackend;
use procloom_core::error::BackendError;
use tracing::debug;

use crate::fallback::{FallbackBackend, Link};
use crate::openai_compat::OpenAiCompatBackend;
use crate::retry::RetryBackend;

/// Routes programs to their backend.
#[derive(Clone, Default)]
pub struct BackendRouter {
    backends: BTreeMap<String, Arc<dyn ModelBackend>>,
}

impl BackendRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, backend: Arc<dyn ModelBackend>) {
        self.backends.insert(name.into(), backend);
    }

    /// Get a backend by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ModelBackend>> {
        self.backends.get(name).cloned()
    }

    /// Get a backend or fail with `NotConfigured`.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn ModelBackend>, BackendError> {
        self.get(name)
            .ok_or_else(|| BackendError::NotConfigured(format!("no backend named '{name}'")))
    }

    /// Registered backend names, sorted.
    pub fn list(&self) -> Vec<&str> {
        self.backends.keys().map(|s| s.as_str()).collect()
    }
}

impl std::fmt::Debug for BackendRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.list()).finish()
    }
}

/// Build every configured backend.
pub fn build_from_config(config: &RuntimeConfig) -> BackendRouter {
    let base: BTreeMap<&str, (Arc<RetryBackend>, &BackendConfig)> = config
        .backends
        .iter()
        .map(|(name, cfg)| (name.as_str(), (Arc::new(build_one(name, cfg)), cfg)))
        .collect();

    let mut router = BackendRouter::new();
    for (name, (backend, cfg)) in &base {
        if cfg.fallback.is_empty() {
            router.register(*name, backend.clone() as Arc<dyn ModelBackend>);
            continue;
        }

        // validated: every fallback names a configured backend
        let links = std::iter::once(*name)
            .chain(cfg.fallback.iter().map(String::as_str))
            .filter_map(|link| base.get(link))
            .map(|(b, c)| Link::new(b.clone()).within(chain_timeout(b, c)));
        let chain = FallbackBackend::new(*name, links);
        debug!(backend = %name, chain = ?chain.backends(), "Built fallback chain");
        router.register(*name, Arc::new(chain));
    }
    router
}

fn build_one(name: &str, cfg: &BackendConfig) -> RetryBackend {
    let timeout = Duration::from_secs(cfg.timeout_secs);
    let http: Arc<dyn ModelBackend> = match cfg.kind {
        BackendKind::OpenaiCompat => Arc::new(
            OpenAiCompatBackend::new(name, &cfg.api_url, cfg.api_key.clone().unwrap_or_default())
                .with_timeout(timeout),
        ),
    };
    RetryBackend::new(http)
        .max_retries(cfg.max_retries)
        .base_delay(Duration::from_millis(cfg.retry_backoff_ms))
        .attempt_timeout(timeout)
}

/// The fallback chain must not cut a backend off while it is still retrying.
fn chain_timeout(backend: &RetryBackend, cfg: &BackendConfig) -> Duration {
    backend
        .budget()
        .unwrap_or(Duration::from_secs(cfg.timeout_secs))
        .saturating_add(Duration::from_secs(1))
}
