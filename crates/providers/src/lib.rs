//! Model backend implementations for procloom.
//!
//! All backends implement `procloom_core::ModelBackend`. The router builds
//! them from configuration, wrapping each in a retry policy and, where
//! configured, a fallback chain.

pub mod fallback;
pub mod openai_compat;
pub mod retry;
pub mod router;

pub use fallback::{FallbackBackend, Link};
pub use openai_compat::OpenAiCompatBackend;
pub use retry::RetryBackend;
pub use router::{BackendRouter, build_from_config};
