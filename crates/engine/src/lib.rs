//! # procloom engine
//!
//! Runs processes: the multi-turn loop between a model backend and a tool
//! registry, mediated by the plugin bus.
//!
//! - [`ProcessEngine`]: one conversation, one content store, one loop
//! - [`FileDescriptorPlugin`]: keeps large content out of the conversation
//! - [`ProcessFactory`]: creates processes from named programs and serves
//!   `spawn`/`fork` requests from their tools
//!
//! ```ignore
//! let config = RuntimeConfig::load()?;
//! let factory = ProcessFactory::from_config(config)?;
//! let mut process = factory.create_default()?;
//! let result = process.run("Summarize ./notes.md").await?;
//! println!("{}", result.text);
//! ```

pub mod factory;
pub mod fd;
pub mod process;
pub mod prompt;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use factory::{ProcessFactory, ProcessFactoryBuilder, ProcessLink};
pub use fd::FileDescriptorPlugin;
pub use process::ProcessEngine;
