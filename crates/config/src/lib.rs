//! Configuration loading, validation, and management for procloom.
//!
//! Loads configuration from `./procloom.toml` (or an explicit path) with
//! environment variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "procloom.toml";

/// The root configuration structure.
///
/// Maps directly to `procloom.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Program used when none is named explicitly
    #[serde(default = "default_program_name")]
    pub default_program: String,

    /// Named model backends
    #[serde(default = "default_backends")]
    pub backends: BTreeMap<String, BackendConfig>,

    /// Named programs
    #[serde(default = "default_programs")]
    pub programs: BTreeMap<String, ProgramConfig>,
}

fn default_program_name() -> String {
    "main".into()
}
fn default_backends() -> BTreeMap<String, BackendConfig> {
    BTreeMap::from([(default_backend_name(), BackendConfig::default())])
}
fn default_programs() -> BTreeMap<String, ProgramConfig> {
    BTreeMap::from([(default_program_name(), ProgramConfig::default())])
}
fn default_true() -> bool {
    true
}

/// Wire protocol spoken by a backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Any OpenAI-compatible `/chat/completions` endpoint
    #[default]
    OpenaiCompat,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-attempt request timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Retries after the first attempt, for retryable failures only
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base delay; doubles on every retry
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Other backends to try, in order, once this one gives up
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fallback: Vec<String>,
}

fn default_api_url() -> String {
    "https://openrouter.ai/api/v1".into()
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: BackendKind::default(),
            api_url: default_api_url(),
            api_key: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            fallback: Vec::new(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendConfig")
            .field("kind", &self.kind)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("timeout_secs", &self.timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("fallback", &self.fallback)
            .finish()
    }
}

/// One runnable program: a backend, a model, a prompt and a tool set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgramConfig {
    #[serde(default)]
    pub description: String,

    /// Name of an entry in `[backends]`
    #[serde(default = "default_backend_name")]
    pub backend: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub system_prompt: String,

    /// Backend round-trips allowed per run
    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    /// Tools enabled for this program, by name
    #[serde(default)]
    pub tools: Vec<String>,

    /// Programs reachable through the `spawn` tool
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub linked_programs: Vec<String>,

    /// How deep forks of this program may nest
    #[serde(default = "default_max_fork_depth")]
    pub max_fork_depth: usize,

    /// alias → tool name; the tool is exposed under the alias instead
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub aliases: BTreeMap<String, String>,

    #[serde(default)]
    pub fd: FdConfig,
}

fn default_backend_name() -> String {
    "default".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_turns() -> u32 {
    25
}
fn default_max_fork_depth() -> usize {
    1
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            description: "General purpose assistant".into(),
            backend: default_backend_name(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: None,
            system_prompt: "You are a helpful assistant.".into(),
            max_turns: default_max_turns(),
            tools: vec!["read_fd".into(), "fd_to_file".into()],
            aliases: BTreeMap::new(),
            linked_programs: Vec::new(),
            max_fork_depth: default_max_fork_depth(),
            fd: FdConfig::default(),
        }
    }
}

/// Large-content handling for one program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FdConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum characters per page
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Tool output longer than this is stored and previewed
    #[serde(default = "default_max_direct_output_chars")]
    pub max_direct_output_chars: usize,

    /// Characters of the first page shown inline
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,

    /// User input longer than this is stored when `page_user_input` is on
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,

    #[serde(default)]
    pub page_user_input: bool,

    /// Capture `<ref id="...">` blocks from model output
    #[serde(default)]
    pub enable_references: bool,
}

fn default_page_size() -> usize {
    4000
}
fn default_max_direct_output_chars() -> usize {
    8000
}
fn default_preview_chars() -> usize {
    500
}
fn default_max_input_chars() -> usize {
    8000
}

impl Default for FdConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            page_size: default_page_size(),
            max_direct_output_chars: default_max_direct_output_chars(),
            preview_chars: default_preview_chars(),
            max_input_chars: default_max_input_chars(),
            page_user_input: false,
            enable_references: false,
        }
    }
}

impl RuntimeConfig {
    /// Load `./procloom.toml`, then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_at(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Load a specific file, then apply environment overrides.
    ///
    /// Environment variables:
    /// - `PROCLOOM_API_KEY`, `OPENROUTER_API_KEY`, `OPENAI_API_KEY` fill in
    ///   any backend without an explicit `api_key` (first match wins)
    /// - `PROCLOOM_MODEL` replaces the default program's model
    pub fn load_at(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without overrides.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        tracing::debug!(
            path = %path.display(),
            programs = config.programs.len(),
            backends = config.backends.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Apply overrides from a variable lookup (normally the process environment).
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let api_key = ["PROCLOOM_API_KEY", "OPENROUTER_API_KEY", "OPENAI_API_KEY"]
            .iter()
            .find_map(|key| lookup(key).filter(|v| !v.is_empty()));
        if let Some(key) = api_key {
            for backend in self.backends.values_mut() {
                if backend.api_key.is_none() {
                    backend.api_key = Some(key.clone());
                }
            }
        }

        if let Some(model) = lookup("PROCLOOM_MODEL").filter(|v| !v.is_empty()) {
            if let Some(program) = self.programs.get_mut(&self.default_program) {
                program.model = model;
            }
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::ValidationError(msg));

        if !self.programs.contains_key(&self.default_program) {
            return invalid(format!(
                "default_program '{}' is not defined in [programs]",
                self.default_program
            ));
        }

        for (name, backend) in &self.backends {
            if backend.timeout_secs == 0 {
                return invalid(format!("backends.{name}.timeout_secs must be > 0"));
            }
            for fallback in &backend.fallback {
                if fallback == name {
                    return invalid(format!("backends.{name} lists itself as a fallback"));
                }
                if !self.backends.contains_key(fallback) {
                    return invalid(format!("backends.{name}.fallback names unknown backend '{fallback}'"));
                }
            }
        }

        for (name, program) in &self.programs {
            if !self.backends.contains_key(&program.backend) {
                return invalid(format!(
                    "programs.{name}.backend names unknown backend '{}'",
                    program.backend
                ));
            }
            if !(0.0..=2.0).contains(&program.temperature) {
                return invalid(format!("programs.{name}.temperature must be between 0.0 and 2.0"));
            }
            if program.max_turns == 0 {
                return invalid(format!("programs.{name}.max_turns must be at least 1"));
            }
            if program.fd.page_size == 0 {
                return invalid(format!("programs.{name}.fd.page_size must be at least 1"));
            }
            for linked in &program.linked_programs {
                if !self.programs.contains_key(linked) {
                    return invalid(format!("programs.{name}.linked_programs names unknown program '{linked}'"));
                }
            }
        }

        Ok(())
    }

    /// Look up a program by name.
    pub fn program(&self, name: &str) -> Option<&ProgramConfig> {
        self.programs.get(name)
    }

    /// Whether every backend has an API key.
    pub fn has_api_keys(&self) -> bool {
        self.backends.values().all(|b| b.api_key.is_some())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }

    /// Path the CLI uses when `--config` is not given.
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_FILE)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            default_program: default_program_name(),
            backends: default_backends(),
            programs: default_programs(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn parse(toml_str: &str) -> Result<RuntimeConfig, ConfigError> {
        let config: RuntimeConfig = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("inline"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn default_config_is_valid() {
        let config = RuntimeConfig::default();
        config.validate().unwrap();
        assert_eq!(config.default_program, "main");
        let main = config.program("main").unwrap();
        assert_eq!(main.max_turns, 25);
        assert_eq!(main.fd.page_size, 4000);
        assert_eq!(main.fd.max_direct_output_chars, 8000);
        assert!(main.fd.enabled);
        assert!(!main.fd.enable_references);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = RuntimeConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: RuntimeConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.default_program, config.default_program);
        assert_eq!(parsed.programs["main"].tools, config.programs["main"].tools);
    }

    #[test]
    fn full_program_table_parses() {
        let config = parse(
            r#"
            default_program = "lead"

            [backends.primary]
            api_url = "http://localhost:8080/v1"
            max_retries = 4
            fallback = ["backup"]

            [backends.backup]
            api_url = "http://localhost:9090/v1"

            [programs.lead]
            backend = "primary"
            model = "big-model"
            tools = ["read_fd", "spawn", "fork"]
            linked_programs = ["summarizer"]
            max_fork_depth = 2
            aliases = { read = "read_fd" }

            [programs.lead.fd]
            page_size = 2000
            enable_references = true

            [programs.summarizer]
            backend = "backup"
            description = "Summarizes text"
            max_turns = 5
            "#,
        )
        .unwrap();

        let lead = config.program("lead").unwrap();
        assert_eq!(lead.fd.page_size, 2000);
        assert!(lead.fd.enable_references);
        assert_eq!(lead.fd.preview_chars, 500);
        assert_eq!(lead.aliases["read"], "read_fd");
        assert_eq!(config.backends["primary"].max_retries, 4);
        assert_eq!(config.backends["backup"].timeout_secs, 120);
        assert_eq!(config.program("summarizer").unwrap().max_turns, 5);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = RuntimeConfig::default();
        config.programs.get_mut("main").unwrap().temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_page_size_and_turns_rejected() {
        let mut config = RuntimeConfig::default();
        config.programs.get_mut("main").unwrap().fd.page_size = 0;
        assert!(config.validate().is_err());

        let mut config = RuntimeConfig::default();
        config.programs.get_mut("main").unwrap().max_turns = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_references_rejected() {
        let err = parse(
            r#"
            [programs.main]
            linked_programs = ["ghost"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("ghost"));

        let err = parse(
            r#"
            [programs.main]
            backend = "nowhere"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("nowhere"));

        let err = parse(
            r#"
            [backends.default]
            fallback = ["missing"]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn missing_default_program_rejected() {
        assert!(parse(r#"default_program = "absent""#).is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = RuntimeConfig::load_from(Path::new("/nonexistent/procloom.toml"));
        let config = result.unwrap();
        assert_eq!(config.default_program, "main");
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[programs.main]\nmodel = \"from-file\"\nmax_turns = 3").unwrap();
        let config = RuntimeConfig::load_from(file.path()).unwrap();
        assert_eq!(config.programs["main"].model, "from-file");
        assert_eq!(config.programs["main"].max_turns, 3);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_program = [").unwrap();
        let err = RuntimeConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn overrides_fill_missing_keys_and_model() {
        let mut config = parse(
            r#"
            [backends.default]
            api_key = "explicit"

            [backends.other]
            "#,
        )
        .unwrap();
        config.apply_overrides(|key| match key {
            "OPENAI_API_KEY" => Some("from-env".into()),
            "PROCLOOM_MODEL" => Some("env-model".into()),
            _ => None,
        });
        assert_eq!(config.backends["default"].api_key.as_deref(), Some("explicit"));
        assert_eq!(config.backends["other"].api_key.as_deref(), Some("from-env"));
        assert_eq!(config.programs["main"].model, "env-model");
        assert!(config.has_api_keys());
    }

    #[test]
    fn api_key_is_redacted_in_debug() {
        let backend = BackendConfig {
            api_key: Some("sk-secret".into()),
            ..BackendConfig::default()
        };
        let debug = format!("{backend:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("REDACTED"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = RuntimeConfig::default_toml();
        assert!(toml_str.contains("default_program"));
        assert!(toml_str.contains("read_fd"));
        assert!(toml_str.contains("page_size"));
    }
}
