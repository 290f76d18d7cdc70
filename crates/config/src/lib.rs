//! Configuration loading, validation, and management for Educore.
//!
//! Loads configuration from `~/.educore/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use educore_core::provider::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use educore_core::query::{DEFAULT_CACHE_PREFIX, DEFAULT_TOP_K};

/// Upper bound for configured TTLs and ages, in seconds.
pub const MAX_DURATION_SECS: u64 = 365 * 24 * 60 * 60;

/// The root configuration structure.
///
/// Maps directly to `~/.educore/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Embedding + completion endpoint
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Query pipeline behaviour
    #[serde(default)]
    pub query: QueryConfig,

    /// Similarity retrieval
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Synthesis retry policy
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-call timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Response cache backend
    #[serde(default)]
    pub cache: CacheConfig,

    /// Knowledge graph store and sync freshness
    #[serde(default)]
    pub graph: GraphConfig,

    /// Shared database connection
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Learner-signal services
    #[serde(default)]
    pub personalization: PersonalizationConfig,
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    #[serde(default = "default_completion_model")]
    pub completion_model: String,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-large".into()
}
fn default_completion_model() -> String {
    "gpt-4.1-mini".into()
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            api_key: None,
            embedding_model: default_embedding_model(),
            completion_model: default_completion_model(),
        }
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("embedding_model", &self.embedding_model)
            .field("completion_model", &self.completion_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    #[serde(default = "default_top_k")]
    pub default_top_k: usize,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_cache_ttl_secs() -> u64 {
    300
}
fn default_top_k() -> usize {
    DEFAULT_TOP_K
}
fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}
fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}
fn default_system_prompt() -> String {
    "You are Educore Query Assistant. Be concise and cite sources when possible.".into()
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: default_cache_ttl_secs(),
            default_top_k: default_top_k(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

impl QueryConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Minimum similarity for a chunk to be returned
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Permit diagnostic retrieval without threshold filtering
    #[serde(default)]
    pub allow_unfiltered: bool,
}

fn default_similarity_threshold() -> f32 {
    0.25
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            allow_unfiltered: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_true")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    8000
}
fn default_true() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

/// Timeouts in milliseconds for each kind of external call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_embedding_timeout")]
    pub embedding_ms: u64,
    #[serde(default = "default_retrieval_timeout")]
    pub retrieval_ms: u64,
    #[serde(default = "default_synthesis_timeout")]
    pub synthesis_ms: u64,
    #[serde(default = "default_graph_timeout")]
    pub graph_ms: u64,
    #[serde(default = "default_cache_timeout")]
    pub cache_ms: u64,
    #[serde(default = "default_signal_timeout")]
    pub signal_ms: u64,
}

fn default_embedding_timeout() -> u64 {
    10_000
}
fn default_retrieval_timeout() -> u64 {
    5_000
}
fn default_synthesis_timeout() -> u64 {
    60_000
}
fn default_graph_timeout() -> u64 {
    2_000
}
fn default_cache_timeout() -> u64 {
    500
}
fn default_signal_timeout() -> u64 {
    3_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            embedding_ms: default_embedding_timeout(),
            retrieval_ms: default_retrieval_timeout(),
            synthesis_ms: default_synthesis_timeout(),
            graph_ms: default_graph_timeout(),
            cache_ms: default_cache_timeout(),
            signal_ms: default_signal_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// "memory", "postgres" or "none"
    #[serde(default = "default_cache_backend")]
    pub backend: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_cache_backend() -> String {
    "memory".into()
}
fn default_key_prefix() -> String {
    DEFAULT_CACHE_PREFIX.into()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: default_cache_backend(),
            key_prefix: default_key_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// "memory" or "postgres"
    #[serde(default = "default_graph_store")]
    pub store: String,

    #[serde(default = "default_max_sync_age_secs")]
    pub max_sync_age_secs: u64,

    #[serde(default = "default_max_nodes")]
    pub default_max_nodes: usize,
}

fn default_graph_store() -> String {
    "memory".into()
}
fn default_max_sync_age_secs() -> u64 {
    300
}
fn default_max_nodes() -> usize {
    10
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            store: default_graph_store(),
            max_sync_age_secs: default_max_sync_age_secs(),
            default_max_nodes: default_max_nodes(),
        }
    }
}

impl GraphConfig {
    pub fn max_sync_age(&self) -> Duration {
        Duration::from_secs(self.max_sync_age_secs)
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &redact(&self.url))
            .finish()
    }
}

/// Base URLs of the learner-signal services. Unset = signal disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonalizationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learner_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assessment_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub devlab_url: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.educore/config.toml).
    ///
    /// Environment variables override file values:
    /// - `EDUCORE_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `EDUCORE_API_URL`
    /// - `EDUCORE_DATABASE_URL`, then `DATABASE_URL`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
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
        Ok(config)
    }

    /// Apply environment overrides using `lookup` to read variables.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("EDUCORE_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.provider.api_key = Some(key);
        }
        if let Some(url) = lookup("EDUCORE_API_URL") {
            self.provider.api_url = url;
        }
        if let Some(url) = lookup("EDUCORE_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database.url = Some(url);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".educore")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.query.temperature) {
            return Err(ConfigError::ValidationError(
                "query.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let threshold = self.retrieval.similarity_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::ValidationError(
                "retrieval.similarity_threshold must be between 0.0 and 1.0".into(),
            ));
        }
        if threshold == 0.0 && !self.retrieval.allow_unfiltered {
            return Err(ConfigError::ValidationError(
                "retrieval.similarity_threshold = 0 disables filtering; set allow_unfiltered = true"
                    .into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        for (field, secs) in [
            ("query.cache_ttl_secs", self.query.cache_ttl_secs),
            ("graph.max_sync_age_secs", self.graph.max_sync_age_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::ValidationError(format!(
                    "{field} must be at most {MAX_DURATION_SECS} (one year)"
                )));
            }
        }

        if self.query.default_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "query.default_top_k must be at least 1".into(),
            ));
        }

        for (section, backend) in [("cache.backend", &self.cache.backend), ("graph.store", &self.graph.store)] {
            match backend.as_str() {
                "memory" | "none" => {}
                "postgres" if self.database.url.is_some() => {}
                "postgres" => {
                    return Err(ConfigError::ValidationError(format!(
                        "{section} = \"postgres\" requires database.url"
                    )));
                }
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "unknown {section} \"{other}\""
                    )));
                }
            }
        }

        if self.graph.store == "none" {
            return Err(ConfigError::ValidationError(
                "graph.store must be \"memory\" or \"postgres\"".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.provider.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
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

impl From<ConfigError> for educore_core::Error {
    fn from(e: ConfigError) -> Self {
        educore_core::Error::Config {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.query.cache_ttl_secs, 300);
        assert_eq!(config.query.default_top_k, 5);
        assert_eq!(config.graph.max_sync_age(), Duration::from_secs(300));
        assert_eq!(config.cache.key_prefix, "qp");
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.provider.embedding_model, config.provider.embedding_model);
        assert_eq!(parsed.retry.max_attempts, config.retry.max_attempts);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.query.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_threshold_requires_explicit_opt_in() {
        let mut config = AppConfig::default();
        config.retrieval.similarity_threshold = 0.0;
        assert!(config.validate().is_err());

        config.retrieval.allow_unfiltered = true;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn durations_are_bounded() {
        let mut config = AppConfig::default();
        config.query.cache_ttl_secs = u64::MAX;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("query.cache_ttl_secs"));

        config.query.cache_ttl_secs = MAX_DURATION_SECS;
        assert!(config.validate().is_ok());

        config.graph.max_sync_age_secs = MAX_DURATION_SECS + 1;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("graph.max_sync_age_secs"));
    }

    #[test]
    fn postgres_backend_requires_database_url() {
        let mut config = AppConfig::default();
        config.graph.store = "postgres".into();
        assert!(config.validate().is_err());

        config.database.url = Some("postgres://localhost/educore".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn unknown_cache_backend_rejected() {
        let mut config = AppConfig::default();
        config.cache.backend = "redis".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("redis"));
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.provider.completion_model, "gpt-4.1-mini");
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[query]
cache_ttl_secs = 120

[retrieval]
similarity_threshold = 0.4
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.query.cache_ttl(), Duration::from_secs(120));
        assert!((config.retrieval.similarity_threshold - 0.4).abs() < f32::EPSILON);
        assert_eq!(config.query.max_tokens, 800);
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[query\ncache_ttl_secs = ").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_take_priority() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-openai"),
            ("EDUCORE_API_KEY", "sk-educore"),
            ("DATABASE_URL", "postgres://db/educore"),
        ]);
        let mut config = AppConfig::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.provider.api_key.as_deref(), Some("sk-educore"));
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/educore"));
        assert!(config.has_api_key());
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = AppConfig::default();
        config.provider.api_key = Some("sk-secret".into());
        config.database.url = Some("postgres://user:pw@db".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(!debug.contains("pw@db"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("text-embedding-3-large"));
        assert!(toml_str.contains("cache_ttl_secs"));
    }
}
