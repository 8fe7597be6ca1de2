//! TOML configuration parsing and validation.
//!
//! Secrets (API keys, AWS credentials) are never read from this file; they
//! come from the environment when the corresponding client is built.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::AnalysisMode;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub reasoning: ReasoningConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7340".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackend {
    S3,
    #[default]
    Filesystem,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub root: Option<PathBuf>,
    #[serde(default = "default_signed_url_ttl")]
    pub signed_url_ttl_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Filesystem,
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            root: Some(PathBuf::from(".")),
            signed_url_ttl_secs: default_signed_url_ttl(),
        }
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_signed_url_ttl() -> u64 {
    300
}

/// How the reasoning service is asked to interpret the inputs.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Chat completion with images attached as multimodal content parts.
    #[default]
    Inline,
    /// Assistant run with documents staged as remote files.
    Assistant,
    /// Chat completion where image locators only appear as text.
    UrlOnly,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReasoningConfig {
    #[serde(default)]
    pub strategy: Strategy,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub assistant_id: Option<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Inline,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_secs: default_timeout_secs(),
            assistant_id: None,
            poll_interval_ms: default_poll_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
        }
    }
}

impl ReasoningConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_temperature() -> f32 {
    0.4
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_poll_interval_ms() -> u64 {
    1000
}
fn default_max_poll_interval_ms() -> u64 {
    8000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default)]
    pub default_mode: AnalysisMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            default_mode: AnalysisMode::Deep,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmailConfig {
    #[serde(default = "default_email_api_url")]
    pub api_url: String,
    #[serde(default)]
    pub from_email: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
    #[serde(default)]
    pub sandbox: bool,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            api_url: default_email_api_url(),
            from_email: String::new(),
            from_name: default_from_name(),
            sandbox: false,
        }
    }
}

fn default_email_api_url() -> String {
    "https://api.sendgrid.com/v3/mail/send".to_string()
}
fn default_from_name() -> String {
    "Root Cause Analysis System".to_string()
}

impl Config {
    /// Configuration used when no config file exists: local filesystem
    /// storage rooted at the working directory, inline strategy.
    pub fn minimal() -> Self {
        Self::default()
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    Ok(config)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    // Validate storage
    match config.storage.backend {
        StorageBackend::S3 => {
            if config.storage.bucket.trim().is_empty() {
                anyhow::bail!("storage.bucket must be set when backend is 's3'");
            }
        }
        StorageBackend::Filesystem => {
            if config.storage.root.is_none() {
                anyhow::bail!("storage.root must be set when backend is 'filesystem'");
            }
        }
    }
    if config.storage.signed_url_ttl_secs == 0 {
        anyhow::bail!("storage.signed_url_ttl_secs must be > 0");
    }

    // Validate reasoning
    if config.reasoning.timeout_secs == 0 {
        anyhow::bail!("reasoning.timeout_secs must be >= 1");
    }
    if !(0.0..=2.0).contains(&config.reasoning.temperature) {
        anyhow::bail!("reasoning.temperature must be in [0.0, 2.0]");
    }
    if config.reasoning.poll_interval_ms == 0
        || config.reasoning.poll_interval_ms > config.reasoning.max_poll_interval_ms
    {
        anyhow::bail!("reasoning.poll_interval_ms must be > 0 and <= max_poll_interval_ms");
    }
    if config.reasoning.strategy == Strategy::Assistant
        && config
            .reasoning
            .assistant_id
            .as_deref()
            .map(str::trim)
            .unwrap_or_default()
            .is_empty()
    {
        anyhow::bail!("reasoning.assistant_id must be set when strategy is 'assistant'");
    }

    // Validate pipeline
    if config.pipeline.max_concurrency == 0 {
        anyhow::bail!("pipeline.max_concurrency must be >= 1");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_config() {
        let cfg = parse_config(
            r#"
[server]
bind = "0.0.0.0:8080"

[storage]
backend = "s3"
bucket = "rca-uploads"
region = "eu-west-1"

[reasoning]
strategy = "assistant"
assistant_id = "asst_123"
timeout_secs = 60

[pipeline]
max_concurrency = 2
default_mode = "quick"
"#,
        )
        .unwrap();
        assert_eq!(cfg.server.bind, "0.0.0.0:8080");
        assert_eq!(cfg.storage.backend, StorageBackend::S3);
        assert_eq!(cfg.storage.signed_url_ttl_secs, 300);
        assert_eq!(cfg.reasoning.strategy, Strategy::Assistant);
        assert_eq!(cfg.reasoning.model, "gpt-4o-mini");
        assert_eq!(cfg.reasoning.timeout(), Duration::from_secs(60));
        assert_eq!(cfg.pipeline.default_mode, AnalysisMode::Quick);
    }

    #[test]
    fn empty_config_uses_local_defaults() {
        let cfg = parse_config("").unwrap();
        assert_eq!(cfg.storage.backend, StorageBackend::Filesystem);
        assert_eq!(cfg.reasoning.strategy, Strategy::Inline);
        assert_eq!(cfg.pipeline.max_concurrency, 4);
        assert!((cfg.reasoning.temperature - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let err = parse_config("[storage]\nbackend = \"s3\"\n").unwrap_err();
        assert!(err.to_string().contains("storage.bucket"));
    }

    #[test]
    fn assistant_strategy_requires_assistant_id() {
        let err = parse_config("[reasoning]\nstrategy = \"assistant\"\n").unwrap_err();
        assert!(err.to_string().contains("assistant_id"));
    }

    #[test]
    fn unknown_strategy_is_rejected() {
        assert!(parse_config("[reasoning]\nstrategy = \"batch\"\n").is_err());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let err = parse_config("[pipeline]\nmax_concurrency = 0\n").unwrap_err();
        assert!(err.to_string().contains("max_concurrency"));
    }
}
