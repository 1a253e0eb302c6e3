use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub completion: CompletionConfig,
    #[serde(default)]
    pub files: FilesConfig,
    #[serde(default)]
    pub quota: QuotaConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Inline key; takes precedence over `api_key_env` when set.
    #[serde(default)]
    pub api_key: Option<String>,
    pub default_model: String,
    #[serde(default)]
    pub fallback_models: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_retry_after_secs")]
    pub max_retry_after_secs: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_retry_after_secs() -> u64 {
    60
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_temperature() -> f64 {
    0.7
}
fn default_max_tokens() -> u32 {
    1000
}

impl CompletionConfig {
    fn with_model(default_model: &str) -> Self {
        Self {
            api_url: default_api_url(),
            api_key_env: default_api_key_env(),
            api_key: None,
            default_model: default_model.to_string(),
            fallback_models: Vec::new(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            max_retry_after_secs: default_max_retry_after_secs(),
            timeout_secs: default_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    /// The ordered model sequence: default first, then fallbacks.
    pub fn model_sequence(&self) -> Vec<String> {
        std::iter::once(self.default_model.clone())
            .chain(self.fallback_models.iter().cloned())
            .collect()
    }

    /// Resolves the bearer token, preferring the inline key.
    pub fn api_key(&self) -> Result<String> {
        if let Some(key) = &self.api_key {
            return Ok(key.clone());
        }
        std::env::var(&self.api_key_env)
            .with_context(|| format!("{} environment variable not set", self.api_key_env))
    }

    /// Delay before retry number `retry` (0-based): base, 2×base, 4×base, ...
    pub fn backoff(&self, retry: u32) -> Duration {
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1 << retry.min(5)))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesConfig {
    #[serde(default = "default_trusted_prefix")]
    pub trusted_prefix: String,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for FilesConfig {
    fn default() -> Self {
        Self {
            trusted_prefix: default_trusted_prefix(),
            max_file_bytes: default_max_file_bytes(),
            max_files: default_max_files(),
        }
    }
}

fn default_trusted_prefix() -> String {
    "https://raw.githubusercontent.com/".to_string()
}
fn default_max_file_bytes() -> usize {
    100 * 1024
}
fn default_max_files() -> usize {
    8
}

#[derive(Debug, Deserialize, Clone)]
pub struct QuotaConfig {
    #[serde(default = "default_max_generations")]
    pub max_generations: u32,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            max_generations: default_max_generations(),
        }
    }
}

fn default_max_generations() -> u32 {
    3
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

impl Config {
    /// An in-code configuration with every default applied.
    pub fn minimal(default_model: &str) -> Self {
        Self {
            completion: CompletionConfig::with_model(default_model),
            files: FilesConfig::default(),
            quota: QuotaConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let completion = &self.completion;

        if completion.default_model.trim().is_empty() {
            anyhow::bail!("completion.default_model must not be empty");
        }
        if completion
            .fallback_models
            .iter()
            .any(|m| m.trim().is_empty())
        {
            anyhow::bail!("completion.fallback_models must not contain empty entries");
        }
        if completion.max_attempts == 0 {
            anyhow::bail!("completion.max_attempts must be >= 1");
        }
        if !(0.0..=2.0).contains(&completion.temperature) {
            anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
        }
        if !(1..=100_000).contains(&completion.max_tokens) {
            anyhow::bail!("completion.max_tokens must be in [1, 100000]");
        }

        if self.files.max_file_bytes == 0 {
            anyhow::bail!("files.max_file_bytes must be > 0");
        }
        if self.files.max_files == 0 {
            anyhow::bail!("files.max_files must be > 0");
        }
        if !self.files.trusted_prefix.starts_with("https://")
            && !self.files.trusted_prefix.starts_with("http://")
        {
            anyhow::bail!(
                "files.trusted_prefix must be an http(s) URL prefix, got '{}'",
                self.files.trusted_prefix
            );
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}
