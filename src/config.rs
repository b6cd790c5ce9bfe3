use clap::Parser;
use clap::builder::BoolishValueParser;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::gateway::ThrottleConfig;
use crate::gemini::DEFAULT_BASE_URL;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing API key: set GEMINI_API_KEY or GOOGLE_API_KEY (or pass --api-key)")]
    MissingApiKey,
}

// CLI argument structure, every flag can also come from the environment
#[derive(Parser, Debug, Clone)]
#[command(name = "nano-gateway")]
#[command(about = "Rate-limited proxy for Gemini image generation and editing")]
pub struct Args {
    // Port to run the server on
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    // Upstream credential; GOOGLE_API_KEY is checked when this is unset
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    // Comma-separated CORS origins
    #[arg(
        long,
        env = "ALLOWED_ORIGINS",
        default_value = "http://localhost:5500,http://127.0.0.1:5500"
    )]
    pub allowed_origins: String,

    #[arg(long, env = "DEFAULT_MODEL", default_value = "gemini-2.5-flash-image-preview")]
    pub default_model: String,

    #[arg(long, env = "GENAI_BASE_URL", default_value = DEFAULT_BASE_URL)]
    pub upstream_url: String,

    // Retries after an upstream rate limit
    #[arg(long, env = "GENAI_MAX_RETRIES", default_value_t = 2)]
    pub max_retries: u32,

    // Backoff base, doubled on every retry
    #[arg(long, env = "GENAI_BACKOFF_MS", default_value_t = 250)]
    pub backoff_ms: u64,

    #[arg(
        long,
        env = "GENAI_FORCE_SINGLE_ON_RETRY",
        default_value = "true",
        value_parser = BoolishValueParser::new(),
        action = clap::ArgAction::Set
    )]
    pub force_single_on_retry: bool,

    // Upstream calls allowed in flight at once
    #[arg(long, env = "GENAI_MAX_CONCURRENT", default_value_t = 2)]
    pub max_concurrent: usize,

    // Minimum gap between upstream call starts
    #[arg(long, env = "GENAI_MIN_INTERVAL_MS", default_value_t = 300)]
    pub min_interval_ms: u64,

    // How long a request may wait for an upstream slot
    #[arg(long, env = "GENAI_ACQUIRE_TIMEOUT_SECS", default_value_t = 30)]
    pub acquire_timeout_secs: u64,

    #[arg(long, env = "DB_PATH", default_value = "app.db")]
    pub db_path: PathBuf,

    // Directory holding index.html
    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    pub public_dir: PathBuf,

    #[arg(long, env = "MAX_UPLOAD_MB", default_value_t = 32)]
    pub max_upload_mb: usize,

    // Daily-rotated app.log files land here
    #[arg(long, env = "LOG_DIR", default_value = "logs")]
    pub log_dir: PathBuf,
}

impl Args {
    pub fn api_key(&self) -> Result<String, ConfigError> {
        self.api_key
            .clone()
            .or_else(|| std::env::var("GOOGLE_API_KEY").ok())
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }

    pub fn origins(&self) -> Vec<String> {
        self.allowed_origins
            .split(',')
            .map(|s| s.trim()) // remove spaces
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn throttle(&self) -> ThrottleConfig {
        ThrottleConfig {
            max_concurrent: self.max_concurrent.max(1),
            min_interval: Duration::from_millis(self.min_interval_ms),
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
            max_retries: self.max_retries,
            backoff_base: Duration::from_millis(self.backoff_ms),
            force_single_candidate_on_retry: self.force_single_on_retry,
        }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}
