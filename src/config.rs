use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub queue: QueueConfig,
    pub llm: LLMConfig,
    pub search: SearchConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub workers: usize,
    /// Jobs allowed to wait for a worker before submission is refused
    pub capacity: usize,
    pub result_buffer_capacity: usize,
    pub result_push_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub job_retention_secs: u64,
    pub channel_retention_secs: u64,
    pub sweep_interval_secs: u64,
}

impl QueueConfig {
    pub fn result_push_timeout(&self) -> Duration {
        Duration::from_millis(self.result_push_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn channel_retention(&self) -> Duration {
        Duration::from_secs(self.channel_retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            capacity: 256,
            result_buffer_capacity: 512,
            result_push_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            shutdown_grace_ms: 10_000,
            job_retention_secs: 3_600,
            channel_retention_secs: 600,
            sweep_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LLMConfig {
    pub provider: String,
    pub groq_api_key: String,
    pub openai_api_key: String,
    pub openrouter_api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub max_retries: u32,
}

impl LLMConfig {
    /// Key for the configured provider; `None` means replies come from the offline adapter
    pub fn active_api_key(&self) -> Option<&str> {
        let key = match self.provider.as_str() {
            "groq" => &self.groq_api_key,
            "openai" => &self.openai_api_key,
            "openrouter" => &self.openrouter_api_key,
            _ => return None,
        };
        if key.is_empty() {
            None
        } else {
            Some(key.as_str())
        }
    }
}

pub fn default_model_for(provider: &str) -> &'static str {
    match provider {
        "openai" => "gpt-4o-mini",
        "openrouter" => "meta-llama/llama-3.3-70b-instruct",
        _ => "llama-3.3-70b-versatile",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchConfig {
    /// Text exports (`.txt`, `.md`) indexed at startup; pages are split on form feeds
    pub documents_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub dir: Option<PathBuf>,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: None,
            format: LogFormat::Pretty,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", key, raw)),
        None => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup; unset keys take their defaults
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let queue_defaults = QueueConfig::default();

        let provider = lookup("LLM_PROVIDER")
            .unwrap_or_else(|| "groq".to_string())
            .to_lowercase();
        let model = lookup("LLM_MODEL")
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| default_model_for(&provider).to_string());

        let format = match lookup("LOG_FORMAT").as_deref().map(str::to_lowercase).as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Self {
            server: ServerConfig {
                port: parse_or(&lookup, "PORT", 8000)?,
                host: lookup("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                cors_allowed_origins: lookup("ALLOWED_ORIGINS")
                    .unwrap_or_else(|| "http://localhost:3000,http://localhost:5173".to_string())
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            queue: QueueConfig {
                workers: parse_or(&lookup, "QUEUE_WORKERS", queue_defaults.workers)?,
                capacity: parse_or(&lookup, "QUEUE_CAPACITY", queue_defaults.capacity)?,
                result_buffer_capacity: parse_or(
                    &lookup,
                    "RESULT_BUFFER_CAPACITY",
                    queue_defaults.result_buffer_capacity,
                )?,
                result_push_timeout_ms: parse_or(
                    &lookup,
                    "RESULT_PUSH_TIMEOUT_MS",
                    queue_defaults.result_push_timeout_ms,
                )?,
                poll_interval_ms: parse_or(
                    &lookup,
                    "WORKER_POLL_INTERVAL_MS",
                    queue_defaults.poll_interval_ms,
                )?,
                shutdown_grace_ms: parse_or(
                    &lookup,
                    "SHUTDOWN_GRACE_MS",
                    queue_defaults.shutdown_grace_ms,
                )?,
                job_retention_secs: parse_or(
                    &lookup,
                    "JOB_RETENTION_SECS",
                    queue_defaults.job_retention_secs,
                )?,
                channel_retention_secs: parse_or(
                    &lookup,
                    "CHANNEL_RETENTION_SECS",
                    queue_defaults.channel_retention_secs,
                )?,
                sweep_interval_secs: parse_or(
                    &lookup,
                    "SWEEP_INTERVAL_SECS",
                    queue_defaults.sweep_interval_secs,
                )?,
            },
            llm: LLMConfig {
                provider,
                groq_api_key: lookup("GROQ_API_KEY").unwrap_or_default(),
                openai_api_key: lookup("OPENAI_API_KEY").unwrap_or_default(),
                openrouter_api_key: lookup("OPENROUTER_API_KEY").unwrap_or_default(),
                model,
                max_tokens: parse_or(&lookup, "LLM_MAX_TOKENS", 2048)?,
                temperature: parse_or(&lookup, "LLM_TEMPERATURE", 0.7)?,
                max_retries: parse_or(&lookup, "LLM_MAX_RETRIES", 3)?,
            },
            search: SearchConfig {
                documents_dir: lookup("DOCUMENTS_DIR")
                    .filter(|d| !d.is_empty())
                    .map(PathBuf::from),
            },
            logging: LoggingConfig {
                dir: lookup("LOG_DIR").filter(|d| !d.is_empty()).map(PathBuf::from),
                format,
            },
        })
    }
}
