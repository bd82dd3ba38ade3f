
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::transcribe::DEFAULT_GUIDANCE_PROMPT;

/// How inbound events reach the engine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Long-poll the bridge's event stream.
    #[default]
    Poll,
    /// Let the bridge push events to our webhook endpoint.
    Webhook,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub transcription: TranscriptionConfig,

    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Base URL of the bridge gateway holding the WhatsApp session.
    #[serde(default = "default_bridge_url")]
    pub base_url: String,

    /// Env var holding the gateway bearer token, if the gateway requires one.
    #[serde(default)]
    pub api_token_env: Option<String>,

    #[serde(default)]
    pub ingest: IngestMode,

    /// Long-poll window handed to the gateway (poll mode).
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u64,

    /// Listen address for pushed events (webhook mode).
    #[serde(default = "default_webhook_bind")]
    pub webhook_bind: String,

    #[serde(default = "default_webhook_port")]
    pub webhook_port: u16,

    /// Shared secret the bridge must echo in `x-bridge-secret-token`.
    #[serde(default)]
    pub webhook_secret_token: Option<String>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            api_token_env: None,
            ingest: IngestMode::Poll,
            poll_timeout_secs: default_poll_timeout(),
            webhook_bind: default_webhook_bind(),
            webhook_port: default_webhook_port(),
            webhook_secret_token: None,
        }
    }
}

impl BridgeConfig {
    /// Resolve the gateway token from the configured env var, if any.
    pub fn api_token(&self) -> Result<Option<String>> {
        match &self.api_token_env {
            Some(var) => {
                let token = std::env::var(var)
                    .with_context(|| format!("Bridge API token not set ({} is empty)", var))?;
                Ok(Some(token))
            }
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// "groq", "cloudflare" or "local".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Language hint forwarded to the STT provider.
    #[serde(default = "default_language")]
    pub language: Option<String>,

    /// Spelling/style guidance forwarded to providers that accept a prompt.
    #[serde(default = "default_guidance_prompt")]
    pub guidance_prompt: Option<String>,

    /// Overrides the provider's default model name.
    #[serde(default)]
    pub model: Option<String>,

    /// Overrides the provider's API base URL (groq).
    #[serde(default)]
    pub base_url: Option<String>,

    /// Env var holding the Groq API key. Default: GROQ_API_KEY.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Env var holding the Cloudflare account id. Default: CF_ACCOUNT_ID.
    #[serde(default)]
    pub cf_account_id_env: Option<String>,

    /// Env var holding the Cloudflare API token. Default: CF_API_KEY.
    #[serde(default)]
    pub cf_api_token_env: Option<String>,

    /// Shell template for the local backend; `{}` is the audio path.
    #[serde(default)]
    pub local_command: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            language: default_language(),
            guidance_prompt: default_guidance_prompt(),
            model: None,
            base_url: None,
            api_key_env: None,
            cf_account_id_env: None,
            cf_api_token_env: None,
            local_command: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for temporary audio artifacts.
    #[serde(default = "default_media_dir")]
    pub media_dir: String,

    /// Path of the exclusion list.
    #[serde(default = "default_exclusions_file")]
    pub exclusions_file: String,

    /// Wall-clock bound on one fetch+transcribe+reply job.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    /// How long shutdown waits for in-flight jobs before abandoning them.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            media_dir: default_media_dir(),
            exclusions_file: default_exclusions_file(),
            job_timeout_secs: default_job_timeout(),
            shutdown_grace_secs: default_shutdown_grace(),
        }
    }
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8066".to_string()
}
fn default_poll_timeout() -> u64 {
    30
}
fn default_webhook_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_webhook_port() -> u16 {
    8787
}
fn default_backend() -> String {
    "groq".to_string()
}
fn default_language() -> Option<String> {
    Some("pt".to_string())
}
fn default_guidance_prompt() -> Option<String> {
    Some(DEFAULT_GUIDANCE_PROMPT.to_string())
}
fn default_media_dir() -> String {
    "messages".to_string()
}
fn default_exclusions_file() -> String {
    "exclude.txt".to_string()
}
fn default_job_timeout() -> u64 {
    15
}
fn default_shutdown_grace() -> u64 {
    5
}

impl Config {
    /// Load config from an explicit path, or from the default location if
    /// it exists, or fall back to built-in defaults.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config = match path {
            Some(p) => Self::from_file(Path::new(p))?,
            None => {
                let default = Self::default_path()?;
                if default.exists() {
                    Self::from_file(&default)?
                } else {
                    Self::default()
                }
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "zapscribe")
            .context("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    pub fn validate(&self) -> Result<()> {
        match self.transcription.backend.as_str() {
            "groq" | "cloudflare" => {}
            "local" => {
                if self.transcription.local_command.is_none() {
                    anyhow::bail!("transcription.backend = \"local\" requires local_command");
                }
            }
            other => anyhow::bail!("unknown transcription backend: {}", other),
        }

        if self.engine.job_timeout_secs == 0 {
            anyhow::bail!("engine.job_timeout_secs must be greater than zero");
        }
        if self.bridge.poll_timeout_secs == 0 {
            anyhow::bail!("bridge.poll_timeout_secs must be greater than zero");
        }
        if self.engine.media_dir.trim().is_empty() {
            anyhow::bail!("engine.media_dir must not be empty");
        }
        if self.engine.exclusions_file.trim().is_empty() {
            anyhow::bail!("engine.exclusions_file must not be empty");
        }
        Ok(())
    }
}
