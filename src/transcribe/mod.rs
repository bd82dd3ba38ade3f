//! Speech-to-text backends.
//!
//! Trait-based abstraction over the supported providers:
//! - Groq's OpenAI-compatible Whisper API
//! - Cloudflare Workers AI Whisper models
//! - Local command (e.g., whisper-cpp), mainly for tests and offline use
use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use std::path::Path;
use std::sync::Arc;
use tokio::process::Command as TokioCommand;

use crate::config::Config;

/// Default guidance prompt, in Portuguese like the default language hint.
/// Steers Whisper toward faithful wording with natural punctuation.
pub const DEFAULT_GUIDANCE_PROMPT: &str = "Transcreva com precisão, preservando enunciados \
conforme falados. Corrija erros ortográficos comuns sem alterar a intenção original. Use \
pontuação e capitalização de forma natural para facilitar a leitura.";

#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Transcribe the audio file at `path`. `language` is an ISO hint,
    /// `prompt` optional spelling/style guidance; backends that cannot use
    /// one of them ignore it.
    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<String>;
}

/// Local command transcriber using a shell command template.
/// The template should contain `{}` placeholder for the file path.
pub struct LocalCommandTranscriber {
    command_template: String,
}

impl LocalCommandTranscriber {
    pub fn new(command_template: String) -> Self {
        Self { command_template }
    }
}

#[async_trait]
impl Transcriber for LocalCommandTranscriber {
    async fn transcribe(
        &self,
        path: &Path,
        _language: Option<&str>,
        _prompt: Option<&str>,
    ) -> Result<String> {
        let path_str = path.to_str().context("Invalid audio file path")?;
        let command = self.command_template.replace("{}", path_str);
        let output = TokioCommand::new("sh")
            .arg("-c")
            .arg(&command)
            .output()
            .await?;
        if !output.status.success() {
            let err = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Local transcription command failed: {}", err);
        }
        let stdout = String::from_utf8(output.stdout)?;
        Ok(stdout)
    }
}

/// Groq Whisper transcriber (OpenAI-compatible transcription endpoint).
pub struct GroqTranscriber {
    api_key: String,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl GroqTranscriber {
    pub fn new(api_key: String, base_url: Option<&str>, model: Option<&str>) -> Self {
        Self {
            api_key,
            base_url: base_url
                .unwrap_or("https://api.groq.com/openai/v1")
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or("whisper-large-v3").to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for GroqTranscriber {
    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        prompt: Option<&str>,
    ) -> Result<String> {
        let mut form = reqwest::multipart::Form::new()
            .file("file", path)
            .await
            .context("Failed to attach file to multipart form")?
            .text("model", self.model.clone())
            .text("temperature", "0")
            .text("response_format", "json");
        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }
        if let Some(prompt) = prompt {
            form = form.text("prompt", prompt.to_string());
        }

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Groq Whisper API error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .get("text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .context("No 'text' field in Groq response")?;
        Ok(text)
    }
}

/// Cloudflare Workers AI transcriber.
///
/// The whisper-large-v3 family takes base64 audio in a JSON body; the
/// legacy whisper model takes the raw bytes as a uint8 array. Responses
/// carry the transcript at `result.text`.
pub struct CloudflareTranscriber {
    api_token: String,
    run_url: String, // accounts/{account}/ai/run/{model}, fully expanded
    model: String,
    client: reqwest::Client,
}

impl CloudflareTranscriber {
    pub fn new(account_id: &str, api_token: String, model: Option<&str>) -> Self {
        let model = model.unwrap_or("@cf/openai/whisper-large-v3-turbo").to_string();
        Self {
            api_token,
            run_url: format!(
                "https://api.cloudflare.com/client/v4/accounts/{}/ai/run/{}",
                account_id, model
            ),
            model,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Transcriber for CloudflareTranscriber {
    async fn transcribe(
        &self,
        path: &Path,
        language: Option<&str>,
        _prompt: Option<&str>,
    ) -> Result<String> {
        let audio = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read audio file {}", path.display()))?;

        let payload = if self.model.starts_with("@cf/openai/whisper-large-v3") {
            serde_json::json!({
                "audio": general_purpose::STANDARD.encode(&audio),
                "language": language.unwrap_or("en"),
                "vad_filter": false,
            })
        } else {
            serde_json::json!({ "audio": audio })
        };

        let response = self
            .client
            .post(&self.run_url)
            .header("Authorization", format!("Bearer {}", self.api_token))
            .json(&payload)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await?;
            anyhow::bail!("Cloudflare AI error {}: {}", status, text);
        }

        let json: serde_json::Value = response.json().await?;
        let text = json
            .pointer("/result/text")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .context("No 'result.text' field in Cloudflare response")?;
        Ok(text)
    }
}

/// Factory function to create a transcriber based on config.
pub fn create_transcriber(config: &Config) -> Result<Arc<dyn Transcriber>> {
    let t = &config.transcription;
    match t.backend.as_str() {
        "local" => {
            let cmd = t
                .local_command
                .as_ref()
                .context("Local backend selected but no command configured")?;
            Ok(Arc::new(LocalCommandTranscriber::new(cmd.clone())))
        }
        "groq" => {
            let env_var = t.api_key_env.as_deref().unwrap_or("GROQ_API_KEY");
            let api_key = std::env::var(env_var)
                .with_context(|| format!("Groq API key not set ({} is empty)", env_var))?;
            Ok(Arc::new(GroqTranscriber::new(
                api_key,
                t.base_url.as_deref(),
                t.model.as_deref(),
            )))
        }
        "cloudflare" => {
            let account_env = t.cf_account_id_env.as_deref().unwrap_or("CF_ACCOUNT_ID");
            let token_env = t.cf_api_token_env.as_deref().unwrap_or("CF_API_KEY");
            let account_id = std::env::var(account_env)
                .with_context(|| format!("Cloudflare account id not set ({} is empty)", account_env))?;
            let api_token = std::env::var(token_env)
                .with_context(|| format!("Cloudflare API token not set ({} is empty)", token_env))?;
            Ok(Arc::new(CloudflareTranscriber::new(
                &account_id,
                api_token,
                t.model.as_deref(),
            )))
        }
        other => anyhow::bail!("Unknown transcription backend: {}", other),
    }
}
