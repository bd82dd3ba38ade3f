use super::types::{BridgeEvent, MediaDescriptor};
use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, error};

/// Client surface of the bridge gateway that owns the WhatsApp session.
///
/// Implemented by [`BridgeClient`] for the real gateway and by mocks in
/// the integration tests.
#[async_trait]
pub trait BridgeApi: Send + Sync {
    /// Tell the gateway to bring the WhatsApp session up.
    async fn connect(&self) -> Result<()>;

    /// Release the session. Safe to call more than once.
    async fn disconnect(&self) -> Result<()>;

    /// Long-poll the gateway's event stream. `offset` acknowledges every
    /// event id below it.
    async fn get_events(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<BridgeEvent>>;

    /// Download and decrypt one media payload.
    async fn download_media(&self, media: &MediaDescriptor) -> Result<Vec<u8>>;

    /// Send `text` to `chat`, quoting `quoted_id` when given.
    async fn send_reply(&self, chat: &str, text: &str, quoted_id: Option<&str>) -> Result<()>;
}

/// HTTP client for a whatsmeow-style bridge gateway.
#[derive(Clone)]
pub struct BridgeClient {
    client: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Deserialize)]
struct EventsResponse {
    #[serde(default)]
    events: Vec<BridgeEvent>,
}

impl BridgeClient {
    pub fn new(base_url: impl Into<String>, api_token: Option<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let rb = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let rb = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_token {
            Some(token) => rb.bearer_auth(token),
            None => rb,
        }
    }
}

#[async_trait]
impl BridgeApi for BridgeClient {
    async fn connect(&self) -> Result<()> {
        let resp = self.post("/session/connect").send().await?;
        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Bridge connect failed: {}", err);
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        let resp = self.post("/session/disconnect").send().await?;
        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Bridge disconnect failed: {}", err);
        }
        Ok(())
    }

    async fn get_events(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<BridgeEvent>> {
        let mut rb = self
            .get("/events")
            .query(&[("timeout", timeout_secs)])
            // The request must outlive the gateway's long-poll window.
            .timeout(Duration::from_secs(timeout_secs + 10));
        if let Some(offset) = offset {
            rb = rb.query(&[("offset", offset)]);
        }

        let resp = rb.send().await?;
        if !resp.status().is_success() {
            let err = resp.text().await?;
            anyhow::bail!("Bridge get_events failed: {}", err);
        }

        let body: EventsResponse = resp.json().await?;
        Ok(body.events)
    }

    async fn download_media(&self, media: &MediaDescriptor) -> Result<Vec<u8>> {
        let resp = self.post("/media/download").json(media).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let err = resp.text().await?;
            error!("Bridge media download error {}: {}", status, err);
            anyhow::bail!("Bridge media download failed: {}", err);
        }

        let bytes = resp.bytes().await?;
        if bytes.len() as u64 != media.file_length {
            debug!(
                declared = media.file_length,
                received = bytes.len(),
                "media length differs from descriptor"
            );
        }
        Ok(bytes.to_vec())
    }

    async fn send_reply(&self, chat: &str, text: &str, quoted_id: Option<&str>) -> Result<()> {
        let body = json!({
            "chat": chat,
            "text": text,
            "quoted_id": quoted_id,
        });

        let resp = self.post("/messages/reply").json(&body).send().await?;
        if !resp.status().is_success() {
            let err = resp.text().await?;
            error!("Bridge send_reply error: {}", err);
            anyhow::bail!("Bridge send_reply failed: {}", err);
        }
        Ok(())
    }
}
