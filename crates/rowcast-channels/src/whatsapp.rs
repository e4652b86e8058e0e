//! WhatsApp transport over an HTTP bridge (WAHA-compatible REST API).
//!
//! The bridge owns the browser session and QR login; this client only
//! checks readiness and pushes messages through it.

use async_trait::async_trait;
use rowcast_core::config::TransportConfig;
use rowcast_core::error::{Result, RowcastError};
use rowcast_core::traits::MessageTransport;
use std::time::Duration;

/// Session status reported by the bridge once logged in.
const READY_STATUS: &str = "WORKING";

pub struct WhatsAppBridge {
    client: reqwest::Client,
    base_url: String,
    session: String,
    api_key: Option<String>,
}

impl WhatsAppBridge {
    pub fn new(base_url: &str, session: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            session: session.to_string(),
            api_key: None,
        }
    }

    pub fn from_config(config: &TransportConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_key: config.api_key.clone(),
            ..Self::new(&config.base_url, &config.session)
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => builder.header("X-Api-Key", key),
            None => builder,
        }
    }

    async fn post(&self, path: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = self
            .request(reqwest::Method::POST, path)
            .json(&body)
            .send()
            .await
            .map_err(|e| RowcastError::transport(format!("WhatsApp request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RowcastError::transport(format!("WhatsApp {path} {status}: {text}")));
        }
        // Some endpoints answer with an empty body.
        let text = response.text().await.unwrap_or_default();
        if text.trim().is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RowcastError::transport(format!("Invalid WhatsApp response: {e}")))
    }
}

#[async_trait]
impl MessageTransport for WhatsAppBridge {
    fn name(&self) -> &str {
        "whatsapp"
    }

    async fn is_ready(&self) -> bool {
        let path = format!("/api/sessions/{}", self.session);
        let response = match self.request(reqwest::Method::GET, &path).send().await {
            Ok(r) if r.status().is_success() => r,
            Ok(r) => {
                tracing::debug!("WhatsApp session check returned {}", r.status());
                return false;
            }
            Err(e) => {
                tracing::debug!("WhatsApp bridge unreachable: {e}");
                return false;
            }
        };
        match response.json::<serde_json::Value>().await {
            Ok(body) => body["status"].as_str() == Some(READY_STATUS),
            Err(_) => false,
        }
    }

    async fn send_text(&self, address: &str, body: &str) -> Result<()> {
        self.post(
            "/api/sendText",
            serde_json::json!({
                "session": self.session,
                "chatId": address,
                "text": body,
            }),
        )
        .await?;
        Ok(())
    }

    async fn send_media(&self, address: &str, attachment_url: &str, caption: &str) -> Result<()> {
        self.post(
            "/api/sendImage",
            serde_json::json!({
                "session": self.session,
                "chatId": address,
                "file": { "url": attachment_url },
                "caption": caption,
            }),
        )
        .await?;
        Ok(())
    }

    async fn resolve_group_invite(&self, code: &str) -> Result<String> {
        let path = format!("/api/{}/groups/join", self.session);
        let body = self
            .post(&path, serde_json::json!({ "code": code }))
            .await
            .map_err(|e| RowcastError::InvalidInvite(format!("{code}: {e}")))?;
        body["id"]
            .as_str()
            .map(String::from)
            .ok_or_else(|| RowcastError::InvalidInvite(format!("{code}: no group id in response")))
    }
}
