//! HTTP client for a remote `rowcast serve`.

use anyhow::{Context, Result, bail};
use rowcast_core::types::DispatchMode;
use std::time::Duration;

pub struct TriggerClient {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
}

impl TriggerClient {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token,
        }
    }

    /// POST `{ "mode": ... }` and return the response document.
    pub async fn send_now(&self, mode: DispatchMode) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .post(&self.url)
            .json(&serde_json::json!({ "mode": mode }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("POST {} failed", self.url))?;
        let status = response.status();
        let body: serde_json::Value = response.json().await.unwrap_or(serde_json::Value::Null);
        if !status.is_success() {
            bail!("{status}: {}", body["error"].as_str().unwrap_or("no error message"));
        }
        Ok(body)
    }

    /// Trigger every `every` (first call immediately) until the server
    /// reports no scheduled rows remain. Failed calls are logged and retried
    /// on the next tick.
    pub async fn poll(&self, mode: DispatchMode, every: Duration) -> Result<()> {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match self.send_now(mode).await {
                Ok(body) => {
                    tracing::info!("Triggered {mode}: {}", body["result"]);
                    if remaining_scheduled(&body).is_some_and(|r| r <= 0) {
                        tracing::info!("✅ All scheduled messages have been sent");
                        return Ok(());
                    }
                }
                Err(e) => tracing::error!("Error triggering {mode}: {e:#}"),
            }
        }
    }
}

pub fn remaining_scheduled(body: &serde_json::Value) -> Option<i64> {
    body["result"]["remainingScheduled"].as_i64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn run_body(remaining: i64) -> serde_json::Value {
        serde_json::json!({
            "success": true,
            "mode": "scheduled",
            "result": {
                "sent": 1, "failed": 0, "skipped": 0,
                "remainingScheduled": remaining,
                "shouldStopRecurrence": remaining <= 0,
            }
        })
    }

    fn client(server: &MockServer) -> TriggerClient {
        TriggerClient::new(format!("{}/send-now", server.uri()), Some("secret".into()))
    }

    #[tokio::test]
    async fn test_send_now_with_bearer() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/send-now"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(serde_json::json!({ "mode": "instant" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body(3)))
            .expect(1)
            .mount(&server)
            .await;

        let body = client(&server).send_now(DispatchMode::Instant).await.unwrap();
        assert_eq!(remaining_scheduled(&body), Some(3));
    }

    #[tokio::test]
    async fn test_error_status_surfaces_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(403)
                    .set_body_json(serde_json::json!({ "error": "Invalid API token" })),
            )
            .mount(&server)
            .await;

        let err = client(&server).send_now(DispatchMode::Scheduled).await.unwrap_err();
        assert!(err.to_string().contains("Invalid API token"));
    }

    #[tokio::test]
    async fn test_poll_until_nothing_remains() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body(2)))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(run_body(0)))
            .mount(&server)
            .await;

        client(&server)
            .poll(DispatchMode::Scheduled, Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[test]
    fn test_remaining_missing() {
        assert_eq!(remaining_scheduled(&serde_json::json!({ "error": "x" })), None);
    }
}
