//! Google OAuth for the Sheets API — static token or service account.

use jsonwebtoken::{Algorithm, EncodingKey, Header};
use rowcast_core::error::{Result, RowcastError};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Refresh this long before the token actually expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// The fields of a service-account key file we need.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.into()
}

impl ServiceAccountKey {
    pub fn from_file(path: &str) -> Result<Self> {
        let expanded = shellexpand::tilde(path).to_string();
        let content = std::fs::read_to_string(&expanded)
            .map_err(|e| RowcastError::config(format!("read credentials {expanded}: {e}")))?;
        serde_json::from_str(&content)
            .map_err(|e| RowcastError::config(format!("parse credentials {expanded}: {e}")))
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

/// Source of bearer tokens for Sheets requests.
pub enum SheetsAuth {
    Static(String),
    ServiceAccount {
        key: ServiceAccountKey,
        cached: Mutex<Option<(String, Instant)>>,
    },
}

impl SheetsAuth {
    pub fn service_account(key: ServiceAccountKey) -> Self {
        Self::ServiceAccount {
            key,
            cached: Mutex::new(None),
        }
    }

    /// Current bearer token, exchanging a fresh JWT assertion when the
    /// cached one is about to expire.
    pub async fn token(&self, client: &reqwest::Client) -> Result<String> {
        match self {
            SheetsAuth::Static(token) => Ok(token.clone()),
            SheetsAuth::ServiceAccount { key, cached } => {
                let mut guard = cached.lock().await;
                if let Some((token, expires_at)) = guard.as_ref() {
                    if Instant::now() + EXPIRY_MARGIN < *expires_at {
                        return Ok(token.clone());
                    }
                }

                let (token, ttl) = exchange_assertion(client, key).await?;
                *guard = Some((token.clone(), Instant::now() + ttl));
                tracing::debug!("Obtained Sheets access token for {}", key.client_email);
                Ok(token)
            }
        }
    }
}

async fn exchange_assertion(
    client: &reqwest::Client,
    key: &ServiceAccountKey,
) -> Result<(String, Duration)> {
    let now = chrono::Utc::now().timestamp();
    let claims = Claims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat: now,
        exp: now + 3600,
    };
    let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| RowcastError::config(format!("invalid service account key: {e}")))?;
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &signing_key)
        .map_err(|e| RowcastError::config(format!("sign assertion: {e}")))?;

    let response = client
        .post(&key.token_uri)
        .form(&[
            ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
            ("assertion", assertion.as_str()),
        ])
        .send()
        .await
        .map_err(|e| RowcastError::store(format!("token request failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        return Err(RowcastError::store(format!("token exchange {status}: {text}")));
    }

    let body: TokenResponse = response
        .json()
        .await
        .map_err(|e| RowcastError::store(format!("invalid token response: {e}")))?;
    Ok((body.access_token, Duration::from_secs(body.expires_in)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_token() {
        let auth = SheetsAuth::Static("ya29.token".into());
        let token = auth.token(&reqwest::Client::new()).await.unwrap();
        assert_eq!(token, "ya29.token");
    }

    #[tokio::test]
    async fn test_bad_private_key_is_config_error() {
        let auth = SheetsAuth::service_account(ServiceAccountKey {
            client_email: "bot@example.iam.gserviceaccount.com".into(),
            private_key: "not a pem".into(),
            token_uri: "http://127.0.0.1:9/token".into(),
        });
        let err = auth.token(&reqwest::Client::new()).await.unwrap_err();
        assert!(matches!(err, RowcastError::Config(_)));
    }

    #[test]
    fn test_key_defaults_token_uri() {
        let key: ServiceAccountKey = serde_json::from_str(
            r#"{"client_email":"a@b.c","private_key":"k","type":"service_account"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }
}
