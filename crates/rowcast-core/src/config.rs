//! Configuration loaded from `~/.rowcast/config.toml` plus environment
//! overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, RowcastError};

/// Upper bound for `dispatch.due_window_minutes` (one year).
pub const MAX_DUE_WINDOW_MINUTES: i64 = 366 * 24 * 60;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowcastConfig {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub transport: TransportConfig,
    pub dispatch: DispatchConfig,
    pub schedule: ScheduleConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    /// Static bearer token for `/send-now`. Required to serve.
    pub api_token: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            api_token: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub spreadsheet_id: Option<String>,
    pub sheet_name: String,
    /// Service-account JSON key file.
    pub credentials_path: Option<String>,
    /// Pre-issued OAuth token, used instead of a service account.
    pub access_token: Option<String>,
    pub status_field: String,
    pub timeout_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            spreadsheet_id: None,
            sheet_name: "Messages".into(),
            credentials_path: None,
            access_token: None,
            status_field: "Status".into(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    pub base_url: String,
    pub session: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".into(),
            session: "default".into(),
            api_key: None,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// IANA zone used to read the sheet's scheduled times.
    pub timezone: String,
    pub due_window_minutes: i64,
    /// Written into the status column after a full delivery.
    pub sent_marker: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            timezone: "Asia/Kolkata".into(),
            due_window_minutes: 60,
            sent_marker: "✅ Sent".into(),
        }
    }
}

impl DispatchConfig {
    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|e| RowcastError::config(format!("invalid timezone '{}': {e}", self.timezone)))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Five-field cron expression for the in-process recurring job.
    pub cron: String,
    /// Polling interval for `rowcast trigger`.
    pub interval_minutes: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            cron: "*/1 * * * *".into(),
            interval_minutes: 5,
        }
    }
}

impl RowcastConfig {
    /// `~/.rowcast`
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".rowcast")
    }

    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Load the default config file (if any) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        let mut config = if path.exists() {
            Self::parse_file(&path)?
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Load an explicit config file and apply environment overrides.
    pub fn load_from(path: &Path) -> Result<Self> {
        let expanded = PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref());
        if !expanded.exists() {
            return Err(RowcastError::ConfigNotFound(expanded.display().to_string()));
        }
        let mut config = Self::parse_file(&expanded)?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn parse_file(path: &Path) -> Result<Self> {
        tracing::debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| RowcastError::config(format!("{}: {e}", path.display())))
    }

    /// Overlay environment variables, read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |key: &str| {
            let value = lookup(key).filter(|v| !v.trim().is_empty());
            if value.is_some() {
                tracing::debug!("Config override from ${key}");
            }
            value
        };

        if let Some(v) = get("API_TOKEN") {
            self.gateway.api_token = Some(v);
        }
        if let Some(v) = get("PORT") {
            self.gateway.port = parse_number("PORT", &v)?;
        }
        if let Some(v) = get("GOOGLE_SHEET_ID") {
            self.store.spreadsheet_id = Some(v);
        }
        if let Some(v) = get("GOOGLE_APPLICATION_CREDENTIALS") {
            self.store.credentials_path = Some(v);
        }
        if let Some(v) = get("MESSAGES_SHEET") {
            self.store.sheet_name = v;
        }
        if let Some(v) = get("DEFAULT_TIMEZONE") {
            self.dispatch.timezone = v;
        }
        if let Some(v) = get("DUE_WINDOW_MINUTES") {
            self.dispatch.due_window_minutes = parse_number("DUE_WINDOW_MINUTES", &v)?;
        }
        if let Some(v) = get("SCHEDULE_INTERVAL_MINUTES") {
            self.schedule.interval_minutes = parse_number("SCHEDULE_INTERVAL_MINUTES", &v)?;
        }
        if let Some(v) = get("WHATSAPP_BRIDGE_URL") {
            self.transport.base_url = v;
        }
        if let Some(v) = get("WHATSAPP_SESSION") {
            self.transport.session = v;
        }
        if let Some(v) = get("WHATSAPP_API_KEY") {
            self.transport.api_key = Some(v);
        }
        Ok(())
    }

    /// Check the values every command needs. Credentials are checked
    /// separately by the components that use them.
    pub fn validate(&self) -> Result<()> {
        self.dispatch.tz()?;
        if self.dispatch.due_window_minutes < 0 {
            return Err(RowcastError::config("due_window_minutes must not be negative"));
        }
        if self.dispatch.due_window_minutes > MAX_DUE_WINDOW_MINUTES {
            return Err(RowcastError::config(format!(
                "due_window_minutes must be at most {MAX_DUE_WINDOW_MINUTES}"
            )));
        }
        if self.store.sheet_name.trim().is_empty() {
            return Err(RowcastError::config("store.sheet_name is empty"));
        }
        Ok(())
    }

    /// TOML rendering with secrets masked.
    pub fn to_masked_toml(&self) -> Result<String> {
        let mut masked = self.clone();
        for secret in [
            &mut masked.gateway.api_token,
            &mut masked.store.access_token,
            &mut masked.transport.api_key,
        ] {
            if secret.is_some() {
                *secret = Some("***".into());
            }
        }
        toml::to_string_pretty(&masked).map_err(|e| RowcastError::config(e.to_string()))
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| RowcastError::config(format!("{key} must be a number, got '{raw}'")))
}
