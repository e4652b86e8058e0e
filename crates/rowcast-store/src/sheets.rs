//! Google Sheets record store — Sheets v4 REST API.

use async_trait::async_trait;
use rowcast_core::config::StoreConfig;
use rowcast_core::error::{Result, RowcastError};
use rowcast_core::traits::RecordStore;
use rowcast_core::types::DispatchRecord;
use std::time::Duration;

use crate::auth::{ServiceAccountKey, SheetsAuth};
use crate::rows::{SheetLayout, column_letter, same_title};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4";

/// Reads and writes one spreadsheet.
pub struct GoogleSheetsStore {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    auth: SheetsAuth,
}

impl GoogleSheetsStore {
    pub fn new(spreadsheet_id: impl Into<String>, auth: SheetsAuth) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: SHEETS_API.into(),
            spreadsheet_id: spreadsheet_id.into(),
            auth,
        }
    }

    /// Build from `[store]` config. A static access token wins over a
    /// service-account key file.
    pub fn from_config(config: &StoreConfig) -> Result<Self> {
        let spreadsheet_id = config
            .spreadsheet_id
            .clone()
            .ok_or_else(|| RowcastError::config("GOOGLE_SHEET_ID / store.spreadsheet_id not set"))?;

        let auth = match (&config.access_token, &config.credentials_path) {
            (Some(token), _) => SheetsAuth::Static(token.clone()),
            (None, Some(path)) => SheetsAuth::service_account(ServiceAccountKey::from_file(path)?),
            (None, None) => {
                return Err(RowcastError::config(
                    "no Sheets credentials: set store.access_token or store.credentials_path",
                ));
            }
        };

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();

        Ok(Self {
            client,
            ..Self::new(spreadsheet_id, auth)
        })
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn spreadsheet_url(&self) -> String {
        format!("{}/spreadsheets/{}", self.base_url, self.spreadsheet_id)
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/values/{}", self.spreadsheet_url(), urlencoding::encode(range))
    }

    async fn get_json(&self, url: &str) -> Result<serde_json::Value> {
        let token = self.auth.token(&self.client).await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| RowcastError::store(format!("Sheets request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RowcastError::store(format!("Sheets {status}: {text}")));
        }
        response
            .json()
            .await
            .map_err(|e| RowcastError::store(format!("Invalid Sheets response: {e}")))
    }

    /// Resolve `sheet` to the exact title stored in the spreadsheet.
    async fn resolve_sheet(&self, sheet: &str) -> Result<String> {
        let url = format!("{}?fields=sheets.properties", self.spreadsheet_url());
        let metadata = self.get_json(&url).await?;

        let titles: Vec<String> = metadata["sheets"]
            .as_array()
            .map(|sheets| {
                sheets
                    .iter()
                    .filter_map(|s| s["properties"]["title"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default();

        titles
            .iter()
            .find(|title| same_title(title, sheet))
            .cloned()
            .ok_or_else(|| {
                RowcastError::not_found(format!(
                    "sheet \"{sheet}\" (available: {})",
                    titles.join(", ")
                ))
            })
    }

    async fn read_values(&self, range: &str) -> Result<Vec<Vec<String>>> {
        let body = self.get_json(&self.values_url(range)).await?;
        let rows = body["values"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .map(|row| {
                        row.as_array()
                            .map(|cells| cells.iter().map(cell_text).collect())
                            .unwrap_or_default()
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(rows)
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn quoted(title: &str) -> String {
    format!("'{}'", title.replace('\'', "''"))
}

#[async_trait]
impl RecordStore for GoogleSheetsStore {
    fn name(&self) -> &str {
        "google-sheets"
    }

    async fn list_records(&self, sheet: &str) -> Result<Vec<DispatchRecord>> {
        let title = self.resolve_sheet(sheet).await?;
        let rows = self.read_values(&quoted(&title)).await?;

        let Some((header, data)) = rows.split_first() else {
            tracing::info!("Sheet \"{title}\" is empty");
            return Ok(Vec::new());
        };
        let records = SheetLayout::from_header_row(header).decode(data);
        tracing::debug!("Read {} rows from sheet \"{title}\"", records.len());
        Ok(records)
    }

    async fn update_field(&self, sheet: &str, row_index: u32, field: &str, value: &str) -> Result<()> {
        let title = self.resolve_sheet(sheet).await?;
        let header = self.read_values(&format!("{}!1:1", quoted(&title))).await?;
        let layout = SheetLayout::from_header_row(header.first().map(Vec::as_slice).unwrap_or(&[]));
        let column = layout.column(field).ok_or_else(|| {
            RowcastError::not_found(format!("column \"{field}\" in sheet \"{title}\""))
        })?;

        let range = format!("{}!{}{}", quoted(&title), column_letter(column), row_index);
        let token = self.auth.token(&self.client).await?;
        let response = self
            .client
            .put(self.values_url(&range))
            .query(&[("valueInputOption", "USER_ENTERED")])
            .bearer_auth(token)
            .json(&serde_json::json!({
                "range": range,
                "majorDimension": "ROWS",
                "values": [[value]],
            }))
            .send()
            .await
            .map_err(|e| RowcastError::store(format!("Sheets update failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(RowcastError::store(format!("Sheets update {status}: {text}")));
        }

        tracing::debug!("Updated {range} with \"{value}\"");
        Ok(())
    }
}
