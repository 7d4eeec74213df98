use async_trait::async_trait;
use reqwest::Client;
use reqwest::Response;
use reqwest::StatusCode;
use reqwest::header::AUTHORIZATION;
use reqwest::header::RETRY_AFTER;
use serde::Deserialize;
use tracing::debug;

use super::BatchUpdateSummary;
use super::SheetsApi;
use crate::batch::WriteRequest;
use crate::error::Result;
use crate::error::SheetsError;
use crate::error::parse_retry_after;

pub const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";

#[derive(Debug, Deserialize)]
struct GoogleError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: GoogleError,
}

#[derive(Debug, Deserialize)]
struct ValuesResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
struct SheetProperties {
    title: String,
}

/// Sheets v4 REST client. Reads use the API key, writes a bearer token.
#[derive(Debug, Clone)]
pub struct HttpSheetsClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpSheetsClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url, api_key)
    }

    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn spreadsheet_url(&self, spreadsheet_id: &str) -> String {
        format!(
            "{}/v4/spreadsheets/{}",
            self.base_url,
            urlencoding::encode(spreadsheet_id)
        )
    }

    async fn check(&self, response: Response, what: &str) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);
        Err(map_status(status, what, message, retry_after))
    }
}

fn map_status(
    status: StatusCode,
    what: &str,
    message: String,
    retry_after: Option<std::time::Duration>,
) -> SheetsError {
    match status {
        StatusCode::NOT_FOUND => SheetsError::NotFound(format!("{what}: {message}")),
        StatusCode::FORBIDDEN => SheetsError::AccessDenied(format!(
            "{what}: {message} (check sharing settings and API key)"
        )),
        StatusCode::UNAUTHORIZED => SheetsError::AuthFailed(format!("{what}: {message}")),
        // Unknown tabs are reported as unparseable ranges.
        StatusCode::BAD_REQUEST if message.contains("Unable to parse range") => {
            SheetsError::NotFound(format!("{what}: {message}"))
        }
        StatusCode::BAD_REQUEST => SheetsError::InvalidInput(format!("{what}: {message}")),
        StatusCode::TOO_MANY_REQUESTS => SheetsError::RateLimited { retry_after },
        _ => SheetsError::Upstream {
            status: status.as_u16(),
            message,
        },
    }
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SheetsApi for HttpSheetsClient {
    async fn list_tabs(&self, spreadsheet_id: &str) -> Result<Vec<String>> {
        let url = self.spreadsheet_url(spreadsheet_id);
        debug!(spreadsheet_id, "listing tabs");
        let response = self
            .client
            .get(&url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("fields", "sheets.properties.title"),
            ])
            .send()
            .await?;
        let response = self
            .check(response, &format!("spreadsheet {spreadsheet_id}"))
            .await?;
        let meta: SpreadsheetMeta = response
            .json()
            .await
            .map_err(|e| SheetsError::InvalidResponse(e.to_string()))?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    async fn get_values(&self, spreadsheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let url = format!(
            "{}/values/{}",
            self.spreadsheet_url(spreadsheet_id),
            urlencoding::encode(range)
        );
        debug!(spreadsheet_id, range, "reading values");
        let response = self
            .client
            .get(&url)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await?;
        let response = self.check(response, &format!("range {range}")).await?;
        let body: ValuesResponse = response
            .json()
            .await
            .map_err(|e| SheetsError::InvalidResponse(e.to_string()))?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn batch_update(
        &self,
        spreadsheet_id: &str,
        request: &WriteRequest,
        access_token: &str,
    ) -> Result<BatchUpdateSummary> {
        let url = format!("{}/values:batchUpdate", self.spreadsheet_url(spreadsheet_id));
        debug!(spreadsheet_id, ranges = request.len(), "submitting batch update");
        let response = self
            .client
            .post(&url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .json(request)
            .send()
            .await?;
        let response = self
            .check(response, &format!("batch update of {spreadsheet_id}"))
            .await?;
        let summary = response
            .json::<BatchUpdateSummary>()
            .await
            .unwrap_or_default();
        Ok(summary)
    }
}
