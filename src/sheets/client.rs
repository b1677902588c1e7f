//! Thin Google Sheets / Drive REST client.

use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::MirrorError;
use super::auth::TokenProvider;

const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const DRIVE_API_URL: &str = "https://www.googleapis.com/drive/v3/files";

/// Rows allocated to a new yearly worksheet.
const WORKSHEET_ROWS: u32 = 1000;

/// Run `op`, and run it once more after `delay` if the backend answered with
/// a rate-limit error. Any other error, or a second rate limit, is returned.
pub async fn with_rate_limit_retry<T, F, Fut>(delay: Duration, mut op: F) -> Result<T, MirrorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, MirrorError>>,
{
    match op().await {
        Err(MirrorError::RateLimited) => {
            warn!("Spreadsheet rate limit hit, retrying in {}s", delay.as_secs());
            tokio::time::sleep(delay).await;
            op().await
        }
        other => other,
    }
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

#[derive(Deserialize)]
struct FileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedSpreadsheet {
    spreadsheet_id: String,
}

#[derive(Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
struct SheetProperties {
    title: String,
}

/// Which way a value range is laid out.
#[derive(Debug, Clone, Copy)]
pub enum Dimension {
    Rows,
    Columns,
}

impl Dimension {
    fn as_str(&self) -> &'static str {
        match self {
            Dimension::Rows => "ROWS",
            Dimension::Columns => "COLUMNS",
        }
    }
}

pub struct SheetsClient {
    http: reqwest::Client,
    tokens: TokenProvider,
    retry_delay: Duration,
}

impl SheetsClient {
    pub fn new(http: reqwest::Client, tokens: TokenProvider, retry_delay: Duration) -> Self {
        Self {
            http,
            tokens,
            retry_delay,
        }
    }

    /// Authorized request with the single rate-limit retry. Returns the JSON
    /// body (or `Null` for empty bodies).
    async fn call(&self, method: Method, url: &str, query: &[(&str, &str)], body: Option<&Value>) -> Result<Value, MirrorError> {
        let method = &method;
        with_rate_limit_retry(self.retry_delay, || async move {
            let token = self.tokens.token().await?;
            let mut request = self
                .http
                .request(method.clone(), url)
                .bearer_auth(token)
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();
            debug!("{} {} → {}", method, url, status);

            if status == StatusCode::TOO_MANY_REQUESTS {
                return Err(MirrorError::RateLimited);
            }
            let text = response.text().await?;
            if !status.is_success() {
                return Err(MirrorError::Api {
                    status: status.as_u16(),
                    body: text,
                });
            }
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            serde_json::from_str(&text).map_err(|e| MirrorError::UnexpectedResponse(e.to_string()))
        })
        .await
    }

    fn parse<T: for<'de> Deserialize<'de>>(value: Value) -> Result<T, MirrorError> {
        serde_json::from_value(value).map_err(|e| MirrorError::UnexpectedResponse(e.to_string()))
    }

    /// Id of the first spreadsheet visible to the account with this title.
    pub async fn find_spreadsheet(&self, name: &str) -> Result<Option<String>, MirrorError> {
        let q = format!(
            "name = '{}' and mimeType = 'application/vnd.google-apps.spreadsheet' and trashed = false",
            name.replace('\\', "\\\\").replace('\'', "\\'")
        );
        let value = self
            .call(Method::GET, DRIVE_API_URL, &[("q", q.as_str()), ("fields", "files(id)")], None)
            .await?;
        let list: FileList = Self::parse(value)?;
        Ok(list.files.into_iter().next().map(|f| f.id))
    }

    pub async fn create_spreadsheet(&self, name: &str) -> Result<String, MirrorError> {
        let body = json!({ "properties": { "title": name } });
        let value = self.call(Method::POST, SHEETS_API_URL, &[], Some(&body)).await?;
        let created: CreatedSpreadsheet = Self::parse(value)?;
        Ok(created.spreadsheet_id)
    }

    /// Give `email` writer access to a spreadsheet.
    pub async fn share(&self, spreadsheet_id: &str, email: &str) -> Result<(), MirrorError> {
        let url = format!("{DRIVE_API_URL}/{spreadsheet_id}/permissions");
        let body = json!({ "type": "user", "role": "writer", "emailAddress": email });
        self.call(Method::POST, &url, &[], Some(&body)).await?;
        Ok(())
    }

    pub async fn worksheet_titles(&self, spreadsheet_id: &str) -> Result<Vec<String>, MirrorError> {
        let url = format!("{SHEETS_API_URL}/{spreadsheet_id}");
        let value = self
            .call(Method::GET, &url, &[("fields", "sheets.properties.title")], None)
            .await?;
        let meta: SpreadsheetMeta = Self::parse(value)?;
        Ok(meta.sheets.into_iter().map(|s| s.properties.title).collect())
    }

    pub async fn add_worksheet(&self, spreadsheet_id: &str, title: &str, columns: u32) -> Result<(), MirrorError> {
        let url = format!("{SHEETS_API_URL}/{spreadsheet_id}:batchUpdate");
        let body = json!({
            "requests": [{
                "addSheet": {
                    "properties": {
                        "title": title,
                        "gridProperties": { "rowCount": WORKSHEET_ROWS, "columnCount": columns }
                    }
                }
            }]
        });
        self.call(Method::POST, &url, &[], Some(&body)).await?;
        Ok(())
    }

    /// Cell values of `range` as display strings.
    pub async fn get_values(&self, spreadsheet_id: &str, range: &str, dimension: Dimension) -> Result<Vec<Vec<String>>, MirrorError> {
        let url = format!("{SHEETS_API_URL}/{spreadsheet_id}/values/{}", urlencoding::encode(range));
        let value = self
            .call(Method::GET, &url, &[("majorDimension", dimension.as_str())], None)
            .await?;
        let range: ValueRange = Self::parse(value)?;
        Ok(range
            .values
            .into_iter()
            .map(|line| line.into_iter().map(cell_to_string).collect())
            .collect())
    }

    pub async fn update_values(&self, spreadsheet_id: &str, range: &str, values: Vec<Vec<Value>>) -> Result<(), MirrorError> {
        let url = format!("{SHEETS_API_URL}/{spreadsheet_id}/values/{}", urlencoding::encode(range));
        let body = json!({ "range": range, "majorDimension": "ROWS", "values": values });
        self.call(Method::PUT, &url, &[("valueInputOption", "RAW")], Some(&body))
            .await?;
        Ok(())
    }

    pub async fn batch_clear(&self, spreadsheet_id: &str, ranges: &[String]) -> Result<(), MirrorError> {
        let url = format!("{SHEETS_API_URL}/{spreadsheet_id}/values:batchClear");
        let body = json!({ "ranges": ranges });
        self.call(Method::POST, &url, &[], Some(&body)).await?;
        Ok(())
    }
}

fn cell_to_string(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
