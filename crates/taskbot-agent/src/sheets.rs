//! Google Sheets row append and range reads.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info};
use url::Url;

use crate::error::{AgentError, Result};

/// Sheets API v4 base URL.
const SHEETS_API_URL: &str = "https://sheets.googleapis.com/v4/";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// What the backend reports after an append.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    pub updated_range: Option<String>,
    pub updated_cells: Option<u64>,
}

/// Side-effecting collaborator that appends one row to a sheet.
#[async_trait]
pub trait RowAppender: Send + Sync {
    /// Append `row` after the last row of `range`.
    async fn append_row(&self, sheet_id: &str, range: &str, row: Vec<String>)
        -> Result<AppendOutcome>;
}

/// Read access to a sheet range.
#[async_trait]
pub trait ValuesReader: Send + Sync {
    /// Rows of `range` as formatted cell text; trailing empty cells are omitted.
    async fn read_values(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>>;
}

/// Source of OAuth access tokens for the Sheets API.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Pre-issued access token, refreshed outside this process.
#[derive(Debug, Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String> {
        if self.token.trim().is_empty() {
            return Err(AgentError::Configuration(
                "Google Sheets access token is empty".into(),
            ));
        }
        Ok(self.token.clone())
    }
}

/// Sheets API client.
#[derive(Clone)]
pub struct SheetsClient {
    client: reqwest::Client,
    tokens: Arc<dyn TokenProvider>,
    base_url: Url,
}

impl SheetsClient {
    /// Create a client against the public Sheets API.
    pub fn new(tokens: Arc<dyn TokenProvider>) -> Result<Self> {
        Self::with_base_url(tokens, SHEETS_API_URL)
    }

    /// Create a client against another endpoint, e.g. a local stub.
    pub fn with_base_url(tokens: Arc<dyn TokenProvider>, base_url: &str) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AgentError::Configuration(format!("invalid Sheets URL {base_url}: {e}")))?;
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            tokens,
            base_url,
        })
    }

    /// `{base}/spreadsheets/{id}/values/{range}:append?valueInputOption=USER_ENTERED`
    pub fn append_url(&self, sheet_id: &str, range: &str) -> Result<Url> {
        let mut url = self.values_url(sheet_id, &format!("{range}:append"))?;
        url.query_pairs_mut()
            .append_pair("valueInputOption", "USER_ENTERED");
        Ok(url)
    }

    /// `{base}/spreadsheets/{id}/values/{range}`
    pub fn values_url(&self, sheet_id: &str, range: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AgentError::Configuration("Sheets URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(["spreadsheets", sheet_id, "values", range]);
        Ok(url)
    }
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

impl ValueRange {
    fn into_rows(self) -> Vec<Vec<String>> {
        self.values
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|cell| match cell {
                        serde_json::Value::String(text) => text,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendResponse {
    #[serde(default)]
    updates: Option<AppendUpdates>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppendUpdates {
    updated_range: Option<String>,
    updated_cells: Option<u64>,
}

#[async_trait]
impl RowAppender for SheetsClient {
    async fn append_row(
        &self,
        sheet_id: &str,
        range: &str,
        row: Vec<String>,
    ) -> Result<AppendOutcome> {
        let url = self.append_url(sheet_id, range)?;
        let token = self.tokens.access_token().await?;

        debug!(sheet_id = %sheet_id, range = %range, columns = row.len(), "Appending row");

        let response = self
            .client
            .post(url)
            .bearer_auth(token)
            .json(&json!({ "values": [row] }))
            .send()
            .await
            .map_err(|e| AgentError::Sheets(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(sheet_id = %sheet_id, status = %status, "Sheets append rejected");
            return Err(AgentError::Sheets(format!("Sheets API error {status}: {body}")));
        }

        let body: AppendResponse = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse(format!("Sheets append response: {e}")))?;
        let outcome = body
            .updates
            .map(|u| AppendOutcome {
                updated_range: u.updated_range,
                updated_cells: u.updated_cells,
            })
            .unwrap_or_default();

        info!(
            sheet_id = %sheet_id,
            updated_range = outcome.updated_range.as_deref().unwrap_or("-"),
            updated_cells = outcome.updated_cells.unwrap_or(0),
            "Row appended"
        );
        Ok(outcome)
    }
}

#[async_trait]
impl ValuesReader for SheetsClient {
    async fn read_values(&self, sheet_id: &str, range: &str) -> Result<Vec<Vec<String>>> {
        let url = self.values_url(sheet_id, range)?;
        let token = self.tokens.access_token().await?;

        debug!(sheet_id = %sheet_id, range = %range, "Reading values");

        let response = self
            .client
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| AgentError::Sheets(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(sheet_id = %sheet_id, status = %status, "Sheets read rejected");
            return Err(AgentError::Sheets(format!("Sheets API error {status}: {body}")));
        }

        let body: ValueRange = response
            .json()
            .await
            .map_err(|e| AgentError::ResponseParse(format!("Sheets values response: {e}")))?;
        let rows = body.into_rows();
        debug!(sheet_id = %sheet_id, rows = rows.len(), "Values read");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> SheetsClient {
        SheetsClient::new(Arc::new(StaticTokenProvider::new("token"))).unwrap()
    }

    #[test]
    fn test_append_url() {
        let url = client().append_url("abc123", "A:Z").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/abc123/values/A:Z:append?valueInputOption=USER_ENTERED"
        );
    }

    #[test]
    fn test_append_url_encodes_sheet_names() {
        let url = client().append_url("abc", "Задачи!A:Z").unwrap();
        assert!(url.as_str().contains("/values/%D0%97"));
        assert!(url.as_str().ends_with("!A:Z:append?valueInputOption=USER_ENTERED"));
    }

    #[test]
    fn test_append_response_parsing() {
        let body: AppendResponse = serde_json::from_str(
            r#"{"spreadsheetId":"x","updates":{"updatedRange":"Sheet1!A5:AD5","updatedCells":30}}"#,
        )
        .unwrap();
        let updates = body.updates.unwrap();
        assert_eq!(updates.updated_cells, Some(30));
        assert_eq!(updates.updated_range.as_deref(), Some("Sheet1!A5:AD5"));
    }

    #[test]
    fn test_values_url() {
        let url = client().values_url("exec-sheet", "A:H").unwrap();
        assert_eq!(
            url.as_str(),
            "https://sheets.googleapis.com/v4/spreadsheets/exec-sheet/values/A:H"
        );
    }

    #[test]
    fn test_value_range_rows() {
        let body: ValueRange = serde_json::from_str(
            r#"{"range":"Sheet1!A1:H3","majorDimension":"ROWS","values":[["Имя","Код"],["x",1,null]]}"#,
        )
        .unwrap();
        assert_eq!(
            body.into_rows(),
            vec![vec!["Имя".to_string(), "Код".to_string()], vec!["x".into(), "1".into(), String::new()]]
        );

        let empty: ValueRange = serde_json::from_str(r#"{"range":"Sheet1!A1:H1"}"#).unwrap();
        assert!(empty.into_rows().is_empty());
    }

    #[tokio::test]
    async fn test_static_token_rejects_blank() {
        assert!(StaticTokenProvider::new(" ").access_token().await.is_err());
        assert_eq!(
            StaticTokenProvider::new("t").access_token().await.unwrap(),
            "t"
        );
    }
}
