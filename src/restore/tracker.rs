// restoretool/src/restore/tracker.rs
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::info;
use url::Url;

use crate::config::DisplayTimezone;
use crate::errors::LedgerError;
use crate::google::TokenSource;
use crate::model::CandidateFile;
use crate::restore::drive::RemoteStore;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";
const LEDGER_COLUMNS: &str = "A:B";
const TIMESTAMP_COLUMN: &str = "B";

/// Tabular store with two columns: grouping key, last processed timestamp.
#[async_trait]
pub trait Ledger: Send + Sync {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, LedgerError>;

    async fn update_cell(&self, range: &str, value: &str) -> Result<(), LedgerError>;

    async fn append_row(&self, range: &str, values: &[String]) -> Result<(), LedgerError>;
}

#[derive(Debug, Default, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Google Sheets v4 values API for one spreadsheet.
#[derive(Clone)]
pub struct SheetsClient {
    http: Client,
    base_url: Url,
    tokens: Arc<dyn TokenSource>,
    spreadsheet_id: String,
}

impl SheetsClient {
    pub fn new(
        http: Client,
        tokens: Arc<dyn TokenSource>,
        spreadsheet_id: impl Into<String>,
    ) -> Result<Self, LedgerError> {
        Self::with_base_url(http, tokens, spreadsheet_id, Url::parse(SHEETS_API_BASE)?)
    }

    pub fn with_base_url(
        http: Client,
        tokens: Arc<dyn TokenSource>,
        spreadsheet_id: impl Into<String>,
        base_url: Url,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            http,
            base_url,
            tokens,
            spreadsheet_id: spreadsheet_id.into(),
        })
    }

    fn values_url(&self, range_segment: &str) -> Result<Url, LedgerError> {
        let mut endpoint = self.base_url.clone();
        endpoint
            .path_segments_mut()
            .map_err(|_| LedgerError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", self.spreadsheet_id.as_str(), "values", range_segment]);
        Ok(endpoint)
    }

    async fn bearer(&self) -> Result<String, LedgerError> {
        Ok(format!("Bearer {}", self.tokens.access_token().await?))
    }
}

async fn ensure_success(res: Response) -> Result<Response, LedgerError> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status().as_u16();
    let body = res.text().await.unwrap_or_default();
    Err(LedgerError::Api { status, body })
}

#[async_trait]
impl Ledger for SheetsClient {
    async fn read_range(&self, range: &str) -> Result<Vec<Vec<String>>, LedgerError> {
        let res = self
            .http
            .get(self.values_url(range)?)
            .header("Authorization", self.bearer().await?)
            .send()
            .await?;
        let body: ValueRange = ensure_success(res).await?.json().await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    async fn update_cell(&self, range: &str, value: &str) -> Result<(), LedgerError> {
        let res = self
            .http
            .put(self.values_url(range)?)
            .header("Authorization", self.bearer().await?)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&json!({ "range": range, "values": [[value]] }))
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }

    async fn append_row(&self, range: &str, values: &[String]) -> Result<(), LedgerError> {
        let res = self
            .http
            .post(self.values_url(&format!("{}:append", range))?)
            .header("Authorization", self.bearer().await?)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .json(&json!({ "values": [values] }))
            .send()
            .await?;
        ensure_success(res).await?;
        Ok(())
    }
}

/// Records processed files in the ledger, one row per parent folder.
pub struct CompletionTracker {
    store: Arc<dyn RemoteStore>,
    ledger: Arc<dyn Ledger>,
    timezone: DisplayTimezone,
    sheet: Option<String>,
}

impl CompletionTracker {
    pub fn new(
        store: Arc<dyn RemoteStore>,
        ledger: Arc<dyn Ledger>,
        timezone: DisplayTimezone,
        sheet: Option<String>,
    ) -> Self {
        Self {
            store,
            ledger,
            timezone,
            sheet,
        }
    }

    fn range(&self, cells: &str) -> String {
        match &self.sheet {
            Some(sheet) => format!("'{}'!{}", sheet.replace('\'', "''"), cells),
            None => cells.to_string(),
        }
    }

    /// Name of the file's parent folder.
    ///
    /// Uses the parent already on the listing; otherwise asks Drive for the
    /// file's parents first. Must run while the file still exists.
    pub async fn grouping_key(&self, file: &CandidateFile) -> Result<String, LedgerError> {
        let parent_id = match file.parent_id() {
            Some(id) => Some(id.to_string()),
            None => self
                .store
                .get_metadata(&file.id, "parents")
                .await
                .map_err(LedgerError::ParentLookup)?
                .parents
                .into_iter()
                .next(),
        };
        let Some(parent_id) = parent_id else {
            return Err(LedgerError::NoGroupingKey(file.name.clone()));
        };

        let parent = self
            .store
            .get_metadata(&parent_id, "id, name")
            .await
            .map_err(LedgerError::ParentLookup)?;
        match parent.name.filter(|n| !n.trim().is_empty()) {
            Some(name) => Ok(name),
            None => Err(LedgerError::NoGroupingKey(file.name.clone())),
        }
    }

    /// Creation time in the display timezone, or the raw text if it does not parse.
    pub fn timestamp_text(&self, file: &CandidateFile) -> String {
        file.created_at()
            .map(|at| self.timezone.format(at))
            .unwrap_or_else(|| file.created_time.clone())
    }

    /// Overwrites the timestamp on the key's row, or appends a row when the key is new.
    pub async fn upsert(&self, key: &str, timestamp_text: &str) -> Result<(), LedgerError> {
        let rows = self.ledger.read_range(&self.range(LEDGER_COLUMNS)).await?;
        info!(rows = rows.len(), "spreadsheet returned rows");

        let wanted = key.trim();
        let existing = rows
            .iter()
            .position(|row| row.first().is_some_and(|cell| cell.trim() == wanted));

        match existing {
            Some(index) => {
                let cell = self.range(&format!("{}{}", TIMESTAMP_COLUMN, index + 1));
                self.ledger.update_cell(&cell, timestamp_text).await?;
            }
            None => {
                self.ledger
                    .append_row(
                        &self.range(LEDGER_COLUMNS),
                        &[key.to_string(), timestamp_text.to_string()],
                    )
                    .await?;
            }
        }
        info!(key, timestamp = timestamp_text, "spreadsheet updated");
        Ok(())
    }
}
