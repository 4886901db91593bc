use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{Destination, ExpensePersister, PersistenceError};
use crate::models::receipt::ExpenseData;

const DEFAULT_API_BASE: &str = "https://sheets.googleapis.com";
const TARGET_NAME: &str = "Google Sheets";
const APPEND_RANGE: &str = "Sheet1!A:F";

/// Appends expense rows to a Google Sheets spreadsheet.
pub struct SheetsClient {
    http: Client,
    api_base: String,
}

#[derive(Deserialize)]
struct GoogleErrorBody {
    error: GoogleError,
}

#[derive(Deserialize)]
struct GoogleError {
    message: String,
}

impl Default for SheetsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SheetsClient {
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Values-append endpoint for `spreadsheet_id`. The id is percent-encoded as a single
    /// path segment.
    fn append_url(&self, spreadsheet_id: &str) -> Result<Url, PersistenceError> {
        let invalid = || PersistenceError::InvalidEndpoint {
            target: TARGET_NAME.to_string(),
            url: self.api_base.clone(),
        };
        let range = format!("{APPEND_RANGE}:append");
        let mut url = Url::parse(&self.api_base).map_err(|_| invalid())?;
        url.path_segments_mut()
            .map_err(|_| invalid())?
            .pop_if_empty()
            .extend(["v4", "spreadsheets", spreadsheet_id, "values", range.as_str()]);
        Ok(url)
    }
}

/// One row per line item: date, merchant, item, quantity, price, total.
/// A receipt without items still produces a single row carrying the total.
pub(crate) fn expense_rows(data: &ExpenseData) -> Vec<Vec<Value>> {
    if data.items.is_empty() {
        return vec![vec![
            json!(data.date),
            json!(data.merchant),
            json!(""),
            json!(""),
            json!(""),
            json!(data.total),
        ]];
    }

    data.items
        .iter()
        .map(|line| {
            vec![
                json!(data.date),
                json!(data.merchant),
                json!(line.item),
                json!(line.quantity),
                json!(line.price),
                json!(data.total),
            ]
        })
        .collect()
}

#[async_trait]
impl ExpensePersister for SheetsClient {
    fn target_name(&self) -> &str {
        TARGET_NAME
    }

    async fn persist(
        &self,
        data: &ExpenseData,
        destination: &Destination,
    ) -> Result<(), PersistenceError> {
        let response = self
            .http
            .post(self.append_url(&destination.target_id)?)
            .query(&[
                ("valueInputOption", "USER_ENTERED"),
                ("insertDataOption", "INSERT_ROWS"),
            ])
            .bearer_auth(&destination.access_token)
            .json(&json!({ "values": expense_rows(data) }))
            .send()
            .await
            .map_err(|e| PersistenceError::http(TARGET_NAME, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<GoogleErrorBody>(&body)
            .map(|parsed| parsed.error.message)
            .unwrap_or_else(|_| body.trim().to_string());

        Err(PersistenceError::Upstream {
            target: TARGET_NAME.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}
