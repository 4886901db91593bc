use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use super::{Destination, ExpensePersister, PersistenceError};
use crate::models::receipt::ExpenseData;

const DEFAULT_API_BASE: &str = "https://api.notion.com";
const NOTION_VERSION: &str = "2022-06-28";
const TARGET_NAME: &str = "Notion";

/// Notion caps a single rich text object at 2000 characters.
const MAX_RICH_TEXT: usize = 2000;

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%d.%m.%Y", "%Y/%m/%d", "%b %d, %Y"];

/// Creates one page per receipt in a Notion database.
pub struct NotionClient {
    http: Client,
    api_base: String,
}

#[derive(Deserialize)]
struct NotionErrorBody {
    message: String,
}

impl Default for NotionClient {
    fn default() -> Self {
        Self::new()
    }
}

impl NotionClient {
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
}

/// Normalize a printed receipt date to ISO 8601, if it is in a recognizable format.
fn iso_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
        .map(|date| date.format("%Y-%m-%d").to_string())
}

fn rich_text(content: &str) -> Value {
    let content: String = content.chars().take(MAX_RICH_TEXT).collect();
    json!([{ "type": "text", "text": { "content": content } }])
}

fn items_summary(data: &ExpenseData) -> String {
    data.items
        .iter()
        .map(|line| format!("{} x{} @ {:.2}", line.item, line.quantity, line.price))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Page properties for the target database: Merchant (title), Date, Total, Items.
/// Unparseable dates are kept as text inside Items rather than rejected by Notion.
pub(crate) fn page_properties(data: &ExpenseData) -> Map<String, Value> {
    let mut properties = Map::new();
    properties.insert(
        "Merchant".to_string(),
        json!({ "title": rich_text(&data.merchant) }),
    );
    properties.insert("Total".to_string(), json!({ "number": data.total }));

    let mut summary = items_summary(data);
    match iso_date(&data.date) {
        Some(date) => {
            properties.insert("Date".to_string(), json!({ "date": { "start": date } }));
        }
        None if !data.date.trim().is_empty() => {
            summary = format!("Date: {}\n{}", data.date.trim(), summary);
        }
        None => {}
    }

    properties.insert(
        "Items".to_string(),
        json!({ "rich_text": rich_text(summary.trim_end()) }),
    );
    properties
}

#[async_trait]
impl ExpensePersister for NotionClient {
    fn target_name(&self) -> &str {
        TARGET_NAME
    }

    async fn persist(
        &self,
        data: &ExpenseData,
        destination: &Destination,
    ) -> Result<(), PersistenceError> {
        let body = json!({
            "parent": { "database_id": destination.target_id },
            "properties": page_properties(data),
        });

        let response = self
            .http
            .post(format!("{}/v1/pages", self.api_base))
            .bearer_auth(&destination.access_token)
            .header("Notion-Version", NOTION_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| PersistenceError::http(TARGET_NAME, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<NotionErrorBody>(&text)
            .map(|parsed| parsed.message)
            .unwrap_or_else(|_| text.trim().to_string());

        Err(PersistenceError::Upstream {
            target: TARGET_NAME.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}
