use async_trait::async_trait;
use serde::Deserialize;

use crate::models::receipt::{parse_expense_data, ExpenseData};
use crate::services::ocr::{upstream_message, WorkersAiClient};

const STRUCTURING_PROMPT: &str = concat!(
    "You extract expense data from receipt text. ",
    "Respond with ONLY a JSON object of the form ",
    r#"{"merchant": string, "date": string, "total": number, "#,
    r#""items": [{"item": string, "quantity": number, "price": number}]}. "#,
    "Use the date as printed. Quantities and prices must be non-negative numbers. ",
    "Do not add commentary."
);

/// Turns raw receipt text into validated expense data.
#[async_trait]
pub trait ReceiptStructurer: Send + Sync {
    async fn structure(&self, text: &str) -> Result<ExpenseData, StructuringError>;
}

#[derive(Deserialize)]
struct TextGenerationResponse {
    result: TextGenerationResult,
}

#[derive(Deserialize)]
struct TextGenerationResult {
    #[serde(default)]
    response: Option<String>,
}

#[async_trait]
impl ReceiptStructurer for WorkersAiClient {
    async fn structure(&self, text: &str) -> Result<ExpenseData, StructuringError> {
        let request_body = serde_json::json!({
            "messages": [
                { "role": "system", "content": STRUCTURING_PROMPT },
                { "role": "user", "content": text }
            ],
            "max_tokens": 1024,
            "temperature": 0
        });

        let response = self
            .run_model(&self.structuring_model, &request_body)
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StructuringError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        let generated: TextGenerationResponse = response.json().await?;
        let raw = generated.result.response.unwrap_or_default();
        tracing::debug!(response_len = raw.len(), "Structuring model responded");

        parse_expense_data(&raw)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StructuringError {
    #[error("Structuring request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Structuring service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("Structuring service returned an empty response")]
    EmptyResponse,

    #[error("Structuring service did not return a JSON object")]
    NoJsonObject,

    #[error("Structured data is not in the expected format: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Structured data failed validation: {0}")]
    InvalidShape(#[source] garde::Report),
}
