use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::upload::ReceiptImage;

const DEFAULT_API_BASE: &str = "https://api.cloudflare.com/client/v4";

const OCR_PROMPT: &str = concat!(
    "Transcribe all text printed on this receipt. ",
    "Include the merchant name, the date, every line item with its quantity and price, ",
    "and the total. Return only the transcribed text."
);

/// Turns a receipt image into raw text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: &ReceiptImage) -> Result<String, ExtractionError>;
}

/// Client for Cloudflare Workers AI, used for both OCR and structuring.
pub struct WorkersAiClient {
    http: Client,
    api_base: String,
    account_id: String,
    api_token: String,
    ocr_model: String,
    pub(crate) structuring_model: String,
}

#[derive(Deserialize)]
struct VisionResponse {
    result: VisionResult,
}

#[derive(Deserialize)]
struct VisionResult {
    description: String,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub errors: Vec<ApiErrorEntry>,
}

#[derive(Deserialize)]
pub(crate) struct ApiErrorEntry {
    pub message: String,
}

impl WorkersAiClient {
    pub fn new(
        account_id: impl Into<String>,
        api_token: impl Into<String>,
        ocr_model: impl Into<String>,
        structuring_model: impl Into<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            api_base: DEFAULT_API_BASE.to_string(),
            account_id: account_id.into(),
            api_token: api_token.into(),
            ocr_model: ocr_model.into(),
            structuring_model: structuring_model.into(),
        }
    }

    /// Point the client at a different API root (e.g. an AI Gateway).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub(crate) fn model_url(&self, model: &str) -> String {
        format!(
            "{}/accounts/{}/ai/run/{}",
            self.api_base, self.account_id, model
        )
    }

    pub(crate) async fn run_model(
        &self,
        model: &str,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response, reqwest::Error> {
        self.http
            .post(self.model_url(model))
            .bearer_auth(&self.api_token)
            .json(body)
            .send()
            .await
    }
}

/// Pull a readable message out of a failed Workers AI response body.
pub(crate) fn upstream_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorBody>(body)
        .ok()
        .and_then(|parsed| parsed.errors.into_iter().next())
        .map(|entry| entry.message)
        .unwrap_or_else(|| body.trim().to_string())
}

#[async_trait]
impl TextExtractor for WorkersAiClient {
    async fn extract_text(&self, image: &ReceiptImage) -> Result<String, ExtractionError> {
        if image.bytes.is_empty() {
            return Err(ExtractionError::Unreadable(format!(
                "{} is empty",
                image.file_name
            )));
        }

        let request_body = serde_json::json!({
            "image": base64::engine::general_purpose::STANDARD.encode(&image.bytes),
            "prompt": OCR_PROMPT,
            "max_tokens": 1024
        });

        let response = self.run_model(&self.ocr_model, &request_body).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Upstream {
                status: status.as_u16(),
                message: upstream_message(&body),
            });
        }

        let vision: VisionResponse = response.json().await?;
        Ok(clean_transcription(&vision.result.description))
    }
}

/// Drop blank lines and trailing whitespace the vision model tends to pad output with.
fn clean_transcription(raw: &str) -> String {
    raw.lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Could not extract any text. The image might be unclear.")]
    NoText,

    #[error("Could not read image: {0}")]
    Unreadable(String),

    #[error("OCR request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OCR service returned {status}: {message}")]
    Upstream { status: u16, message: String },
}
