use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000")
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Cloudflare account ID
    pub cf_account_id: String,

    /// Cloudflare Workers AI API token
    pub cf_api_token: String,

    /// Workers AI root, overridable to route through an AI Gateway
    #[serde(default = "default_cf_api_base")]
    pub cf_api_base: String,

    /// Vision model used to transcribe receipt images
    #[serde(default = "default_ocr_model")]
    pub ocr_model: String,

    /// Text generation model used to structure the transcription
    #[serde(default = "default_structuring_model")]
    pub structuring_model: String,

    #[serde(default = "default_sheets_api_base")]
    pub sheets_api_base: String,

    #[serde(default = "default_notion_api_base")]
    pub notion_api_base: String,

    /// Upper bound on a whole upload request, in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    #[serde(default = "default_max_images_per_batch")]
    pub max_images_per_batch: usize,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_cf_api_base() -> String {
    "https://api.cloudflare.com/client/v4".to_string()
}

fn default_ocr_model() -> String {
    "@cf/llava-hf/llava-1.5-7b-hf".to_string()
}

fn default_structuring_model() -> String {
    "@cf/meta/llama-3.1-8b-instruct".to_string()
}

fn default_sheets_api_base() -> String {
    "https://sheets.googleapis.com".to_string()
}

fn default_notion_api_base() -> String {
    "https://api.notion.com".to_string()
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

fn default_max_images_per_batch() -> usize {
    crate::services::orchestrator::DEFAULT_MAX_IMAGES_PER_BATCH
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }
}
