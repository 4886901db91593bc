use std::sync::Arc;

use crate::config::AppConfig;
use crate::models::upload::Backend;
use crate::services::{
    ocr::WorkersAiClient,
    orchestrator::BatchOrchestrator,
    persistence::{ExpensePersister, NotionClient, SheetsClient},
    pipeline::Collaborators,
    store::JobStore,
};

/// Request limits enforced by the upload route.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_upload_bytes: usize,
}

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JobStore>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub ai: Arc<WorkersAiClient>,
    pub sheets: Arc<SheetsClient>,
    pub notion: Arc<NotionClient>,
    pub limits: Limits,
}

impl AppState {
    pub fn new(
        ai: WorkersAiClient,
        sheets: SheetsClient,
        notion: NotionClient,
        max_images_per_batch: usize,
        limits: Limits,
    ) -> Self {
        let store = Arc::new(JobStore::new());
        let orchestrator =
            BatchOrchestrator::new(store.clone()).with_max_images(max_images_per_batch);
        Self {
            store,
            orchestrator: Arc::new(orchestrator),
            ai: Arc::new(ai),
            sheets: Arc::new(sheets),
            notion: Arc::new(notion),
            limits,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let ai = WorkersAiClient::new(
            config.cf_account_id.clone(),
            config.cf_api_token.clone(),
            config.ocr_model.clone(),
            config.structuring_model.clone(),
        )
        .with_api_base(config.cf_api_base.clone());

        Self::new(
            ai,
            SheetsClient::new().with_api_base(config.sheets_api_base.clone()),
            NotionClient::new().with_api_base(config.notion_api_base.clone()),
            config.max_images_per_batch,
            Limits {
                max_upload_bytes: config.max_upload_bytes,
            },
        )
    }

    /// Collaborator set for a batch writing to `backend`.
    pub fn collaborators(&self, backend: Backend) -> Collaborators {
        let persister: Arc<dyn ExpensePersister> = match backend {
            Backend::Sheets => self.sheets.clone(),
            Backend::Notion => self.notion.clone(),
        };
        Collaborators {
            extractor: self.ai.clone(),
            structurer: self.ai.clone(),
            persister,
        }
    }
}
