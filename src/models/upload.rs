use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::job::{JobPhase, ProcessedReceipt, SaveStatus};

/// Which persistence backend a batch writes to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, EnumString, Display, PartialEq)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Backend {
    #[default]
    Sheets,
    Notion,
}

/// Uploaded receipt image, held in memory for the lifetime of its batch.
#[derive(Debug, Clone)]
pub struct ReceiptImage {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl ReceiptImage {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

/// Response after submitting a batch of receipts.
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitBatchResponse {
    pub batch_id: Uuid,
    pub receipts: Vec<ProcessedReceipt>,
    pub message: String,
}

/// Response for querying the active batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchStatusResponse {
    pub summary: BatchSummary,
    pub receipts: Vec<ProcessedReceipt>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Aggregate counts over a snapshot of the job collection.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchSummary {
    pub total: usize,
    pub in_progress: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchSummary {
    pub fn from_records(records: &[ProcessedReceipt]) -> Self {
        records.iter().fold(
            Self {
                total: records.len(),
                ..Default::default()
            },
            |mut summary, record| {
                match (record.phase, record.save_status) {
                    (JobPhase::Succeeded, _) | (_, SaveStatus::Success) => summary.succeeded += 1,
                    (JobPhase::Failed, _) | (_, SaveStatus::Failed) => summary.failed += 1,
                    _ => summary.in_progress += 1,
                }
                summary
            },
        )
    }

    pub fn is_finished(&self) -> bool {
        self.in_progress == 0
    }
}
