use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::receipt::ExpenseData;

pub const STATUS_QUEUED: &str = "Queued";
pub const STATUS_EXTRACTING: &str = "Processing OCR...";
pub const STATUS_STRUCTURING: &str = "Structuring data...";
pub const STATUS_DATA_EXTRACTED: &str = "Data extracted";
pub const STATUS_SUCCEEDED: &str = "Saved successfully!";
pub const STATUS_FAILED: &str = "Failed";

/// Pipeline phase of a receipt job. Declaration order is the only legal direction of travel.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobPhase {
    Created,
    Extracting,
    Structuring,
    Saving,
    Succeeded,
    Failed,
}

impl JobPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobPhase::Succeeded | JobPhase::Failed)
    }
}

/// Outcome of the persistence stage for a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SaveStatus {
    #[default]
    Pending,
    Success,
    Failed,
}

/// One receipt's progress through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessedReceipt {
    pub id: Uuid,
    pub file_name: String,
    /// Transient handle the UI uses to show the uploaded image next to its record.
    pub image_ref: String,
    pub phase: JobPhase,
    /// Human-readable label for `phase`.
    pub status: String,
    pub data: Option<ExpenseData>,
    pub save_status: SaveStatus,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessedReceipt {
    pub fn new(file_name: impl Into<String>, image_ref: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            file_name: file_name.into(),
            image_ref: image_ref.into(),
            phase: JobPhase::Created,
            status: STATUS_QUEUED.to_string(),
            data: None,
            save_status: SaveStatus::Pending,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merge `patch` into this record.
    ///
    /// Terminal records are absorbing and a phase that would move backwards is dropped
    /// together with its label. Returns `true` if any field changed.
    pub fn apply(&mut self, patch: &ReceiptPatch) -> bool {
        if self.phase.is_terminal() {
            return false;
        }

        let before = self.clone();

        match patch.phase {
            Some(phase) if phase < self.phase => {
                tracing::warn!(
                    job_id = %self.id,
                    current = %self.phase,
                    requested = %phase,
                    "Ignoring phase regression"
                );
            }
            Some(phase) => {
                self.phase = phase;
                if let Some(status) = &patch.status {
                    self.status = status.clone();
                }
            }
            None => {
                if let Some(status) = &patch.status {
                    self.status = status.clone();
                }
            }
        }

        if let Some(data) = &patch.data {
            self.data = Some(data.clone());
        }
        if let Some(save_status) = patch.save_status {
            self.save_status = save_status;
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }

        let changed = *self != before;
        if changed {
            self.updated_at = Utc::now();
        }
        changed
    }
}

/// Partial field set merged into a [`ProcessedReceipt`] by id.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReceiptPatch {
    pub phase: Option<JobPhase>,
    pub status: Option<String>,
    pub data: Option<ExpenseData>,
    pub save_status: Option<SaveStatus>,
    pub error: Option<String>,
}

impl ReceiptPatch {
    /// Enter `phase` with the given status label.
    pub fn enter(phase: JobPhase, status: impl Into<String>) -> Self {
        Self {
            phase: Some(phase),
            status: Some(status.into()),
            ..Default::default()
        }
    }

    /// Attach structured data without leaving the structuring phase.
    pub fn extracted(data: ExpenseData) -> Self {
        Self {
            status: Some(STATUS_DATA_EXTRACTED.to_string()),
            data: Some(data),
            ..Default::default()
        }
    }

    pub fn succeeded() -> Self {
        Self {
            phase: Some(JobPhase::Succeeded),
            status: Some(STATUS_SUCCEEDED.to_string()),
            save_status: Some(SaveStatus::Success),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            phase: Some(JobPhase::Failed),
            status: Some(STATUS_FAILED.to_string()),
            save_status: Some(SaveStatus::Failed),
            error: Some(error.into()),
            ..Default::default()
        }
    }
}
