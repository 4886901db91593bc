use garde::Validate;
use std::sync::Arc;
use strum::IntoStaticStr;
use uuid::Uuid;

use crate::models::job::{JobPhase, ReceiptPatch, STATUS_EXTRACTING, STATUS_STRUCTURING};
use crate::models::receipt::ExpenseData;
use crate::models::upload::ReceiptImage;
use crate::services::ocr::{ExtractionError, TextExtractor};
use crate::services::persistence::{Destination, ExpensePersister, PersistenceError};
use crate::services::store::JobStore;
use crate::services::structuring::{ReceiptStructurer, StructuringError};

/// Shown when a collaborator fails without saying why.
pub const GENERIC_FAILURE: &str = "An unexpected error occurred while processing this receipt.";

/// The external services a batch runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub extractor: Arc<dyn TextExtractor>,
    pub structurer: Arc<dyn ReceiptStructurer>,
    pub persister: Arc<dyn ExpensePersister>,
}

/// Pipeline stage a job failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Extraction,
    Structuring,
    Persistence,
}

/// Job-scoped failure. Never escapes the pipeline: it becomes the job's `error`.
#[derive(Debug, thiserror::Error)]
pub enum StageError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Structuring(#[from] StructuringError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl StageError {
    pub fn stage(&self) -> Stage {
        match self {
            StageError::Extraction(_) => Stage::Extraction,
            StageError::Structuring(_) => Stage::Structuring,
            StageError::Persistence(_) => Stage::Persistence,
        }
    }

    /// Message stored on the failed job. Falls back to [`GENERIC_FAILURE`] when the
    /// collaborator gave no reason of its own.
    pub fn user_message(&self) -> String {
        let detail = match self {
            StageError::Extraction(ExtractionError::Unreadable(reason)) => Some(reason),
            StageError::Extraction(ExtractionError::Upstream { message, .. })
            | StageError::Structuring(StructuringError::Upstream { message, .. })
            | StageError::Persistence(PersistenceError::Upstream { message, .. }) => Some(message),
            _ => None,
        };
        match detail {
            Some(detail) if detail.trim().is_empty() => GENERIC_FAILURE.to_string(),
            _ => self.to_string(),
        }
    }
}

/// Terminal result of one job.
#[derive(Debug)]
pub enum JobOutcome {
    Succeeded(ExpenseData),
    Failed(StageError),
    /// The record was replaced by a newer batch before the job finished.
    Superseded,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Succeeded(_))
    }
}

/// Drives one job through extraction, structuring and persistence, recording each
/// transition in the store.
pub struct StagePipeline<'a> {
    store: &'a JobStore,
    collaborators: &'a Collaborators,
}

impl<'a> StagePipeline<'a> {
    pub fn new(store: &'a JobStore, collaborators: &'a Collaborators) -> Self {
        Self {
            store,
            collaborators,
        }
    }

    pub async fn run(
        &self,
        job_id: Uuid,
        image: &ReceiptImage,
        destination: &Destination,
    ) -> JobOutcome {
        let (patch, outcome) = match self.advance(job_id, image, destination).await {
            Ok(Some(data)) => (ReceiptPatch::succeeded(), JobOutcome::Succeeded(data)),
            Ok(None) => return JobOutcome::Superseded,
            Err(err) => (
                ReceiptPatch::failed(err.user_message()),
                JobOutcome::Failed(err),
            ),
        };
        if self.record(job_id, &patch) {
            outcome
        } else {
            JobOutcome::Superseded
        }
    }

    /// Merge `patch` into the job's record. `false` once a newer batch has replaced it.
    fn record(&self, job_id: Uuid, patch: &ReceiptPatch) -> bool {
        self.store.update(job_id, patch).is_some()
    }

    /// Run the stages in order. `Ok(None)` means the job left the store part way and the
    /// remaining stages were skipped.
    async fn advance(
        &self,
        job_id: Uuid,
        image: &ReceiptImage,
        destination: &Destination,
    ) -> Result<Option<ExpenseData>, StageError> {
        if !self.record(
            job_id,
            &ReceiptPatch::enter(JobPhase::Extracting, STATUS_EXTRACTING),
        ) {
            return Ok(None);
        }
        let text = self.collaborators.extractor.extract_text(image).await?;
        if text.trim().is_empty() {
            return Err(ExtractionError::NoText.into());
        }
        tracing::debug!(job_id = %job_id, text_len = text.len(), "Text extracted");

        if !self.record(
            job_id,
            &ReceiptPatch::enter(JobPhase::Structuring, STATUS_STRUCTURING),
        ) {
            return Ok(None);
        }
        let data = self.collaborators.structurer.structure(&text).await?;
        data.validate().map_err(StructuringError::InvalidShape)?;

        // Attach the data before saving so a persistence failure cannot lose it.
        let persister = &self.collaborators.persister;
        if !self.record(job_id, &ReceiptPatch::extracted(data.clone()))
            || !self.record(
                job_id,
                &ReceiptPatch::enter(
                    JobPhase::Saving,
                    format!("Saving to {}...", persister.target_name()),
                ),
            )
        {
            return Ok(None);
        }
        persister.persist(&data, destination).await?;

        Ok(Some(data))
    }
}
