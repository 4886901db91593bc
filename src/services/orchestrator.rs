use garde::Validate;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use crate::models::job::ProcessedReceipt;
use crate::models::upload::{BatchSummary, ReceiptImage};
use crate::services::persistence::Destination;
use crate::services::pipeline::{Collaborators, JobOutcome, StagePipeline};
use crate::services::store::{JobStore, Snapshot};

pub const DEFAULT_MAX_IMAGES_PER_BATCH: usize = 20;

/// A batch whose records have been created but whose jobs have not started.
pub struct Batch {
    pub id: Uuid,
    jobs: Vec<(Uuid, ReceiptImage)>,
    destination: Destination,
    /// Collection as it stood right after the batch was created.
    pub initial: Snapshot,
}

impl Batch {
    pub fn job_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.jobs.iter().map(|(id, _)| *id)
    }
}

/// A batch running on its own task.
#[derive(Debug)]
pub struct SpawnedBatch {
    pub id: Uuid,
    pub initial: Snapshot,
    pub task: JoinHandle<Snapshot>,
}

/// Runs batches of receipt jobs one after another against a shared [`JobStore`].
pub struct BatchOrchestrator {
    store: Arc<JobStore>,
    max_images: usize,
    /// Task of the most recently spawned batch.
    active: Mutex<Option<AbortHandle>>,
}

impl BatchOrchestrator {
    pub fn new(store: Arc<JobStore>) -> Self {
        Self {
            store,
            max_images: DEFAULT_MAX_IMAGES_PER_BATCH,
            active: Mutex::new(None),
        }
    }

    pub fn with_max_images(mut self, max_images: usize) -> Self {
        self.max_images = max_images.max(1);
        self
    }

    pub fn store(&self) -> &Arc<JobStore> {
        &self.store
    }

    /// Check preconditions without touching the store.
    pub fn validate(
        &self,
        images: &[ReceiptImage],
        destination: Option<&Destination>,
    ) -> Result<(), ValidationError> {
        if images.is_empty() {
            return Err(ValidationError::NoImages);
        }
        if images.len() > self.max_images {
            return Err(ValidationError::TooManyImages {
                max: self.max_images,
                got: images.len(),
            });
        }
        let destination = destination.ok_or(ValidationError::MissingDestination)?;
        destination
            .validate()
            .map_err(ValidationError::InvalidDestination)?;
        Ok(())
    }

    /// Validate and create one record per image, replacing the previous batch.
    pub fn start_batch(
        &self,
        images: Vec<ReceiptImage>,
        destination: Option<Destination>,
    ) -> Result<Batch, ValidationError> {
        self.validate(&images, destination.as_ref())?;
        let destination = destination.ok_or(ValidationError::MissingDestination)?;

        let batch_id = Uuid::new_v4();
        let records: Vec<ProcessedReceipt> = images
            .iter()
            .enumerate()
            .map(|(position, image)| {
                ProcessedReceipt::new(
                    image.file_name.clone(),
                    format!("{batch_id}/{position}"),
                )
            })
            .collect();
        let jobs = records
            .iter()
            .map(|record| record.id)
            .zip(images)
            .collect();

        let initial = self.store.replace(records);
        metrics::counter!("receipt_batches_total").increment(1);
        info!(batch_id = %batch_id, jobs = initial.len(), "Batch created");

        Ok(Batch {
            id: batch_id,
            jobs,
            destination,
            initial,
        })
    }

    /// Run every job of `batch` to a terminal state, strictly in input order.
    ///
    /// Stops at the first job whose record is no longer in the store: once a newer batch
    /// has replaced this one, no further collaborator calls are made for it.
    pub async fn run_batch(&self, batch: Batch, collaborators: &Collaborators) -> Snapshot {
        let span = tracing::info_span!("batch", batch_id = %batch.id);
        self.run_jobs(batch, collaborators).instrument(span).await
    }

    async fn run_jobs(&self, batch: Batch, collaborators: &Collaborators) -> Snapshot {
        let started = Instant::now();
        let pipeline = StagePipeline::new(&self.store, collaborators);
        let (mut succeeded, mut failed) = (0usize, 0usize);

        for (job_id, image) in &batch.jobs {
            if self.store.get(*job_id).is_none() {
                info!(job_id = %job_id, "Batch superseded, skipping remaining jobs");
                break;
            }
            let job_started = Instant::now();
            metrics::counter!("receipt_jobs_total").increment(1);
            info!(job_id = %job_id, file_name = %image.file_name, "Processing receipt");

            match pipeline.run(*job_id, image, &batch.destination).await {
                JobOutcome::Succeeded(data) => {
                    succeeded += 1;
                    metrics::counter!("receipt_jobs_succeeded").increment(1);
                    info!(
                        job_id = %job_id,
                        merchant = %data.merchant,
                        total = data.total,
                        items = data.items.len(),
                        duration_ms = job_started.elapsed().as_millis() as u64,
                        "Receipt saved"
                    );
                }
                JobOutcome::Failed(err) => {
                    failed += 1;
                    let stage: &'static str = err.stage().into();
                    metrics::counter!("receipt_jobs_failed", "stage" => stage).increment(1);
                    warn!(
                        job_id = %job_id,
                        stage,
                        error = %err,
                        duration_ms = job_started.elapsed().as_millis() as u64,
                        "Receipt failed"
                    );
                }
                JobOutcome::Superseded => {
                    info!(job_id = %job_id, "Receipt dropped by a newer batch");
                    break;
                }
            }
            metrics::histogram!("receipt_job_seconds").record(job_started.elapsed().as_secs_f64());
        }

        info!(
            succeeded,
            failed,
            duration_ms = started.elapsed().as_millis() as u64,
            "Batch finished"
        );
        self.store.snapshot()
    }

    /// Start a batch and run it in the background, cancelling the task of the batch it
    /// replaces so at most one batch talks to the collaborators at a time.
    ///
    /// Nothing is cancelled when validation fails.
    pub fn spawn_batch(
        self: &Arc<Self>,
        images: Vec<ReceiptImage>,
        destination: Option<Destination>,
        collaborators: Collaborators,
    ) -> Result<SpawnedBatch, ValidationError> {
        // Held until the new task is registered; concurrent submissions queue here.
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);

        let batch = self.start_batch(images, destination)?;
        let (id, initial) = (batch.id, batch.initial.clone());

        let orchestrator = self.clone();
        let task =
            tokio::spawn(async move { orchestrator.run_batch(batch, &collaborators).await });

        if let Some(previous) = active.replace(task.abort_handle()) {
            if !previous.is_finished() {
                info!(batch_id = %id, "Cancelling superseded batch");
            }
            previous.abort();
        }

        Ok(SpawnedBatch { id, initial, task })
    }

    /// Validate, create and run a batch to completion, returning the final collection.
    pub async fn process_batch(
        &self,
        images: Vec<ReceiptImage>,
        destination: Option<Destination>,
        collaborators: &Collaborators,
    ) -> Result<Snapshot, ValidationError> {
        let batch = self.start_batch(images, destination)?;
        Ok(self.run_batch(batch, collaborators).await)
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary::from_records(&self.store.snapshot())
    }
}

/// Batch-level precondition failure, raised before any job exists.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Please select at least one receipt image.")]
    NoImages,

    #[error("Too many images in one batch: {got} (maximum {max}).")]
    TooManyImages { max: usize, got: usize },

    #[error("Please choose a destination before processing receipts.")]
    MissingDestination,

    #[error("Invalid destination: {0}")]
    InvalidDestination(#[source] garde::Report),
}
