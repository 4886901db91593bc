//! Persistence strategies for structured expense data.
//!
//! The pipeline only sees [`ExpensePersister`]; which backend a batch writes to is decided
//! by the caller when it assembles the collaborator set.

pub mod notion;
pub mod sheets;

use async_trait::async_trait;
use garde::Validate;
use serde::Deserialize;

use crate::models::receipt::ExpenseData;

pub use notion::NotionClient;
pub use sheets::SheetsClient;

/// Where a batch's records are written. Resolved outside the pipeline and passed through
/// untouched.
#[derive(Clone, Deserialize, Validate)]
pub struct Destination {
    /// Spreadsheet id or database id.
    #[garde(length(min = 1, max = 200))]
    pub target_id: String,

    #[garde(length(min = 1))]
    pub access_token: String,
}

impl Destination {
    pub fn new(target_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            target_id: target_id.into(),
            access_token: access_token.into(),
        }
    }
}

impl std::fmt::Debug for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Destination")
            .field("target_id", &self.target_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Writes one receipt's expense data to a destination.
#[async_trait]
pub trait ExpensePersister: Send + Sync {
    /// Display name of the backend, shown in the job's status while saving.
    fn target_name(&self) -> &str;

    async fn persist(
        &self,
        data: &ExpenseData,
        destination: &Destination,
    ) -> Result<(), PersistenceError>;
}

#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Failed to save to {target}: {source}")]
    Http {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to save to {target} ({status}): {message}")]
    Upstream {
        target: String,
        status: u16,
        message: String,
    },

    #[error("Invalid {target} endpoint: {url}")]
    InvalidEndpoint { target: String, url: String },
}

impl PersistenceError {
    pub(crate) fn http(target: &str, source: reqwest::Error) -> Self {
        Self::Http {
            target: target.to_string(),
            source,
        }
    }
}
