use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::job::{ProcessedReceipt, ReceiptPatch};

/// Immutable view of the job collection at one point in time.
pub type Snapshot = Arc<[ProcessedReceipt]>;

/// Authoritative collection of job records for the active batch.
///
/// Every mutation publishes a fresh [`Snapshot`] to all subscribers, in mutation order.
/// The lock is never held across an `.await`.
pub struct JobStore {
    inner: Mutex<StoreInner>,
}

struct StoreInner {
    records: Vec<ProcessedReceipt>,
    latest: Snapshot,
    subscribers: Vec<mpsc::UnboundedSender<Snapshot>>,
}

impl StoreInner {
    fn publish(&mut self) -> Snapshot {
        let snapshot: Snapshot = self.records.clone().into();
        self.latest = snapshot.clone();
        self.subscribers
            .retain(|subscriber| subscriber.send(snapshot.clone()).is_ok());
        snapshot
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl JobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                records: Vec::new(),
                latest: Arc::from(Vec::new()),
                subscribers: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the whole collection with a new batch's records.
    pub fn replace(&self, records: Vec<ProcessedReceipt>) -> Snapshot {
        let mut inner = self.lock();
        inner.records = records;
        inner.publish()
    }

    /// Merge `patch` into the record with `id`.
    ///
    /// Returns `None` without touching anything when no such record exists, which is how
    /// late updates from a superseded batch are dropped.
    pub fn update(&self, id: Uuid, patch: &ReceiptPatch) -> Option<Snapshot> {
        let mut inner = self.lock();
        let Some(record) = inner.records.iter_mut().find(|r| r.id == id) else {
            tracing::debug!(job_id = %id, "Dropping update for unknown job");
            return None;
        };

        if record.apply(patch) {
            Some(inner.publish())
        } else {
            Some(inner.latest.clone())
        }
    }

    pub fn get(&self, id: Uuid) -> Option<ProcessedReceipt> {
        self.lock().records.iter().find(|r| r.id == id).cloned()
    }

    pub fn snapshot(&self) -> Snapshot {
        self.lock().latest.clone()
    }

    /// Receive every snapshot published from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Snapshot> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().subscribers.push(tx);
        rx
    }
}
