//! Test doubles for the receipt pipeline's external collaborators.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, Semaphore};

use receipt_ledger::models::receipt::{ExpenseData, LineItem};
use receipt_ledger::models::upload::ReceiptImage;
use receipt_ledger::services::ocr::{ExtractionError, TextExtractor};
use receipt_ledger::services::persistence::{Destination, ExpensePersister, PersistenceError};
use receipt_ledger::services::pipeline::Collaborators;
use receipt_ledger::services::structuring::{ReceiptStructurer, StructuringError};

pub const FAKE_TARGET: &str = "Fake Ledger";

/// Ordered record of every collaborator call, shared by all fakes of one test.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// What the fake OCR returns for a given file name.
#[derive(Clone)]
pub enum Ocr {
    Text(String),
    NoText,
    Fail(String),
}

pub struct ScriptedExtractor {
    scripts: HashMap<String, Ocr>,
    log: CallLog,
}

impl ScriptedExtractor {
    pub fn new(log: CallLog) -> Self {
        Self {
            scripts: HashMap::new(),
            log,
        }
    }

    pub fn script(mut self, file_name: &str, ocr: Ocr) -> Self {
        self.scripts.insert(file_name.to_string(), ocr);
        self
    }
}

#[async_trait]
impl TextExtractor for ScriptedExtractor {
    async fn extract_text(&self, image: &ReceiptImage) -> Result<String, ExtractionError> {
        self.log.push(format!("extract:{}", image.file_name));
        match self.scripts.get(&image.file_name) {
            Some(Ocr::Text(text)) => Ok(text.clone()),
            Some(Ocr::NoText) => Err(ExtractionError::NoText),
            Some(Ocr::Fail(message)) => Err(ExtractionError::Upstream {
                status: 502,
                message: message.clone(),
            }),
            None => Ok(format!("{}\nCoffee 1 3.50\nTOTAL 3.50", image.file_name)),
        }
    }
}

/// OCR that parks until the test releases it, to hold a batch mid-flight.
pub struct GatedExtractor {
    pub entered: Arc<Notify>,
    pub gate: Arc<Semaphore>,
    log: CallLog,
}

impl GatedExtractor {
    pub fn new(log: CallLog) -> Self {
        Self {
            entered: Arc::new(Notify::new()),
            gate: Arc::new(Semaphore::new(0)),
            log,
        }
    }
}

#[async_trait]
impl TextExtractor for GatedExtractor {
    async fn extract_text(&self, image: &ReceiptImage) -> Result<String, ExtractionError> {
        self.log.push(format!("extract:{}", image.file_name));
        self.entered.notify_one();
        let _permit = self.gate.acquire().await.expect("gate closed");
        Ok(format!("{}\nTOTAL 1.00", image.file_name))
    }
}

/// Uses the first line of the text as merchant name.
/// Text containing `GARBLED` fails; text containing `NEGATIVE` yields an invalid item.
pub struct FakeStructurer {
    log: CallLog,
}

impl FakeStructurer {
    pub fn new(log: CallLog) -> Self {
        Self { log }
    }
}

#[async_trait]
impl ReceiptStructurer for FakeStructurer {
    async fn structure(&self, text: &str) -> Result<ExpenseData, StructuringError> {
        let merchant = text.lines().next().unwrap_or_default().to_string();
        self.log.push(format!("structure:{merchant}"));

        if text.contains("GARBLED") {
            return Err(StructuringError::NoJsonObject);
        }
        let price = if text.contains("NEGATIVE") { -1.0 } else { 3.5 };

        Ok(ExpenseData {
            merchant,
            date: "2024-03-02".to_string(),
            total: 3.5,
            items: vec![LineItem {
                item: "Coffee".to_string(),
                quantity: 1.0,
                price,
            }],
        })
    }
}

/// Records saves; merchants listed in `failing` are rejected with a 500.
pub struct FakePersister {
    failing: HashSet<String>,
    log: CallLog,
    pub saved: Mutex<Vec<(ExpenseData, String)>>,
}

impl FakePersister {
    pub fn new(log: CallLog) -> Self {
        Self {
            failing: HashSet::new(),
            log,
            saved: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_for(mut self, merchant: &str) -> Self {
        self.failing.insert(merchant.to_string());
        self
    }
}

#[async_trait]
impl ExpensePersister for FakePersister {
    fn target_name(&self) -> &str {
        FAKE_TARGET
    }

    async fn persist(
        &self,
        data: &ExpenseData,
        destination: &Destination,
    ) -> Result<(), PersistenceError> {
        self.log.push(format!("persist:{}", data.merchant));
        if self.failing.contains(&data.merchant) {
            return Err(PersistenceError::Upstream {
                target: FAKE_TARGET.to_string(),
                status: 500,
                message: "ledger unavailable".to_string(),
            });
        }
        self.saved
            .lock()
            .unwrap()
            .push((data.clone(), destination.target_id.clone()));
        Ok(())
    }
}

pub fn collaborators(
    extractor: impl TextExtractor + 'static,
    structurer: impl ReceiptStructurer + 'static,
    persister: impl ExpensePersister + 'static,
) -> Collaborators {
    Collaborators {
        extractor: Arc::new(extractor),
        structurer: Arc::new(structurer),
        persister: Arc::new(persister),
    }
}

/// Collaborators that succeed for every image.
pub fn happy_collaborators(log: &CallLog) -> Collaborators {
    collaborators(
        ScriptedExtractor::new(log.clone()),
        FakeStructurer::new(log.clone()),
        FakePersister::new(log.clone()),
    )
}

pub fn images(names: &[&str]) -> Vec<ReceiptImage> {
    names
        .iter()
        .map(|name| ReceiptImage::new(*name, "image/jpeg", vec![0xFF, 0xD8, 0xFF, 0xE0]))
        .collect()
}

pub fn destination() -> Option<Destination> {
    Some(Destination::new("sheet-123", "token-abc"))
}
