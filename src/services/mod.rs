pub mod ocr;
pub mod orchestrator;
pub mod persistence;
pub mod pipeline;
pub mod store;
pub mod structuring;
