//! Receipt ledger
//!
//! Turns uploaded receipt images into structured expense records. Each image runs through
//! OCR on Cloudflare Workers AI, structuring into merchant/date/total/items, and
//! persistence to Google Sheets or Notion, with per-receipt status tracked in a
//! [`services::store::JobStore`].

pub mod app_state;
pub mod config;
pub mod models;
pub mod routes;
pub mod services;
