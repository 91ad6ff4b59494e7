// Reconciliation pipeline: ingestion tables, processing stages, and rendered payloads

pub mod ingestion;
pub mod processing;
pub mod render;
