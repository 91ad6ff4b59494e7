// Pipeline ingestion: materialized source tables

pub mod table;

pub use table::Table;
