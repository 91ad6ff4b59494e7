pub mod config;
pub mod constants;
pub mod domain;
pub mod error;
pub mod logging;
pub mod observability;
pub mod pipeline;

// Application use case and its port adapters
pub mod app;
pub mod infra;
