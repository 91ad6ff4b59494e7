// Observability: run metrics

pub mod metrics;

pub use metrics::{init, push_all_metrics};
