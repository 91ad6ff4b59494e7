use async_trait::async_trait;

use crate::app::reconcile_use_case::{RunManifest, Snapshot};
use crate::config::SheetConfig;
use crate::error::Result;
use crate::pipeline::ingestion::Table;

/// Line-list sheet export, read once per run
#[async_trait]
pub trait SheetSourcePort: Send + Sync {
    async fn fetch_sheet(&self, sheet: &SheetConfig) -> Result<Table>;
}

/// Cumulative per-location time series
#[async_trait]
pub trait TimeSeriesSourcePort: Send + Sync {
    async fn fetch_time_series(&self) -> Result<Table>;
}

/// Writes every output of a run, or nothing at all
#[async_trait]
pub trait SnapshotOutputPort: Send + Sync {
    async fn commit(&self, snapshot: &Snapshot) -> Result<RunManifest>;
}
