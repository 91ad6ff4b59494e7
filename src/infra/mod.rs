pub mod snapshot_output;
pub mod sources;

pub use snapshot_output::FsSnapshotOutput;
pub use sources::{CsvSheetSource, FileTimeSeriesSource, HttpTimeSeriesSource};
