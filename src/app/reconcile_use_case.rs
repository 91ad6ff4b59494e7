use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::app::ports::{SheetSourcePort, SnapshotOutputPort, TimeSeriesSourcePort};
use crate::config::Config;
use crate::domain::{CaseRecord, UniqueAggregate};
use crate::error::{PipelineError, Result};
use crate::observability::metrics;
use crate::pipeline::processing::{
    AggregationReport, Aggregator, AggregatorConfig, CleanerConfig, CleaningReport, ErrorReport,
    ExpanderConfig, ExpansionReport, GeocodeReport, GeocodeResolver, GeocodeTable, GeocoderConfig,
    IdAssigner, IdentityReport, RecordCleaner, TimeSeriesExpander,
};

/// Which part of the pipeline a run covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Sheets and time series through aggregation, every output written
    Full,
    /// Sheets only: cleaned dataset and error reports, no aggregates
    SheetsOnly,
}

/// Per-stage diagnostics of one run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: RunMode,
    pub sheets: Vec<CleaningReport>,
    pub time_series: Option<ExpansionReport>,
    pub identity: IdentityReport,
    pub geocode: GeocodeReport,
    pub aggregation: Option<AggregationReport>,
    /// Wall time per stage, milliseconds
    pub stage_millis: BTreeMap<String, u64>,
}

impl RunSummary {
    pub fn anomalies(&self) -> usize {
        self.time_series
            .as_ref()
            .map_or(0, |ts| ts.anomalies.len() + ts.out_of_range_cells)
    }
}

/// Everything a run produced, ready to commit
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub mode: RunMode,
    pub records: Vec<CaseRecord>,
    pub aggregates: Vec<UniqueAggregate>,
    /// Error report per sheet name, in configured sheet order
    pub error_reports: Vec<(String, ErrorReport)>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutputChecksum {
    pub file: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Written last into the output directory; lists what was committed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunManifest {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub committed_at: DateTime<Utc>,
    pub anomalies: usize,
    pub summary: RunSummary,
    pub outputs: Vec<OutputChecksum>,
}

/// Orchestrates one reconciliation pass:
/// clean / expand -> assign ids -> geocode -> aggregate -> commit
pub struct ReconcileUseCase {
    config: Config,
    sheets: Box<dyn SheetSourcePort>,
    time_series: Option<Box<dyn TimeSeriesSourcePort>>,
    geocodes: Arc<GeocodeTable>,
    output: Box<dyn SnapshotOutputPort>,
}

impl ReconcileUseCase {
    pub fn new(
        config: Config,
        sheets: Box<dyn SheetSourcePort>,
        time_series: Option<Box<dyn TimeSeriesSourcePort>>,
        geocodes: Arc<GeocodeTable>,
        output: Box<dyn SnapshotOutputPort>,
    ) -> Self {
        Self {
            config,
            sheets,
            time_series,
            geocodes,
            output,
        }
    }

    /// Build and commit a snapshot. Any fatal error aborts before the commit.
    pub async fn run(&self, mode: RunMode) -> Result<RunManifest> {
        let started = Instant::now();
        let result = match self.build_snapshot(mode).await {
            Ok(snapshot) => self.output.commit(&snapshot).await,
            Err(e) => Err(e),
        };
        match &result {
            Ok(manifest) => {
                metrics::run::finished(started.elapsed().as_secs_f64());
                info!(
                    run_id = %manifest.run_id,
                    outputs = manifest.outputs.len(),
                    "Run committed in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
            }
            Err(e) => {
                metrics::run::failed();
                warn!(kind = ?e.kind(), "Run aborted: {}", e);
            }
        }
        result
    }

    /// Run every stage in order and return the result without writing anything
    pub async fn build_snapshot(&self, mode: RunMode) -> Result<Snapshot> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut stage_millis = BTreeMap::new();
        info!(%run_id, ?mode, sheets = self.config.sheets.len(), "Starting reconciliation run");

        let mut assigner = IdAssigner::new();
        let mut sheet_reports = Vec::with_capacity(self.config.sheets.len());
        let mut error_reports = Vec::with_capacity(self.config.sheets.len());

        let clock = Instant::now();
        for sheet in &self.config.sheets {
            let span = info_span!("clean", sheet = %sheet.name, tag = %sheet.tag);
            let table = self
                .with_retries(&sheet.name, || self.sheets.fetch_sheet(sheet))
                .instrument(span.clone())
                .await?;
            let _guard = span.enter();
            let cleaner = RecordCleaner::new(CleanerConfig::for_sheet(sheet));
            let output = cleaner.clean(&table)?;
            metrics::sheets::cleaned(&output.report);

            assigner.assign(&sheet.tag, output.records)?;
            sheet_reports.push(output.report);
            error_reports.push((sheet.name.clone(), output.errors));
        }
        stage_millis.insert("clean".to_string(), clock.elapsed().as_millis() as u64);

        let mut expansion = None;
        if mode == RunMode::Full {
            if let (Some(ts_config), Some(source)) = (&self.config.time_series, &self.time_series) {
                let clock = Instant::now();
                let span = info_span!("expand", tag = %ts_config.tag);
                let table = self
                    .with_retries(&ts_config.tag, || source.fetch_time_series())
                    .instrument(span.clone())
                    .await?;
                let _guard = span.enter();
                let expander = TimeSeriesExpander::new(ExpanderConfig::from_config(ts_config));
                let (records, report) = expander.expand(&table)?;
                metrics::time_series::expanded(&report);

                assigner.assign(&ts_config.tag, records)?;
                expansion = Some(report);
                stage_millis.insert("expand".to_string(), clock.elapsed().as_millis() as u64);
            }
        }

        let (merged, identity) = assigner.finish();
        metrics::run::merged(merged.len());

        let clock = Instant::now();
        let (records, geocode) = {
            let _guard = info_span!("geocode").entered();
            let resolver = GeocodeResolver::new(
                Arc::clone(&self.geocodes),
                GeocoderConfig::from(&self.config.geocoding),
            );
            resolver.resolve(merged)
        };
        metrics::run::geocoded(&geocode);
        stage_millis.insert("geocode".to_string(), clock.elapsed().as_millis() as u64);

        let (aggregates, aggregation) = match mode {
            RunMode::Full => {
                let clock = Instant::now();
                let _guard = info_span!("aggregate").entered();
                let aggregator = Aggregator::new(AggregatorConfig::from(&self.config.aggregation));
                let (aggregates, report) = aggregator.aggregate(&records);
                metrics::run::aggregated(&report);
                stage_millis.insert("aggregate".to_string(), clock.elapsed().as_millis() as u64);
                (aggregates, Some(report))
            }
            RunMode::SheetsOnly => (Vec::new(), None),
        };

        Ok(Snapshot {
            mode,
            records,
            aggregates,
            error_reports,
            summary: RunSummary {
                run_id,
                started_at,
                mode,
                sheets: sheet_reports,
                time_series: expansion,
                identity,
                geocode,
                aggregation,
                stage_millis,
            },
        })
    }

    /// Retry transport failures up to `transport.retries` times; anything else fails at once
    async fn with_retries<T, F, Fut>(&self, source_name: &str, mut fetch: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let limit = self.config.transport.retries;
        let mut attempt = 0;
        loop {
            match fetch().await {
                Err(e) if e.is_retryable() && attempt < limit => {
                    attempt += 1;
                    metrics::run::transport_retry();
                    warn!(source = source_name, attempt, limit, "Transport failure, retrying: {}", e);
                }
                Err(e) => {
                    if let PipelineError::Transport { .. } = e {
                        warn!(source = source_name, attempts = attempt + 1, "Giving up on source");
                    }
                    return Err(e);
                }
                Ok(value) => return Ok(value),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SheetConfig;
    use crate::error::FatalKind;
    use crate::pipeline::ingestion::Table;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    const SHEET: &str = "\
row,ID,age,sex,city,province,country,latitude,longitude,geo_resolution,date_confirmation,source,aggregated_num_cases
2,,30,M,Milan,Lombardia,Italy,45.46,9.19,admin2,01.03.2020,news,3
3,,abc,F,Milan,Lombardia,Italy,45.46,9.19,admin2,01.03.2020,news,
";

    const SERIES: &str = "\
Admin2,Province_State,Lat,Long_,3/1/20,3/2/20
Kings,New York,40.63,-73.95,2,5
";

    struct StaticSheets {
        failures_left: AtomicUsize,
    }

    #[async_trait]
    impl SheetSourcePort for StaticSheets {
        async fn fetch_sheet(&self, sheet: &SheetConfig) -> Result<Table> {
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(PipelineError::transport(&sheet.name, "connection reset"));
            }
            Table::from_csv_bytes(SHEET.as_bytes())
        }
    }

    struct StaticSeries;

    #[async_trait]
    impl TimeSeriesSourcePort for StaticSeries {
        async fn fetch_time_series(&self) -> Result<Table> {
            Table::from_csv_bytes(SERIES.as_bytes())
        }
    }

    #[derive(Default)]
    struct RecordingOutput {
        committed: Mutex<Vec<usize>>,
    }

    #[async_trait]
    impl SnapshotOutputPort for Arc<RecordingOutput> {
        async fn commit(&self, snapshot: &Snapshot) -> Result<RunManifest> {
            self.committed.lock().unwrap().push(snapshot.records.len());
            Ok(RunManifest {
                run_id: snapshot.summary.run_id,
                started_at: snapshot.summary.started_at,
                committed_at: Utc::now(),
                anomalies: snapshot.summary.anomalies(),
                summary: snapshot.summary.clone(),
                outputs: Vec::new(),
            })
        }
    }

    fn config(retries: u32) -> Config {
        let mut config = Config::from_toml_str(
            r#"
[files]
output_dir = "out"
geocode_tsv = "geo.tsv"

[[sheets]]
name = "outside_Hubei"
tag = "000-1"
path = "outside.csv"

[time_series]
path = "series.csv"

[transport]
retries = 0
"#,
        )
        .unwrap();
        config.transport.retries = retries;
        config
    }

    fn use_case(retries: u32, failures: usize, output: Arc<RecordingOutput>) -> ReconcileUseCase {
        ReconcileUseCase::new(
            config(retries),
            Box::new(StaticSheets {
                failures_left: AtomicUsize::new(failures),
            }),
            Some(Box::new(StaticSeries)),
            Arc::new(GeocodeTable::default()),
            Box::new(output),
        )
    }

    #[tokio::test]
    async fn full_run_merges_sources_with_distinct_ids() {
        let output = Arc::new(RecordingOutput::default());
        let snapshot = use_case(0, 0, Arc::clone(&output))
            .build_snapshot(RunMode::Full)
            .await
            .unwrap();

        // 3 expanded sheet rows, 1 rejected; 5 time-series cases
        assert_eq!(snapshot.summary.sheets[0].clean_rows, 3);
        assert_eq!(snapshot.error_reports[0].1.len(), 1);
        assert_eq!(snapshot.records.len(), 8);
        assert_eq!(snapshot.records[0].id, "000-1-1");
        assert_eq!(snapshot.records[7].id, "JHU-5");
        assert_eq!(snapshot.summary.identity.total, 8);

        let total: u64 = snapshot.aggregates.iter().map(|a| a.count).sum();
        assert_eq!(total, 8);
        assert!(output.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn sheets_only_skips_time_series_and_aggregation() {
        let output = Arc::new(RecordingOutput::default());
        let snapshot = use_case(0, 0, output)
            .build_snapshot(RunMode::SheetsOnly)
            .await
            .unwrap();
        assert_eq!(snapshot.records.len(), 3);
        assert!(snapshot.aggregates.is_empty());
        assert!(snapshot.summary.time_series.is_none());
        assert!(snapshot.summary.aggregation.is_none());
    }

    #[tokio::test]
    async fn transport_failure_aborts_without_commit() {
        let output = Arc::new(RecordingOutput::default());
        let err = use_case(0, 1, Arc::clone(&output))
            .run(RunMode::Full)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FatalKind::Transport);
        assert!(output.committed.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_failures_are_retried_up_to_the_limit() {
        let output = Arc::new(RecordingOutput::default());
        let manifest = use_case(2, 2, Arc::clone(&output))
            .run(RunMode::Full)
            .await
            .unwrap();
        assert_eq!(manifest.summary.identity.total, 8);
        assert_eq!(*output.committed.lock().unwrap(), vec![8]);
    }
}
