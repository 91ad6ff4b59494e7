//! Run metrics for the reconciliation pipeline.
//!
//! Counters and gauges go through the `metrics` facade. A Prometheus recorder renders them
//! and, when a push gateway is configured, the whole set is pushed once at the end of the run.

use std::fmt;
use std::sync::OnceLock;
use tracing::{info, warn};

/// Environment variable naming the Prometheus push gateway
pub const PUSHGATEWAY_ENV: &str = "CASE_RECONCILER_PUSHGATEWAY_URL";

/// All metric names used in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    SheetRowsInput,
    SheetRowsExpanded,
    SheetRowsCorrected,
    SheetRowsRejected,
    TimeSeriesRowsEmitted,
    TimeSeriesDiffAnomalies,
    TimeSeriesLocationsSkipped,
    MergedRecords,
    GeocodeMatched,
    GeocodeMissed,
    Aggregates,
    TransportRetries,
    RunDuration,
    RunFailures,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::SheetRowsInput => "case_reconciler_sheet_rows_input_total",
            MetricName::SheetRowsExpanded => "case_reconciler_sheet_rows_expanded_total",
            MetricName::SheetRowsCorrected => "case_reconciler_sheet_rows_corrected_total",
            MetricName::SheetRowsRejected => "case_reconciler_sheet_rows_rejected_total",
            MetricName::TimeSeriesRowsEmitted => "case_reconciler_time_series_rows_emitted_total",
            MetricName::TimeSeriesDiffAnomalies => "case_reconciler_time_series_diff_anomalies_total",
            MetricName::TimeSeriesLocationsSkipped => "case_reconciler_time_series_locations_skipped_total",
            MetricName::MergedRecords => "case_reconciler_merged_records",
            MetricName::GeocodeMatched => "case_reconciler_geocode_matched_total",
            MetricName::GeocodeMissed => "case_reconciler_geocode_missed_total",
            MetricName::Aggregates => "case_reconciler_aggregates",
            MetricName::TransportRetries => "case_reconciler_transport_retries_total",
            MetricName::RunDuration => "case_reconciler_run_duration_seconds",
            MetricName::RunFailures => "case_reconciler_run_failures_total",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static METRICS_HANDLE: OnceLock<metrics_exporter_prometheus::PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Safe to call once per process.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
    METRICS_HANDLE.set(handle).ok();
    info!("Metrics recorder installed");
    Ok(())
}

/// Rendered exposition text, if the recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE.get().map(|h| h.render())
}

/// Push everything recorded so far to the configured gateway. Failures only warn.
pub async fn push_all_metrics(instance: &str) {
    let base = match std::env::var(PUSHGATEWAY_ENV) {
        Ok(v) if !v.trim().is_empty() => v,
        _ => return,
    };
    let Some(body) = render() else {
        return;
    };
    let push_url = format!(
        "{}/metrics/job/case_reconciler/instance/{}",
        base.trim_end_matches('/'),
        instance
    );
    let result = reqwest::Client::new()
        .post(&push_url)
        .header("Content-Type", "text/plain; version=0.0.4")
        .body(body)
        .send()
        .await;
    match result {
        Ok(r) if r.status().is_success() => info!("Pushed metrics to Pushgateway"),
        Ok(r) => warn!("Pushgateway push responded with status {}", r.status().as_u16()),
        Err(e) => warn!("Failed to push metrics to Pushgateway: {}", e),
    }
}

fn count(name: MetricName, value: u64) {
    ::metrics::counter!(name.as_str()).increment(value);
}

fn count_for(name: MetricName, source: &str, value: u64) {
    ::metrics::counter!(name.as_str(), "source" => source.to_string()).increment(value);
}

fn gauge(name: MetricName, value: f64) {
    ::metrics::gauge!(name.as_str()).set(value);
}

pub mod sheets {
    use super::{count_for, MetricName};
    use crate::pipeline::processing::CleaningReport;

    pub fn cleaned(report: &CleaningReport) {
        let source = report.source_name.as_str();
        count_for(MetricName::SheetRowsInput, source, report.input_rows as u64);
        count_for(MetricName::SheetRowsExpanded, source, report.expanded_rows as u64);
        count_for(MetricName::SheetRowsCorrected, source, report.corrected_rows as u64);
        count_for(MetricName::SheetRowsRejected, source, report.rejected_rows as u64);
    }
}

pub mod time_series {
    use super::{count_for, MetricName};
    use crate::pipeline::processing::ExpansionReport;

    pub fn expanded(report: &ExpansionReport) {
        let source = report.source_tag.as_str();
        count_for(MetricName::TimeSeriesRowsEmitted, source, report.rows_emitted as u64);
        count_for(MetricName::TimeSeriesDiffAnomalies, source, report.anomalies.len() as u64);
        count_for(MetricName::TimeSeriesLocationsSkipped, source, report.skipped_locations as u64);
    }
}

pub mod run {
    use super::{count, gauge, MetricName};
    use crate::pipeline::processing::{AggregationReport, GeocodeReport};

    pub fn merged(records: usize) {
        gauge(MetricName::MergedRecords, records as f64);
    }

    pub fn geocoded(report: &GeocodeReport) {
        count(MetricName::GeocodeMatched, report.matched as u64);
        count(MetricName::GeocodeMissed, report.missed() as u64);
    }

    pub fn aggregated(report: &AggregationReport) {
        gauge(MetricName::Aggregates, report.aggregates as f64);
    }

    pub fn transport_retry() {
        count(MetricName::TransportRetries, 1);
    }

    pub fn finished(duration_secs: f64) {
        gauge(MetricName::RunDuration, duration_secs);
    }

    pub fn failed() {
        count(MetricName::RunFailures, 1);
    }
}
