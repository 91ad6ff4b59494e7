//! Cumulative time series to per-case rows by chronological first-differencing.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{TimeSeriesColumns, TimeSeriesConfig};
use crate::constants::MAX_CUMULATIVE_COUNT;
use crate::domain::{format_date_label, parse_coordinate, CaseRecord, GeoResolution, Sex};
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::Table;

static DATE_COLUMN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{2}|\d{4})$").unwrap());

#[derive(Debug, Clone)]
pub struct ExpanderConfig {
    pub source_tag: String,
    pub columns: TimeSeriesColumns,
    pub country: String,
    pub geo_resolution: GeoResolution,
}

impl ExpanderConfig {
    pub fn from_config(ts: &TimeSeriesConfig) -> Self {
        Self {
            source_tag: ts.tag.clone(),
            columns: ts.columns.clone(),
            country: ts.country.clone(),
            geo_resolution: ts.geo_resolution,
        }
    }
}

/// A date column of the source, relabelled to the canonical `DD.MM.YYYY` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateColumn {
    pub index: usize,
    pub date: NaiveDate,
    pub label: String,
}

/// A downward revision: the cumulative count dropped between two consecutive dates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffAnomaly {
    pub city: String,
    pub province: String,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(with = "crate::domain::date_label")]
    pub date: NaiveDate,
    pub previous: i64,
    pub current: i64,
    /// Rows a naive difference would have removed
    pub suppressed: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExpansionReport {
    pub source_tag: String,
    pub locations: usize,
    pub skipped_locations: usize,
    pub date_columns: usize,
    pub unparseable_cells: usize,
    /// Cells whose magnitude exceeds the accepted cumulative range
    pub out_of_range_cells: usize,
    pub rows_emitted: usize,
    pub anomalies: Vec<DiffAnomaly>,
}

struct LocationSeries {
    template: CaseRecord,
    daily: Vec<u64>,
}

pub struct TimeSeriesExpander {
    config: ExpanderConfig,
}

impl TimeSeriesExpander {
    pub fn new(config: ExpanderConfig) -> Self {
        Self { config }
    }

    /// Date columns in strict chronological order
    pub fn date_columns(table: &Table) -> Vec<DateColumn> {
        let mut columns: Vec<DateColumn> = table
            .headers
            .iter()
            .enumerate()
            .filter_map(|(index, header)| {
                let date = parse_date_header(header)?;
                Some(DateColumn {
                    index,
                    date,
                    label: format_date_label(date),
                })
            })
            .collect();
        columns.sort_by_key(|c| (c.date, c.index));
        columns
    }

    pub fn expand(&self, table: &Table) -> Result<(Vec<CaseRecord>, ExpansionReport)> {
        let tag = &self.config.source_tag;
        let cols = &self.config.columns;
        let lat_idx = table.require_column(tag, &cols.latitude)?;
        let lon_idx = table.require_column(tag, &cols.longitude)?;
        let city_idx = table.column_index(&cols.city);
        let province_idx = table.column_index(&cols.province);

        let dates = Self::date_columns(table);
        let mut report = ExpansionReport {
            source_tag: tag.clone(),
            date_columns: dates.len(),
            ..Default::default()
        };

        let mut series = Vec::with_capacity(table.len());
        for row in &table.rows {
            let (Some(latitude), Some(longitude)) =
                (parse_coordinate(&row[lat_idx]), parse_coordinate(&row[lon_idx]))
            else {
                report.skipped_locations += 1;
                continue;
            };
            if latitude == 0.0 || longitude == 0.0 {
                report.skipped_locations += 1;
                continue;
            }

            let template = CaseRecord {
                city: cell(row, city_idx),
                province: cell(row, province_idx),
                country: self.config.country.clone(),
                latitude: Some(latitude),
                longitude: Some(longitude),
                latitude_text: row[lat_idx].trim().to_string(),
                longitude_text: row[lon_idx].trim().to_string(),
                geo_resolution: self.config.geo_resolution,
                source: tag.clone(),
                sex: Sex::Unknown,
                ..Default::default()
            };
            let daily = self.difference(row, &dates, &template, &mut report)?;
            series.push(LocationSeries { template, daily });
        }
        report.locations = series.len();

        let overflow = || PipelineError::expansion(tag, "expanded row count overflows");
        let total = series
            .iter()
            .flat_map(|s| s.daily.iter())
            .try_fold(0u64, |acc, &n| acc.checked_add(n))
            .and_then(|t| usize::try_from(t).ok())
            .ok_or_else(overflow)?;
        let mut records = Vec::new();
        records.try_reserve(total).map_err(|_| overflow())?;

        // Date-major order keeps sequence numbers of earlier dates stable as columns are appended.
        for (d, column) in dates.iter().enumerate() {
            for location in &series {
                let n = location.daily[d] as usize;
                if n == 0 {
                    continue;
                }
                let mut record = location.template.clone();
                record.date_confirmation = Some(column.date);
                records.extend(std::iter::repeat(record).take(n));
            }
        }
        report.rows_emitted = records.len();

        info!(
            source = %tag,
            locations = report.locations,
            skipped = report.skipped_locations,
            dates = report.date_columns,
            rows = report.rows_emitted,
            anomalies = report.anomalies.len(),
            "Time series expanded"
        );
        Ok((records, report))
    }

    /// Per-date new cases for one location. Negative diffs emit nothing and are recorded.
    fn difference(
        &self,
        row: &[String],
        dates: &[DateColumn],
        template: &CaseRecord,
        report: &mut ExpansionReport,
    ) -> Result<Vec<u64>> {
        let mut previous: i64 = 0;
        let mut daily = Vec::with_capacity(dates.len());
        for column in dates {
            let current = match parse_count(&row[column.index]) {
                Some(v) if v.unsigned_abs() <= MAX_CUMULATIVE_COUNT.unsigned_abs() => v,
                Some(v) => {
                    warn!(
                        source = %self.config.source_tag,
                        city = %template.city,
                        date = %column.label,
                        value = v,
                        "Cumulative count out of range, previous total kept"
                    );
                    report.out_of_range_cells += 1;
                    previous
                }
                None => {
                    report.unparseable_cells += 1;
                    previous
                }
            };
            let diff = current.checked_sub(previous).ok_or_else(|| {
                PipelineError::expansion(
                    &self.config.source_tag,
                    format!("difference {} - {} overflows", current, previous),
                )
            })?;
            if diff < 0 {
                warn!(
                    source = %self.config.source_tag,
                    city = %template.city,
                    province = %template.province,
                    date = %column.label,
                    previous,
                    current,
                    "Negative cumulative diff suppressed"
                );
                report.anomalies.push(DiffAnomaly {
                    city: template.city.clone(),
                    province: template.province.clone(),
                    latitude: template.latitude.unwrap_or_default(),
                    longitude: template.longitude.unwrap_or_default(),
                    date: column.date,
                    previous,
                    current,
                    suppressed: diff.unsigned_abs(),
                });
                daily.push(0);
            } else {
                daily.push(diff as u64);
            }
            previous = current;
        }
        Ok(daily)
    }
}

/// `M/D/YY` (or `M/D/YYYY`) header to a date
pub fn parse_date_header(header: &str) -> Option<NaiveDate> {
    let caps = DATE_COLUMN.captures(header.trim())?;
    let month: u32 = caps.get(1)?.as_str().parse().ok()?;
    let day: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year_raw = caps.get(3)?.as_str();
    let year: i32 = if year_raw.len() == 2 {
        2000 + year_raw.parse::<i32>().ok()?
    } else {
        year_raw.parse().ok()?
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_count(raw: &str) -> Option<i64> {
    let trimmed = raw.trim();
    trimmed.parse::<i64>().ok().or_else(|| {
        trimmed
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite() && v.fract() == 0.0)
            .map(|v| v as i64)
    })
}

fn cell(row: &[String], idx: Option<usize>) -> String {
    idx.and_then(|i| row.get(i))
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}
