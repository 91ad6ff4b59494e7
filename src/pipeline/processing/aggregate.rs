//! Reduction of per-case records into unique (location, date, resolution) aggregates.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

use crate::config::AggregationConfig;
use crate::domain::{CaseRecord, GeoResolution, UniqueAggregate};

#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Decimal places kept for latitude and longitude (half away from zero)
    pub precision: u32,
}

impl From<&AggregationConfig> for AggregatorConfig {
    fn from(config: &AggregationConfig) -> Self {
        Self {
            precision: config.precision,
        }
    }
}

/// Grouping key. Field order gives the output order: date, then location, then resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregateKey {
    pub date: NaiveDate,
    pub latitude: i64,
    pub longitude: i64,
    pub geo_resolution: GeoResolution,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AggregationReport {
    pub input_records: usize,
    /// Records without coordinates
    pub unplaceable: usize,
    /// Records without a confirmation date
    pub undated: usize,
    pub aggregates: usize,
    pub precision: u32,
}

pub struct Aggregator {
    config: AggregatorConfig,
    scale: f64,
}

impl Aggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            scale: 10f64.powi(config.precision as i32),
            config,
        }
    }

    pub fn key(
        &self,
        latitude: f64,
        longitude: f64,
        date: NaiveDate,
        geo_resolution: GeoResolution,
    ) -> AggregateKey {
        AggregateKey {
            date,
            latitude: (latitude * self.scale).round() as i64,
            longitude: (longitude * self.scale).round() as i64,
            geo_resolution,
        }
    }

    /// One aggregate per distinct key over the per-case set
    pub fn aggregate(&self, records: &[CaseRecord]) -> (Vec<UniqueAggregate>, AggregationReport) {
        let mut report = AggregationReport {
            input_records: records.len(),
            precision: self.config.precision,
            ..Default::default()
        };

        let weighted = records.iter().filter_map(|record| {
            let Some((lat, lon)) = record.coordinates() else {
                report.unplaceable += 1;
                return None;
            };
            let Some(date) = record.date_confirmation else {
                report.undated += 1;
                return None;
            };
            Some((self.key(lat, lon, date, record.geo_resolution), 1))
        });
        let aggregates = self.fold(weighted);

        report.aggregates = aggregates.len();
        info!(
            records = report.input_records,
            aggregates = report.aggregates,
            unplaceable = report.unplaceable,
            undated = report.undated,
            precision = report.precision,
            "Reduced to unique aggregates"
        );
        (aggregates, report)
    }

    /// Fold existing aggregates again, treating `count` as multiplicity. With the same
    /// precision this reproduces the single-pass result.
    pub fn reaggregate(&self, aggregates: &[UniqueAggregate]) -> Vec<UniqueAggregate> {
        self.fold(aggregates.iter().map(|a| {
            (
                self.key(a.latitude, a.longitude, a.date, a.geo_resolution),
                a.count,
            )
        }))
    }

    fn fold<I>(&self, weighted: I) -> Vec<UniqueAggregate>
    where
        I: IntoIterator<Item = (AggregateKey, u64)>,
    {
        let mut counts: BTreeMap<AggregateKey, u64> = BTreeMap::new();
        for (key, weight) in weighted {
            *counts.entry(key).or_insert(0) += weight;
        }
        counts
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(key, count)| UniqueAggregate {
                latitude: key.latitude as f64 / self.scale,
                longitude: key.longitude as f64 / self.scale,
                date: key.date,
                geo_resolution: key.geo_resolution,
                count,
            })
            .collect()
    }
}
