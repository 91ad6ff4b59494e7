//! Location resolution against the immutable geocode table.

pub mod table;

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::GeocodingConfig;
use crate::domain::CaseRecord;

pub use table::{GeocodeEntry, GeocodeKey, GeocodeTable};

#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    /// How many miss keys the report keeps
    pub top_misses: usize,
}

impl From<&GeocodingConfig> for GeocoderConfig {
    fn from(config: &GeocodingConfig) -> Self {
        Self {
            top_misses: config.top_misses,
        }
    }
}

/// A lookup key with no table entry, and how many records used it
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeocodeMiss {
    pub key: GeocodeKey,
    pub count: usize,
}

/// Diagnostics of one resolution pass
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GeocodeReport {
    pub matched: usize,
    pub total: usize,
    pub distinct_misses: usize,
    /// Most frequent misses, count descending then key ascending
    pub top_misses: Vec<GeocodeMiss>,
}

impl GeocodeReport {
    pub fn missed(&self) -> usize {
        self.total - self.matched
    }
}

pub struct GeocodeResolver {
    table: Arc<GeocodeTable>,
    config: GeocoderConfig,
}

impl GeocodeResolver {
    pub fn new(table: Arc<GeocodeTable>, config: GeocoderConfig) -> Self {
        Self { table, config }
    }

    /// Look up one location. The same key always yields the same answer.
    pub fn lookup(&self, city: &str, province: &str, country: &str) -> Option<&GeocodeEntry> {
        self.table.get(&GeocodeKey::new(city, province, country))
    }

    /// Enrich every record. A match overwrites coordinates and derived fields; a miss leaves
    /// the record as it was and is counted under its key.
    pub fn resolve(&self, records: Vec<CaseRecord>) -> (Vec<CaseRecord>, GeocodeReport) {
        let total = records.len();
        let mut matched = 0;
        let mut misses: HashMap<GeocodeKey, usize> = HashMap::new();

        let resolved: Vec<CaseRecord> = records
            .into_iter()
            .map(|record| {
                let key = GeocodeKey::new(&record.city, &record.province, &record.country);
                match self.table.get(&key) {
                    Some(entry) => {
                        matched += 1;
                        apply(record, entry)
                    }
                    None => {
                        *misses.entry(key).or_insert(0) += 1;
                        record
                    }
                }
            })
            .collect();

        let distinct_misses = misses.len();
        let mut ranked: Vec<GeocodeMiss> = misses
            .into_iter()
            .map(|(key, count)| GeocodeMiss { key, count })
            .collect();
        ranked.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        ranked.truncate(self.config.top_misses);

        let report = GeocodeReport {
            matched,
            total,
            distinct_misses,
            top_misses: ranked,
        };

        info!("Geocode matched {}/{}", report.matched, report.total);
        if !report.top_misses.is_empty() {
            let summary: Vec<String> = report
                .top_misses
                .iter()
                .map(|m| format!("{} ({})", m.key, m.count))
                .collect();
            warn!("Top {} geocode misses: {}", summary.len(), summary.join(", "));
        }
        (resolved, report)
    }
}

fn apply(mut record: CaseRecord, entry: &GeocodeEntry) -> CaseRecord {
    record.latitude = Some(entry.latitude);
    record.longitude = Some(entry.longitude);
    record.latitude_text.clear();
    record.longitude_text.clear();
    record.geo_resolution = entry.geo_resolution;
    record.derived = entry.derived.clone();
    record
}
