use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use tracing::info;

use crate::constants::MISSING;
use crate::domain::{parse_coordinate, DerivedGeocode, GeoResolution};
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::Table;

const KEY_COLUMNS: [&str; 3] = ["city", "province", "country"];

/// Normalized lookup key: trimmed, lowercased, missing marker treated as empty
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct GeocodeKey {
    pub city: String,
    pub province: String,
    pub country: String,
}

impl GeocodeKey {
    pub fn new(city: &str, province: &str, country: &str) -> Self {
        Self {
            city: normalize_part(city),
            province: normalize_part(province),
            country: normalize_part(country),
        }
    }
}

impl fmt::Display for GeocodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}|{}", self.city, self.province, self.country)
    }
}

fn normalize_part(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed == MISSING {
        String::new()
    } else {
        trimmed.to_lowercase()
    }
}

/// Canonical geocode for one location key
#[derive(Debug, Clone, PartialEq)]
pub struct GeocodeEntry {
    pub latitude: f64,
    pub longitude: f64,
    pub geo_resolution: GeoResolution,
    pub derived: DerivedGeocode,
}

/// Immutable lookup table, loaded once per run
#[derive(Debug, Clone, Default)]
pub struct GeocodeTable {
    entries: HashMap<GeocodeKey, GeocodeEntry>,
}

impl GeocodeTable {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (GeocodeKey, GeocodeEntry)>,
    {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Load the tab-delimited lookup file
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PipelineError::Config(format!("Failed to open geocode table '{}': {}", path.display(), e))
        })?;
        let table = Table::from_reader(file, b'\t')?;
        let geocodes = Self::from_table(&table)?;
        info!(path = %path.display(), entries = geocodes.len(), "Loaded geocode table");
        Ok(geocodes)
    }

    pub fn from_table(table: &Table) -> Result<Self> {
        let source = "geocode table";
        let key_idx: Vec<usize> = KEY_COLUMNS
            .iter()
            .map(|c| table.require_column(source, c))
            .collect::<Result<_>>()?;
        let lat_idx = table.require_column(source, "latitude")?;
        let lon_idx = table.require_column(source, "longitude")?;
        let res_idx = table.require_column(source, "geo_resolution")?;
        let optional = |name: &str| table.column_index(name);
        let (loc, a1, a2, a3, aid, cn) = (
            optional("location"),
            optional("admin1"),
            optional("admin2"),
            optional("admin3"),
            optional("admin_id"),
            optional("country_new"),
        );
        let mut entries = HashMap::with_capacity(table.len());
        for (n, row) in table.rows.iter().enumerate() {
            // header is line 1
            let line = n + 2;
            let latitude = parse_coordinate(&row[lat_idx]).ok_or_else(|| PipelineError::GeocodeTable {
                line,
                message: format!("latitude '{}' is not a number", row[lat_idx]),
            })?;
            let longitude = parse_coordinate(&row[lon_idx]).ok_or_else(|| PipelineError::GeocodeTable {
                line,
                message: format!("longitude '{}' is not a number", row[lon_idx]),
            })?;
            let key = GeocodeKey::new(&row[key_idx[0]], &row[key_idx[1]], &row[key_idx[2]]);
            let entry = GeocodeEntry {
                latitude,
                longitude,
                geo_resolution: GeoResolution::parse(&row[res_idx]),
                derived: DerivedGeocode {
                    location: text(row, loc),
                    admin1: text(row, a1),
                    admin2: text(row, a2),
                    admin3: text(row, a3),
                    admin_id: text(row, aid),
                    country_new: text(row, cn),
                },
            };
            // duplicate keys: first entry wins
            entries.entry(key).or_insert(entry);
        }
        Ok(Self { entries })
    }

    pub fn get(&self, key: &GeocodeKey) -> Option<&GeocodeEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn text(row: &[String], idx: Option<usize>) -> String {
    idx.map(|i| row[i].trim().to_string()).unwrap_or_default()
}
