use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::DEFAULT_NULL_TOKENS;
use crate::domain::GeoResolution;
use crate::error::{PipelineError, Result};

/// Environment variable overriding `time_series.url`
pub const TIME_SERIES_URL_ENV: &str = "CASE_RECONCILER_TIME_SERIES_URL";

/// Run configuration, loaded from TOML. Each stage receives only the slice it needs.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub files: FilesConfig,
    #[serde(default)]
    pub sheets: Vec<SheetConfig>,
    pub time_series: Option<TimeSeriesConfig>,
    #[serde(default)]
    pub aggregation: AggregationConfig,
    #[serde(default)]
    pub geocoding: GeocodingConfig,
    #[serde(default)]
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FilesConfig {
    pub output_dir: PathBuf,
    pub geocode_tsv: PathBuf,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Local copy of the last fetched time series
    pub time_series_cache: Option<PathBuf>,
    /// Directory that receives a copy of the rendered outputs after a successful run
    pub publish_dir: Option<PathBuf>,
}

/// One line-list sheet export
#[derive(Debug, Clone, Deserialize)]
pub struct SheetConfig {
    pub name: String,
    /// Provenance tag used in record identifiers
    pub tag: String,
    pub path: PathBuf,
    #[serde(default)]
    pub exclude_countries: Vec<String>,
    #[serde(default = "default_null_tokens")]
    pub null_tokens: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeriesConfig {
    #[serde(default = "default_time_series_tag")]
    pub tag: String,
    pub url: Option<String>,
    pub path: Option<PathBuf>,
    #[serde(default)]
    pub columns: TimeSeriesColumns,
    #[serde(default = "default_country")]
    pub country: String,
    #[serde(default = "default_time_series_resolution")]
    pub geo_resolution: GeoResolution,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeSeriesColumns {
    pub latitude: String,
    pub longitude: String,
    pub city: String,
    pub province: String,
}

impl Default for TimeSeriesColumns {
    fn default() -> Self {
        Self {
            latitude: "Lat".to_string(),
            longitude: "Long_".to_string(),
            city: "Admin2".to_string(),
            province: "Province_State".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Decimal places kept when grouping coordinates
    #[serde(default = "default_precision")]
    pub precision: u32,
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            precision: default_precision(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeocodingConfig {
    #[serde(default = "default_top_misses")]
    pub top_misses: usize,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            top_misses: default_top_misses(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TransportConfig {
    /// Extra attempts for a failed fetch; 0 aborts on the first failure
    #[serde(default)]
    pub retries: u32,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_null_tokens() -> Vec<String> {
    DEFAULT_NULL_TOKENS.iter().map(|s| s.to_string()).collect()
}

fn default_time_series_tag() -> String {
    "JHU".to_string()
}

fn default_country() -> String {
    "United States".to_string()
}

fn default_time_series_resolution() -> GeoResolution {
    GeoResolution::Admin2
}

fn default_precision() -> u32 {
    4
}

fn default_top_misses() -> usize {
    10
}

impl Config {
    /// Load and validate a config file, applying environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        if let Ok(url) = std::env::var(TIME_SERIES_URL_ENV) {
            if let Some(ts) = config.time_series.as_mut() {
                ts.url = Some(url);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reject configurations that would break identifier provenance or grouping
    pub fn validate(&self) -> Result<()> {
        let mut tags = HashSet::new();
        let sheet_tags = self.sheets.iter().map(|s| (s.name.as_str(), s.tag.as_str()));
        let ts_tag = self.time_series.iter().map(|t| ("time_series", t.tag.as_str()));
        for (owner, tag) in sheet_tags.chain(ts_tag) {
            if tag.trim().is_empty() {
                return Err(PipelineError::Config(format!("Source '{}' has an empty tag", owner)));
            }
            if !tags.insert(tag) {
                return Err(PipelineError::Config(format!(
                    "Tag '{}' is used by more than one source",
                    tag
                )));
            }
        }

        let mut names = HashSet::new();
        for sheet in &self.sheets {
            if !names.insert(sheet.name.as_str()) {
                return Err(PipelineError::Config(format!("Duplicate sheet name '{}'", sheet.name)));
            }
        }

        if let Some(ts) = &self.time_series {
            if ts.url.is_none() && ts.path.is_none() {
                return Err(PipelineError::Config(
                    "time_series needs either a url or a path".to_string(),
                ));
            }
        }

        if self.aggregation.precision > 10 {
            return Err(PipelineError::Config(format!(
                "aggregation.precision {} is above the supported maximum of 10",
                self.aggregation.precision
            )));
        }

        if self.sheets.is_empty() && self.time_series.is_none() {
            return Err(PipelineError::Config("No sources configured".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[files]
output_dir = "out"
geocode_tsv = "geo.tsv"

[[sheets]]
name = "outside_Hubei"
tag = "000-1"
path = "outside.csv"
exclude_countries = ["United States"]

[[sheets]]
name = "Hubei"
tag = "000-2"
path = "hubei.csv"

[time_series]
path = "ts.csv"
"#;

    #[test]
    fn parses_sample_with_defaults() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.sheets.len(), 2);
        assert_eq!(config.sheets[1].null_tokens, default_null_tokens());
        let ts = config.time_series.as_ref().unwrap();
        assert_eq!(ts.tag, "JHU");
        assert_eq!(ts.columns.longitude, "Long_");
        assert_eq!(ts.geo_resolution, GeoResolution::Admin2);
        assert_eq!(config.aggregation.precision, 4);
        assert_eq!(config.transport.retries, 0);
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.sheets[1].tag = "000-1".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("000-1"));
    }

    #[test]
    fn precision_is_bounded() {
        let mut config = Config::from_toml_str(SAMPLE).unwrap();
        config.aggregation.precision = 11;
        assert!(config.validate().is_err());
    }
}
