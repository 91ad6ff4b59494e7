use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::app::ports::{SheetSourcePort, TimeSeriesSourcePort};
use crate::config::SheetConfig;
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::Table;

async fn read_source(source_name: &str, path: &Path) -> Result<Vec<u8>> {
    tokio::fs::read(path).await.map_err(|e| {
        PipelineError::transport(source_name, format!("cannot read '{}': {}", path.display(), e))
    })
}

/// Reads sheet exports from local CSV files
pub struct CsvSheetSource;

#[async_trait]
impl SheetSourcePort for CsvSheetSource {
    async fn fetch_sheet(&self, sheet: &SheetConfig) -> Result<Table> {
        let bytes = read_source(&sheet.name, &sheet.path).await?;
        let table = Table::from_csv_bytes(&bytes)?;
        info!(sheet = %sheet.name, path = %sheet.path.display(), rows = table.len(), "Loaded sheet");
        Ok(table)
    }
}

/// Reads the time series from a local CSV file
pub struct FileTimeSeriesSource {
    tag: String,
    path: PathBuf,
}

impl FileTimeSeriesSource {
    pub fn new(tag: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl TimeSeriesSourcePort for FileTimeSeriesSource {
    async fn fetch_time_series(&self) -> Result<Table> {
        let bytes = read_source(&self.tag, &self.path).await?;
        let table = Table::from_csv_bytes(&bytes)?;
        info!(path = %self.path.display(), locations = table.len(), "Loaded time series");
        Ok(table)
    }
}

/// Downloads the time series over HTTP and keeps the last body in a cache file
pub struct HttpTimeSeriesSource {
    tag: String,
    url: String,
    cache: Option<PathBuf>,
    client: reqwest::Client,
}

impl HttpTimeSeriesSource {
    pub fn new(tag: impl Into<String>, url: impl Into<String>, cache: Option<PathBuf>) -> Self {
        Self {
            tag: tag.into(),
            url: url.into(),
            cache,
            client: reqwest::Client::new(),
        }
    }

    async fn write_cache(&self, bytes: &[u8]) {
        let Some(path) = &self.cache else {
            return;
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!("Failed to create cache directory {}: {}", dir.display(), e);
                return;
            }
        }
        match tokio::fs::write(path, bytes).await {
            Ok(()) => debug!("Cached time series to {}", path.display()),
            Err(e) => warn!("Failed to cache time series to {}: {}", path.display(), e),
        }
    }
}

#[async_trait]
impl TimeSeriesSourcePort for HttpTimeSeriesSource {
    async fn fetch_time_series(&self) -> Result<Table> {
        info!(url = %self.url, "Fetching time series");
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PipelineError::transport(
                &self.tag,
                format!("GET {} returned HTTP {}", self.url, status.as_u16()),
            ));
        }
        let bytes = response.bytes().await?;

        self.write_cache(&bytes).await;
        let table = Table::from_csv_bytes(&bytes)?;
        info!(locations = table.len(), bytes = bytes.len(), "Fetched time series");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FatalKind;
    use tempfile::tempdir;

    fn sheet(path: PathBuf) -> SheetConfig {
        SheetConfig {
            name: "outside_Hubei".to_string(),
            tag: "000-1".to_string(),
            path,
            exclude_countries: Vec::new(),
            null_tokens: Vec::new(),
        }
    }

    #[tokio::test]
    async fn reads_sheet_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sheet.csv");
        std::fs::write(&path, "row,country\n2,Italy\n3,Spain\n").unwrap();

        let table = CsvSheetSource.fetch_sheet(&sheet(path)).await.unwrap();
        assert_eq!(table.headers, vec!["row", "country"]);
        assert_eq!(table.len(), 2);
    }

    #[tokio::test]
    async fn missing_file_is_a_transport_failure() {
        let dir = tempdir().unwrap();
        let err = CsvSheetSource
            .fetch_sheet(&sheet(dir.path().join("absent.csv")))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), FatalKind::Transport);

        let err = FileTimeSeriesSource::new("JHU", dir.path().join("absent.csv"))
            .fetch_time_series()
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn unreachable_url_is_a_transport_failure() {
        let dir = tempdir().unwrap();
        let cache = dir.path().join("cache/series.csv");
        let source = HttpTimeSeriesSource::new(
            "JHU",
            "http://127.0.0.1:9/series.csv",
            Some(cache.clone()),
        );
        let err = source.fetch_time_series().await.unwrap_err();
        assert_eq!(err.kind(), FatalKind::Transport);
        assert!(!cache.exists());
    }
}
