use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::app::ports::SnapshotOutputPort;
use crate::app::reconcile_use_case::{OutputChecksum, RunManifest, RunMode, Snapshot};
use crate::constants::{
    error_report_file_name, ANIMATION_FILE, ERRORS_DIR, FULL_DATA_COLUMNS, GEO_ANIMATION_FILE,
    GEO_TOTALS_FILE, LATEST_DATA_FILE, MANIFEST_FILE, TOTALS_FILE,
};
use crate::domain::CaseRecord;
use crate::error::Result;
use crate::pipeline::processing::ErrorReport;
use crate::pipeline::render::{self, AggregateDataset};

/// Previous outputs are moved here during promotion
const PARKED_DIR: &str = ".previous";

/// Map payloads copied to the publish directory
const PUBLISHED_FILES: &[&str] = &[TOTALS_FILE, GEO_TOTALS_FILE, ANIMATION_FILE, GEO_ANIMATION_FILE];

/// One file moved into the output directory during promotion
struct Placed {
    name: String,
    /// An older file was parked in its place
    replaced: bool,
}

/// Commits a snapshot to the local filesystem.
///
/// Every file is first written into a staging directory beside the outputs. Only when all
/// of them succeeded are they renamed into place; a failed rename puts the previous files
/// back. Either way the staging directory is removed.
pub struct FsSnapshotOutput {
    output_dir: PathBuf,
    publish_dir: Option<PathBuf>,
}

impl FsSnapshotOutput {
    pub fn new(output_dir: impl Into<PathBuf>, publish_dir: Option<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            publish_dir,
        }
    }

    /// Serialized outputs, keyed by path relative to the output directory
    fn render_outputs(&self, snapshot: &Snapshot) -> Result<Vec<(String, Vec<u8>)>> {
        let mut files = Vec::new();

        let full = full_dataset_csv(&snapshot.records)?;
        let stamped = format!(
            "full-{}.csv",
            snapshot.summary.started_at.format("%Y-%m-%dT%H%M%S")
        );
        files.push((stamped, full.clone()));
        files.push((LATEST_DATA_FILE.to_string(), full));

        for (sheet_name, report) in &snapshot.error_reports {
            files.push((
                format!("{}/{}", ERRORS_DIR, error_report_file_name(sheet_name)),
                error_report_csv(report)?,
            ));
        }

        if snapshot.mode == RunMode::Full {
            let aggregates = &snapshot.aggregates;
            let animation = render::animation(aggregates);
            files.push((
                TOTALS_FILE.to_string(),
                serde_json::to_vec(&AggregateDataset { data: aggregates })?,
            ));
            files.push((
                GEO_TOTALS_FILE.to_string(),
                serde_json::to_vec(&render::geo_aggregates(aggregates))?,
            ));
            files.push((
                GEO_ANIMATION_FILE.to_string(),
                serde_json::to_vec(&render::geo_animation(&animation))?,
            ));
            files.push((ANIMATION_FILE.to_string(), serde_json::to_vec(&animation)?));
        }
        Ok(files)
    }

    async fn stage(&self, staging: &Path, snapshot: &Snapshot) -> Result<(RunManifest, Vec<String>)> {
        tokio::fs::create_dir_all(staging.join(ERRORS_DIR)).await?;

        let mut outputs = Vec::new();
        let mut names = Vec::new();
        for (name, bytes) in self.render_outputs(snapshot)? {
            tokio::fs::write(staging.join(&name), &bytes).await?;
            debug!(file = %name, bytes = bytes.len(), "Staged output");
            outputs.push(OutputChecksum {
                file: name.clone(),
                bytes: bytes.len() as u64,
                sha256: hex::encode(Sha256::digest(&bytes)),
            });
            names.push(name);
        }

        let manifest = RunManifest {
            run_id: snapshot.summary.run_id,
            started_at: snapshot.summary.started_at,
            committed_at: Utc::now(),
            anomalies: snapshot.summary.anomalies(),
            summary: snapshot.summary.clone(),
            outputs,
        };
        tokio::fs::write(
            staging.join(MANIFEST_FILE),
            serde_json::to_vec_pretty(&manifest)?,
        )
        .await?;
        names.push(MANIFEST_FILE.to_string());
        Ok((manifest, names))
    }

    /// Move staged files into the output directory. Files they replace are parked inside the
    /// staging directory; if any move fails, every placed file is removed again and the parked
    /// ones are restored, so the output directory ends as it was before the commit.
    async fn promote(&self, staging: &Path, names: &[String]) -> Result<()> {
        let parked = staging.join(PARKED_DIR);
        tokio::fs::create_dir_all(parked.join(ERRORS_DIR)).await?;
        let errors_dir = self.output_dir.join(ERRORS_DIR);
        let created_errors_dir = !tokio::fs::try_exists(&errors_dir).await?;
        tokio::fs::create_dir_all(&errors_dir).await?;

        let mut placed: Vec<Placed> = Vec::with_capacity(names.len());
        for name in names {
            if let Err(e) = self.place(staging, &parked, name, &mut placed).await {
                warn!(file = %name, "Commit failed, restoring previous outputs: {}", e);
                self.rollback(&parked, &placed).await;
                if created_errors_dir {
                    tokio::fs::remove_dir(&errors_dir).await.ok();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    async fn place(
        &self,
        staging: &Path,
        parked: &Path,
        name: &str,
        placed: &mut Vec<Placed>,
    ) -> Result<()> {
        let target = self.output_dir.join(name);
        let replaced = match tokio::fs::symlink_metadata(&target).await {
            Ok(meta) if meta.is_dir() => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("output path '{}' is a directory", target.display()),
                )
                .into());
            }
            Ok(_) => {
                tokio::fs::rename(&target, parked.join(name)).await?;
                true
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        // recorded before the move so a failed move still restores the parked file
        placed.push(Placed {
            name: name.to_string(),
            replaced,
        });
        tokio::fs::rename(staging.join(name), &target).await?;
        Ok(())
    }

    async fn rollback(&self, parked: &Path, placed: &[Placed]) {
        for entry in placed.iter().rev() {
            let target = self.output_dir.join(&entry.name);
            if let Err(e) = tokio::fs::remove_file(&target).await {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!("Failed to remove {}: {}", target.display(), e);
                }
            }
            if entry.replaced {
                if let Err(e) = tokio::fs::rename(parked.join(&entry.name), &target).await {
                    warn!("Failed to restore {}: {}", target.display(), e);
                }
            }
        }
    }

    async fn publish(&self, publish_dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(publish_dir).await?;
        for name in PUBLISHED_FILES {
            let from = self.output_dir.join(name);
            if tokio::fs::try_exists(&from).await? {
                tokio::fs::copy(&from, publish_dir.join(name)).await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SnapshotOutputPort for FsSnapshotOutput {
    async fn commit(&self, snapshot: &Snapshot) -> Result<RunManifest> {
        let staging = self
            .output_dir
            .join(format!(".staging-{}", snapshot.summary.run_id));

        let staged = self.stage(&staging, snapshot).await;
        let result = match staged {
            Ok((manifest, names)) => self.promote(&staging, &names).await.map(|_| manifest),
            Err(e) => Err(e),
        };
        if let Err(e) = tokio::fs::remove_dir_all(&staging).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove staging directory {}: {}", staging.display(), e);
            }
        }
        let manifest = result?;

        info!(
            output_dir = %self.output_dir.display(),
            files = manifest.outputs.len() + 1,
            "Committed outputs"
        );

        if let Some(publish_dir) = &self.publish_dir {
            match self.publish(publish_dir).await {
                Ok(()) => info!("Published map outputs to {}", publish_dir.display()),
                Err(e) => warn!("Failed to publish outputs to {}: {}", publish_dir.display(), e),
            }
        }
        Ok(manifest)
    }
}

/// Full per-case dataset in the fixed column order
pub fn full_dataset_csv(records: &[CaseRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(FULL_DATA_COLUMNS)?;
    for record in records {
        writer.write_record(FULL_DATA_COLUMNS.iter().map(|c| record.field(c)).map(|v| v.into_owned()))?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}

fn error_report_csv(report: &ErrorReport) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&report.headers)?;
    for row in &report.rows {
        writer.write_record(row)?;
    }
    writer.into_inner().map_err(|e| e.into_error().into())
}
