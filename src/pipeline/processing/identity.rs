//! Provenance-tagged identifiers, unique across every merged source.

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info};

use crate::domain::CaseRecord;
use crate::error::{PipelineError, Result};

/// Per-source sequence counts issued during a run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IdentityReport {
    pub sources: Vec<(String, usize)>,
    pub total: usize,
}

/// Issues `{tag}-{sequence}` ids and owns the merged dataset.
///
/// Sequences start at 1 for each source and follow the order the source produced its rows.
/// A repeated tag or an id that was already issued aborts the run.
#[derive(Debug, Default)]
pub struct IdAssigner {
    tags: HashSet<String>,
    issued: HashSet<String>,
    merged: Vec<CaseRecord>,
    report: IdentityReport,
}

impl IdAssigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag and append one source's rows
    pub fn assign(&mut self, tag: &str, records: Vec<CaseRecord>) -> Result<()> {
        if tag.is_empty() {
            return Err(PipelineError::Config("source tag must not be empty".to_string()));
        }
        if !self.tags.insert(tag.to_string()) {
            return Err(PipelineError::IdentityCollision(format!(
                "tag '{}' was registered twice",
                tag
            )));
        }

        let count = records.len();
        self.merged.reserve(count);
        self.issued.reserve(count);
        for (seq, mut record) in records.into_iter().enumerate() {
            let id = format!("{}-{}", tag, seq + 1);
            if !self.issued.insert(id.clone()) {
                return Err(PipelineError::IdentityCollision(format!(
                    "id '{}' from tag '{}' was already issued",
                    id, tag
                )));
            }
            record.id = id;
            self.merged.push(record);
        }

        debug!(tag, count, "Assigned identifiers");
        self.report.sources.push((tag.to_string(), count));
        self.report.total += count;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.merged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.merged.is_empty()
    }

    /// Hand over the merged dataset
    pub fn finish(self) -> (Vec<CaseRecord>, IdentityReport) {
        info!(total = self.report.total, sources = self.report.sources.len(), "Merged dataset");
        (self.merged, self.report)
    }
}
