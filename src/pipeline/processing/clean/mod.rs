//! Line-list sheet cleaning: multiplicity expansion, normalization and validation.
//!
//! Every expanded row ends up in exactly one of the two outputs: the clean records or
//! the sheet's error report.

pub mod rules;

use serde::Serialize;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::config::SheetConfig;
use crate::constants::{
    ID_COLUMN, MAX_MULTIPLICITY, MISSING, MULTIPLICITY_COLUMN, REASON_COLUMN, ROW_COLUMN,
    SHEET_SPLIT_WARNING_ROWS,
};
use crate::domain::{CaseRecord, Sex};
use crate::error::{PipelineError, Result};
use crate::pipeline::ingestion::Table;

pub use rules::{ColumnRule, Fix, ReasonCode, RuleSet, Violation};

/// Cleaning settings for one sheet
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    pub source_name: String,
    pub multiplicity_column: String,
    pub null_tokens: Vec<String>,
    pub exclude_countries: Vec<String>,
    pub rules: RuleSet,
}

impl CleanerConfig {
    pub fn for_sheet(sheet: &SheetConfig) -> Self {
        Self {
            source_name: sheet.name.clone(),
            multiplicity_column: MULTIPLICITY_COLUMN.to_string(),
            null_tokens: sheet.null_tokens.clone(),
            exclude_countries: sheet.exclude_countries.clone(),
            rules: RuleSet::default(),
        }
    }
}

/// Outcome of validating one row
#[derive(Debug, Clone, PartialEq)]
pub enum RowDecision {
    /// Passed on first validation
    Clean,
    /// Failed, repaired in place, then passed
    Corrected,
    /// Still failing after repair, or no repair applied
    Rejected(Vec<Violation>),
}

/// Rows that could not be cleaned, with the original fields and a reason column
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorReport {
    pub source_name: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl ErrorReport {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CleaningReport {
    pub source_name: String,
    pub input_rows: usize,
    pub excluded_rows: usize,
    pub expanded_rows: usize,
    pub corrected_rows: usize,
    pub rejected_rows: usize,
    pub clean_rows: usize,
}

/// Rows after multiplicity expansion, multiplicity column removed
struct Expanded {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Rows whose multiplicity exceeds the limit, kept once with the raw value
    oversized: Vec<(Vec<String>, String)>,
}

#[derive(Debug, Clone)]
pub struct CleanOutput {
    pub records: Vec<CaseRecord>,
    pub errors: ErrorReport,
    pub report: CleaningReport,
}

pub struct RecordCleaner {
    config: CleanerConfig,
}

impl RecordCleaner {
    pub fn new(config: CleanerConfig) -> Self {
        Self { config }
    }

    /// Clean one sheet. Ids are left empty for the IdAssigner.
    pub fn clean(&self, table: &Table) -> Result<CleanOutput> {
        let source = &self.config.source_name;
        let mut report = CleaningReport {
            source_name: source.clone(),
            input_rows: table.len(),
            ..Default::default()
        };

        info!(sheet = %source, rows = table.len(), "Rows before expansion");
        if table.len() > SHEET_SPLIT_WARNING_ROWS {
            warn!(
                sheet = %source,
                "Sheet has more than {} rows, it should be split soon",
                SHEET_SPLIT_WARNING_ROWS
            );
        }

        let kept = self.exclude_countries(table, &mut report);
        let Expanded {
            headers,
            mut rows,
            oversized,
        } = self.expand(table, &kept)?;
        report.expanded_rows = rows.len() + oversized.len();
        info!(sheet = %source, rows = rows.len(), "Rows after expansion");

        let sex_idx = headers.iter().position(|h| h == "sex");
        for row in rows.iter_mut() {
            self.normalize_row(row, sex_idx);
        }

        let mut records = Vec::with_capacity(rows.len());
        let mut errors = ErrorReport {
            source_name: source.clone(),
            headers: headers
                .iter()
                .cloned()
                .chain(std::iter::once(REASON_COLUMN.to_string()))
                .collect(),
            rows: Vec::new(),
        };

        for (mut row, raw) in oversized {
            warn!(
                sheet = %source,
                multiplicity = %raw.trim(),
                limit = MAX_MULTIPLICITY,
                "Row multiplicity above the limit, row rejected"
            );
            self.normalize_row(&mut row, sex_idx);
            row.push(format_reason(&[Violation {
                column: self.config.multiplicity_column.clone(),
                reason: ReasonCode::MultiplicityTooLarge,
                value: raw,
            }]));
            errors.rows.push(row);
        }

        for mut row in rows {
            match self.validate_and_repair(&headers, &mut row) {
                RowDecision::Clean => records.push(to_record(&headers, &row)),
                RowDecision::Corrected => {
                    report.corrected_rows += 1;
                    records.push(to_record(&headers, &row));
                }
                RowDecision::Rejected(violations) => {
                    debug!(sheet = %source, violations = violations.len(), "Row rejected");
                    row.push(format_reason(&violations));
                    errors.rows.push(row);
                }
            }
        }

        report.clean_rows = records.len();
        report.rejected_rows = errors.len();
        if report.corrected_rows > 0 {
            info!(sheet = %source, corrected = report.corrected_rows, "Fixed rows with known repairs");
        }
        info!(
            sheet = %source,
            clean = report.clean_rows,
            rejected = report.rejected_rows,
            "Cleaning finished"
        );

        Ok(CleanOutput { records, errors, report })
    }

    /// Indices of rows that survive the country exclusion list
    fn exclude_countries(&self, table: &Table, report: &mut CleaningReport) -> Vec<usize> {
        let excluded: HashSet<String> = self
            .config
            .exclude_countries
            .iter()
            .map(|c| c.trim().to_lowercase())
            .collect();
        let country_idx = table.column_index("country");

        let kept: Vec<usize> = (0..table.len())
            .filter(|&i| match country_idx {
                Some(idx) if !excluded.is_empty() => {
                    !excluded.contains(&table.rows[i][idx].trim().to_lowercase())
                }
                _ => true,
            })
            .collect();
        report.excluded_rows = table.len() - kept.len();
        kept
    }

    /// One output row per unit of multiplicity, multiplicity column removed.
    /// The buffer is sized up front and filled with one bulk extend per input row.
    fn expand(&self, table: &Table, kept: &[usize]) -> Result<Expanded> {
        let mult_idx = table.column_index(&self.config.multiplicity_column);
        if mult_idx.is_none() {
            warn!(
                sheet = %self.config.source_name,
                column = %self.config.multiplicity_column,
                "Multiplicity column missing; every row counts once"
            );
        }

        let headers: Vec<String> = table
            .headers
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != mult_idx)
            .map(|(_, h)| h.clone())
            .collect();

        let multiplicities: Vec<Option<usize>> = kept
            .iter()
            .map(|&i| mult_idx.map_or(Some(1), |idx| parse_multiplicity(&table.rows[i][idx])))
            .collect();
        let overflow = || {
            PipelineError::expansion(&self.config.source_name, "expanded row count overflows")
        };
        let total = multiplicities
            .iter()
            .flatten()
            .try_fold(0usize, |acc, &n| acc.checked_add(n))
            .ok_or_else(overflow)?;

        let mut rows = Vec::new();
        rows.try_reserve(total).map_err(|_| overflow())?;
        let mut oversized = Vec::new();
        for (&i, n) in kept.iter().zip(&multiplicities) {
            let row: Vec<String> = table.rows[i]
                .iter()
                .enumerate()
                .filter(|(j, _)| Some(*j) != mult_idx)
                .map(|(_, v)| v.clone())
                .collect();
            match (n, mult_idx) {
                (Some(n), _) => rows.extend(std::iter::repeat(row).take(*n)),
                (None, Some(idx)) => oversized.push((row, table.rows[i][idx].clone())),
                (None, None) => rows.push(row),
            }
        }
        Ok(Expanded {
            headers,
            rows,
            oversized,
        })
    }

    fn normalize_row(&self, row: &mut [String], sex_idx: Option<usize>) {
        for (i, cell) in row.iter_mut().enumerate() {
            let trimmed = cell.trim();
            let value = if Some(i) == sex_idx {
                Sex::normalize(trimmed).as_str().to_string()
            } else if self.config.null_tokens.iter().any(|t| t == trimmed) {
                MISSING.to_string()
            } else {
                trimmed.to_string()
            };
            *cell = value;
        }
    }

    fn violations(&self, headers: &[String], row: &[String]) -> Vec<Violation> {
        headers
            .iter()
            .zip(row)
            .filter_map(|(column, value)| {
                let rule = self.config.rules.rule_for(column)?;
                rule.check(value).map(|reason| Violation {
                    column: column.clone(),
                    reason,
                    value: value.clone(),
                })
            })
            .collect()
    }

    /// Validate, repair failing cells with their column's fixes, then validate again
    pub fn validate_and_repair(&self, headers: &[String], row: &mut [String]) -> RowDecision {
        let violations = self.violations(headers, row);
        if violations.is_empty() {
            return RowDecision::Clean;
        }

        let mut repaired_all = true;
        for violation in &violations {
            let Some(idx) = headers.iter().position(|h| *h == violation.column) else {
                continue;
            };
            let repaired = self
                .config
                .rules
                .rule_for(&violation.column)
                .and_then(|rule| rule.repair(&row[idx]));
            match repaired {
                Some(fixed) => row[idx] = fixed,
                None => repaired_all = false,
            }
        }
        if !repaired_all {
            return RowDecision::Rejected(self.violations(headers, row));
        }

        let remaining = self.violations(headers, row);
        if remaining.is_empty() {
            RowDecision::Corrected
        } else {
            RowDecision::Rejected(remaining)
        }
    }
}

/// Non-numeric or missing values count once; so do values below one and fractions.
/// `None` when the value is above [`MAX_MULTIPLICITY`].
pub fn parse_multiplicity(raw: &str) -> Option<usize> {
    let value = match raw.trim().parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v >= 1.0 => v,
        _ => return Some(1),
    };
    if value > MAX_MULTIPLICITY as f64 {
        None
    } else {
        Some(value as usize)
    }
}

fn to_record(headers: &[String], row: &[String]) -> CaseRecord {
    CaseRecord::from_columns(
        headers
            .iter()
            .zip(row)
            .filter(|(h, _)| h.as_str() != ROW_COLUMN && h.as_str() != ID_COLUMN)
            .map(|(h, v)| (h.as_str(), v.as_str())),
    )
}

fn format_reason(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}:{}", v.column, v.reason))
        .collect::<Vec<_>>()
        .join(";")
}
