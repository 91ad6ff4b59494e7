use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

use crate::constants::{DATE_LABEL_FORMAT, MISSING};

static AGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,3}|\d{1,3}-\d{1,3}|\d{1,3}-|\d{1,2}\.\d{1,2})$").unwrap());
static COORDINATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d{1,3}(\.\d+)?$").unwrap());
static DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{2}\.\d{2}\.\d{4}$").unwrap());
static DATE_OR_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d{2}\.\d{2}\.\d{4}( - \d{2}\.\d{2}\.\d{4})?$").unwrap());
static BINARY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(True|False|0|1)$").unwrap());
static ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^.+$").unwrap());

static LOOSE_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d{1,2})[./-](\d{1,2})[./-](\d{2}|\d{4})$").unwrap());
static INTEGRAL_FLOAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d{1,3})\.0+$").unwrap());

/// Why a cell was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    /// Value does not match the column's acceptance pattern
    PatternMismatch,
    /// Required column is empty or marked missing
    MissingRequired,
    /// Matches the date shape but is not a calendar date
    InvalidDate,
    /// Multiplicity above the per-row expansion limit
    MultiplicityTooLarge,
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReasonCode::PatternMismatch => "pattern_mismatch",
            ReasonCode::MissingRequired => "missing_required",
            ReasonCode::InvalidDate => "invalid_date",
            ReasonCode::MultiplicityTooLarge => "multiplicity_too_large",
        };
        f.write_str(s)
    }
}

/// A single failed cell
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub column: String,
    pub reason: ReasonCode,
    pub value: String,
}

/// Known repair transforms. Each returns `Some` only when it changed the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fix {
    /// Drop trailing punctuation such as `45.` or `30.5,`
    StrayTrailingChars,
    /// `1/2/20`, `1-2-2020` and `1.2.20` become `01.02.2020`
    DateLayout,
    /// `45.0` becomes `45`
    IntegralFloat,
    /// Comma decimal separator in a coordinate
    DecimalComma,
    /// `true`/`TRUE` become `True`
    BinaryCase,
}

impl Fix {
    pub fn apply(&self, value: &str) -> Option<String> {
        let fixed = match self {
            Fix::StrayTrailingChars => value
                .trim_end_matches(|c: char| matches!(c, '.' | ',' | ';' | ':' | '\'' | '"' | '`'))
                .to_string(),
            Fix::DateLayout => fix_date_layout(value)?,
            Fix::IntegralFloat => INTEGRAL_FLOAT.captures(value)?.get(1)?.as_str().to_string(),
            Fix::DecimalComma => value.replacen(',', ".", 1),
            Fix::BinaryCase => match value.to_ascii_lowercase().as_str() {
                "true" => "True".to_string(),
                "false" => "False".to_string(),
                _ => return None,
            },
        };
        (fixed != value).then_some(fixed)
    }
}

fn fix_date_layout(value: &str) -> Option<String> {
    let caps = LOOSE_DATE.captures(value)?;
    let day: u32 = caps.get(1)?.as_str().parse().ok()?;
    let month: u32 = caps.get(2)?.as_str().parse().ok()?;
    let year_raw = caps.get(3)?.as_str();
    let year: i32 = match year_raw.len() {
        2 => 2000 + year_raw.parse::<i32>().ok()?,
        _ => year_raw.parse().ok()?,
    };
    NaiveDate::from_ymd_opt(year, month, day).map(|d| d.format(DATE_LABEL_FORMAT).to_string())
}

/// Acceptance rule for one column
#[derive(Debug, Clone)]
pub struct ColumnRule {
    pub column: String,
    pub pattern: &'static Lazy<Regex>,
    pub required: bool,
    /// Every `DD.MM.YYYY` in the value must be a real calendar date
    pub calendar: bool,
    pub fixes: Vec<Fix>,
}

impl ColumnRule {
    fn new(column: &str, pattern: &'static Lazy<Regex>) -> Self {
        Self {
            column: column.to_string(),
            pattern,
            required: false,
            calendar: false,
            fixes: Vec::new(),
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn calendar(mut self) -> Self {
        self.calendar = true;
        self
    }

    fn fixes(mut self, fixes: &[Fix]) -> Self {
        self.fixes = fixes.to_vec();
        self
    }

    /// Check one cell. Empty and missing values pass unless the column is required.
    pub fn check(&self, value: &str) -> Option<ReasonCode> {
        if value.is_empty() || value == MISSING {
            return self.required.then_some(ReasonCode::MissingRequired);
        }
        if !self.pattern.is_match(value) {
            return Some(ReasonCode::PatternMismatch);
        }
        if self.calendar
            && value
                .split(" - ")
                .any(|part| NaiveDate::parse_from_str(part, DATE_LABEL_FORMAT).is_err())
        {
            return Some(ReasonCode::InvalidDate);
        }
        None
    }

    /// Run the fix chain; `None` when no transform applied
    pub fn repair(&self, value: &str) -> Option<String> {
        let mut current = value.to_string();
        let mut changed = false;
        for fix in &self.fixes {
            if let Some(fixed) = fix.apply(&current) {
                current = fixed;
                changed = true;
            }
        }
        changed.then_some(current)
    }
}

/// The declared acceptance rules of a sheet
#[derive(Debug, Clone)]
pub struct RuleSet {
    pub rules: Vec<ColumnRule>,
}

impl RuleSet {
    pub fn rule_for(&self, column: &str) -> Option<&ColumnRule> {
        self.rules.iter().find(|r| r.column == column)
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        let date_fixes = [Fix::StrayTrailingChars, Fix::DateLayout];
        let mut rules = vec![
            ColumnRule::new("age", &AGE).fixes(&[Fix::StrayTrailingChars, Fix::IntegralFloat]),
            ColumnRule::new("country", &ANY).required(),
            ColumnRule::new("latitude", &COORDINATE)
                .fixes(&[Fix::StrayTrailingChars, Fix::DecimalComma]),
            ColumnRule::new("longitude", &COORDINATE)
                .fixes(&[Fix::StrayTrailingChars, Fix::DecimalComma]),
            ColumnRule::new("date_confirmation", &DATE)
                .calendar()
                .fixes(&date_fixes),
        ];
        for column in [
            "date_onset_symptoms",
            "date_admission_hospital",
            "date_death_or_discharge",
            "travel_history_dates",
        ] {
            rules.push(ColumnRule::new(column, &DATE_OR_RANGE).calendar().fixes(&date_fixes));
        }
        for column in ["chronic_disease_binary", "travel_history_binary"] {
            rules.push(ColumnRule::new(column, &BINARY).fixes(&[Fix::BinaryCase]));
        }
        Self { rules }
    }
}
