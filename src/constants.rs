/// Column and marker constants shared across the pipeline stages.

/// Canonical missing-value marker written in place of source-specific null tokens
pub const MISSING: &str = "NA";

/// Null tokens rewritten to [`MISSING`] when a sheet does not declare its own
pub const DEFAULT_NULL_TOKENS: &[&str] = &["N/A", "n/a", "NaN", "null"];

/// Multiplicity column of the line-list sheets
pub const MULTIPLICITY_COLUMN: &str = "aggregated_num_cases";

/// Largest multiplicity a single sheet row may carry. Larger values are rejected into
/// the error report instead of being expanded.
pub const MAX_MULTIPLICITY: usize = 100_000;

/// Largest magnitude accepted for a cumulative time-series cell. Cells beyond it are
/// treated like unparseable cells and carry the previous value.
pub const MAX_CUMULATIVE_COUNT: i64 = 1_000_000_000;

/// Positional column dropped from clean output
pub const ROW_COLUMN: &str = "row";

/// Sheet-side identifier column; reassigned by the IdAssigner
pub const ID_COLUMN: &str = "ID";

/// Column appended to error reports
pub const REASON_COLUMN: &str = "reason";

/// Sheets above this many rows (before expansion) should be split
pub const SHEET_SPLIT_WARNING_ROWS: usize = 150_000;

/// Canonical label format for confirmation dates (day.month.4-digit-year)
pub const DATE_LABEL_FORMAT: &str = "%d.%m.%Y";

/// Column order of the full per-case dataset. Downstream consumers of
/// `latestdata.csv` depend on this order.
pub const FULL_DATA_COLUMNS: &[&str] = &[
    "ID",
    "age",
    "sex",
    "city",
    "province",
    "country",
    "latitude",
    "longitude",
    "geo_resolution",
    "date_onset_symptoms",
    "date_admission_hospital",
    "date_confirmation",
    "symptoms",
    "lives_in_Wuhan",
    "travel_history_dates",
    "travel_history_location",
    "reported_market_exposure",
    "additional_information",
    "chronic_disease_binary",
    "chronic_disease",
    "source",
    "sequence_available",
    "outcome",
    "date_death_or_discharge",
    "notes_for_discussion",
    "location",
    "admin3",
    "admin2",
    "admin1",
    "country_new",
    "admin_id",
    "data_moderator_initials",
    "travel_history_binary",
];

// Output file names inside the output directory
pub const LATEST_DATA_FILE: &str = "latestdata.csv";
pub const TOTALS_FILE: &str = "totals.json";
pub const GEO_TOTALS_FILE: &str = "totals.geojson";
pub const ANIMATION_FILE: &str = "animation.json";
pub const GEO_ANIMATION_FILE: &str = "animation.geojson";
pub const MANIFEST_FILE: &str = "manifest.json";
pub const ERRORS_DIR: &str = "errors";

/// File name of a sheet's error report
pub fn error_report_file_name(sheet_name: &str) -> String {
    format!("{}.error-report.csv", sheet_name)
}
