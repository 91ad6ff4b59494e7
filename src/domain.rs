//! Domain data shapes shared across the pipeline stages.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

use crate::constants::DATE_LABEL_FORMAT;

/// Normalized sex of a case. Anything outside the closed vocabulary is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    #[default]
    Unknown,
}

impl Sex {
    /// Case-insensitive match against `male`/`m` and `female`/`f`. Never fails.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "male" | "m" => Sex::Male,
            "female" | "f" => Sex::Female,
            _ => Sex::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Administrative precision of a record's coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeoResolution {
    Point,
    Admin0,
    Admin1,
    Admin2,
    Admin3,
    #[default]
    Unresolved,
}

impl GeoResolution {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "point" => GeoResolution::Point,
            "admin0" => GeoResolution::Admin0,
            "admin1" => GeoResolution::Admin1,
            "admin2" => GeoResolution::Admin2,
            "admin3" => GeoResolution::Admin3,
            _ => GeoResolution::Unresolved,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GeoResolution::Point => "point",
            GeoResolution::Admin0 => "admin0",
            GeoResolution::Admin1 => "admin1",
            GeoResolution::Admin2 => "admin2",
            GeoResolution::Admin3 => "admin3",
            GeoResolution::Unresolved => "unresolved",
        }
    }
}

impl fmt::Display for GeoResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Geocode-derived fields, empty until the GeocodeResolver fills them
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DerivedGeocode {
    pub location: String,
    pub admin1: String,
    pub admin2: String,
    pub admin3: String,
    pub admin_id: String,
    pub country_new: String,
}

/// One confirmed case. A record never carries an aggregated count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CaseRecord {
    /// `{source-tag}-{sequence}`, empty until the IdAssigner runs
    pub id: String,
    pub age: String,
    pub sex: Sex,
    pub city: String,
    pub province: String,
    pub country: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Source spelling of the coordinates, written out while it still matches the value
    #[serde(skip)]
    pub latitude_text: String,
    #[serde(skip)]
    pub longitude_text: String,
    pub geo_resolution: GeoResolution,
    pub date_confirmation: Option<NaiveDate>,
    pub source: String,
    pub sequence_available: String,
    pub derived: DerivedGeocode,
    /// Remaining free-text columns (clinical, travel, moderation), opaque to the core
    pub extra: BTreeMap<String, String>,
}

impl CaseRecord {
    /// Build a record from a cleaned sheet row. Columns the core does not model are kept
    /// verbatim in `extra`.
    pub fn from_columns<'a, I>(columns: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut record = CaseRecord::default();
        for (column, value) in columns {
            match column {
                "age" => record.age = value.to_string(),
                "sex" => record.sex = Sex::normalize(value),
                "city" => record.city = value.to_string(),
                "province" => record.province = value.to_string(),
                "country" => record.country = value.to_string(),
                "latitude" => {
                    record.latitude = parse_coordinate(value);
                    record.latitude_text = value.trim().to_string();
                }
                "longitude" => {
                    record.longitude = parse_coordinate(value);
                    record.longitude_text = value.trim().to_string();
                }
                "geo_resolution" => record.geo_resolution = GeoResolution::parse(value),
                "date_confirmation" => record.date_confirmation = parse_date_label(value),
                "source" => record.source = value.to_string(),
                "sequence_available" => record.sequence_available = value.to_string(),
                "location" => record.derived.location = value.to_string(),
                "admin1" => record.derived.admin1 = value.to_string(),
                "admin2" => record.derived.admin2 = value.to_string(),
                "admin3" => record.derived.admin3 = value.to_string(),
                "admin_id" => record.derived.admin_id = value.to_string(),
                "country_new" => record.derived.country_new = value.to_string(),
                _ => {
                    record.extra.insert(column.to_string(), value.to_string());
                }
            }
        }
        record
    }

    /// Value of a full-dataset column, formatted for serialization
    pub fn field(&self, column: &str) -> Cow<'_, str> {
        match column {
            "ID" => Cow::Borrowed(&self.id),
            "age" => Cow::Borrowed(&self.age),
            "sex" => Cow::Borrowed(self.sex.as_str()),
            "city" => Cow::Borrowed(&self.city),
            "province" => Cow::Borrowed(&self.province),
            "country" => Cow::Borrowed(&self.country),
            "latitude" => format_coordinate(self.latitude, &self.latitude_text),
            "longitude" => format_coordinate(self.longitude, &self.longitude_text),
            "geo_resolution" => Cow::Borrowed(self.geo_resolution.as_str()),
            "date_confirmation" => self
                .date_confirmation
                .map(|d| Cow::Owned(format_date_label(d)))
                .unwrap_or(Cow::Borrowed("")),
            "source" => Cow::Borrowed(&self.source),
            "sequence_available" => Cow::Borrowed(&self.sequence_available),
            "location" => Cow::Borrowed(&self.derived.location),
            "admin1" => Cow::Borrowed(&self.derived.admin1),
            "admin2" => Cow::Borrowed(&self.derived.admin2),
            "admin3" => Cow::Borrowed(&self.derived.admin3),
            "admin_id" => Cow::Borrowed(&self.derived.admin_id),
            "country_new" => Cow::Borrowed(&self.derived.country_new),
            other => self
                .extra
                .get(other)
                .map(|v| Cow::Borrowed(v.as_str()))
                .unwrap_or(Cow::Borrowed("")),
        }
    }

    /// Latitude and longitude, when both are known
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        self.latitude.zip(self.longitude)
    }
}

/// One rendered map point: every case sharing the rounded location, date and resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueAggregate {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(with = "date_label")]
    pub date: NaiveDate,
    pub geo_resolution: GeoResolution,
    pub count: u64,
}

pub fn parse_coordinate(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

fn format_coordinate(value: Option<f64>, text: &str) -> Cow<'_, str> {
    match value {
        Some(_) if parse_coordinate(text) == value => Cow::Borrowed(text),
        Some(v) => Cow::Owned(v.to_string()),
        None => Cow::Borrowed(""),
    }
}

/// Parse a `DD.MM.YYYY` label
pub fn parse_date_label(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), DATE_LABEL_FORMAT).ok()
}

pub fn format_date_label(date: NaiveDate) -> String {
    date.format(DATE_LABEL_FORMAT).to_string()
}

/// Serde adapter writing dates as `DD.MM.YYYY` labels
pub mod date_label {
    use chrono::NaiveDate;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_date_label(*date))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_date_label(&raw)
            .ok_or_else(|| de::Error::custom(format!("invalid date label '{}'", raw)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sex_normalization_is_total() {
        for raw in ["M", "male", "Male ", "m"] {
            assert_eq!(Sex::normalize(raw), Sex::Male, "{raw:?}");
        }
        for raw in ["F", " female", "FEMALE"] {
            assert_eq!(Sex::normalize(raw), Sex::Female, "{raw:?}");
        }
        for raw in ["", "NA", "unknown", "man", "4"] {
            assert_eq!(Sex::normalize(raw), Sex::Unknown, "{raw:?}");
        }
    }

    #[test]
    fn record_from_columns_keeps_unmodelled_fields() {
        let record = CaseRecord::from_columns([
            ("city", "Wuhan"),
            ("latitude", "30.6"),
            ("longitude", "not a number"),
            ("date_confirmation", "23.01.2020"),
            ("symptoms", "fever"),
            ("geo_resolution", "Admin2"),
        ]);
        assert_eq!(record.city, "Wuhan");
        assert_eq!(record.latitude, Some(30.6));
        assert_eq!(record.longitude, None);
        assert_eq!(record.date_confirmation, NaiveDate::from_ymd_opt(2020, 1, 23));
        assert_eq!(record.geo_resolution, GeoResolution::Admin2);
        assert_eq!(record.field("symptoms"), "fever");
        assert_eq!(record.field("outcome"), "");
        assert_eq!(record.field("date_confirmation"), "23.01.2020");
    }

    #[test]
    fn coordinates_keep_their_source_spelling() {
        let mut record = CaseRecord::from_columns([("latitude", " 45.4600 "), ("longitude", "9.1900")]);
        assert_eq!(record.coordinates(), Some((45.46, 9.19)));
        assert_eq!(record.field("latitude"), "45.4600");
        assert_eq!(record.field("longitude"), "9.1900");

        // a replaced value no longer matches the source text
        record.latitude = Some(45.4642);
        assert_eq!(record.field("latitude"), "45.4642");
        record.longitude = None;
        assert_eq!(record.coordinates(), None);
        assert_eq!(record.field("longitude"), "");
    }

    #[test]
    fn aggregate_serializes_date_label() {
        let agg = UniqueAggregate {
            latitude: 30.6,
            longitude: 114.3,
            date: NaiveDate::from_ymd_opt(2020, 2, 3).unwrap(),
            geo_resolution: GeoResolution::Point,
            count: 2,
        };
        let json = serde_json::to_value(&agg).unwrap();
        assert_eq!(json["date"], "03.02.2020");
        assert_eq!(json["geo_resolution"], "point");
        let back: UniqueAggregate = serde_json::from_value(json).unwrap();
        assert_eq!(back, agg);
    }
}
