//! Source records and aggregate value types.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Calendar date format used by the source feed and all output.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// One decoded observation row from the source feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(rename = "Date_of_publication", with = "calendar_date")]
    pub date: NaiveDate,
    #[serde(rename = "Municipality_code", default)]
    pub municipality_code: Option<String>,
    #[serde(rename = "Municipality_name", default)]
    pub municipality: Option<String>,
    #[serde(rename = "Province", default)]
    pub province: Option<String>,
    #[serde(rename = "Security_region_name", default)]
    pub health_region: Option<String>,
    #[serde(rename = "Total_reported", default)]
    pub total_reported: i64,
    #[serde(rename = "Hospital_admission", default)]
    pub hospital_admission: i64,
    #[serde(rename = "Deceased", default)]
    pub deceased: i64,
}

impl RawRecord {
    /// Record with counters only, no region fields.
    pub fn new(date: NaiveDate, total_reported: i64, hospital_admission: i64, deceased: i64) -> Self {
        Self {
            date,
            municipality_code: None,
            municipality: None,
            province: None,
            health_region: None,
            total_reported,
            hospital_admission,
            deceased,
        }
    }

    pub fn with_municipality(mut self, name: impl Into<String>) -> Self {
        self.municipality = Some(name.into());
        self
    }

    pub fn totals(&self) -> Totals {
        Totals {
            cases: self.total_reported,
            hospital: self.hospital_admission,
            deceased: self.deceased,
        }
    }
}

/// Summed counters for one aggregate bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub cases: i64,
    pub hospital: i64,
    pub deceased: i64,
}

impl Totals {
    pub fn new(cases: i64, hospital: i64, deceased: i64) -> Self {
        Self {
            cases,
            hospital,
            deceased,
        }
    }

    /// Accumulate another bucket, saturating on overflow.
    pub fn add(&mut self, other: Totals) {
        self.cases = self.cases.saturating_add(other.cases);
        self.hospital = self.hospital.saturating_add(other.hospital);
        self.deceased = self.deceased.saturating_add(other.deceased);
    }
}

/// A dated point of a time series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyRow {
    pub date: NaiveDate,
    pub totals: Totals,
}

/// Strict `YYYY-MM-DD` (de)serialization for [`NaiveDate`].
pub mod calendar_date {
    use super::DATE_FORMAT;
    use chrono::NaiveDate;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&date.format(DATE_FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse a date that must be exactly `YYYY-MM-DD`.
    pub fn parse(s: &str) -> Result<NaiveDate, String> {
        let bytes = s.as_bytes();
        let shaped = bytes.len() == 10
            && bytes[4] == b'-'
            && bytes[7] == b'-'
            && bytes
                .iter()
                .enumerate()
                .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
        if !shaped {
            return Err(format!("date {s:?} does not match YYYY-MM-DD"));
        }
        NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|e| format!("invalid date {s:?}: {e}"))
    }
}
