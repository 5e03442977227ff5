//! Folding raw records into per-date and per-region totals.
//!
//! Both folds are plain sums into ordered maps, so the result does not
//! depend on record order. Only the per-date fold is kept on a dataset; the
//! region fold is computed on demand.

use crate::model::{RawRecord, Totals};
use chrono::NaiveDate;
use std::collections::BTreeMap;

/// Region key used when a record has no municipality.
pub const UNKNOWN_REGION: &str = "(unknown)";

/// Nationwide totals per date.
pub type DateAggregate = BTreeMap<NaiveDate, Totals>;

/// Totals per (lower-cased municipality, date).
pub type RegionAggregate = BTreeMap<(String, NaiveDate), Totals>;

/// Normalized region key for a municipality name.
pub fn region_key(name: Option<&str>) -> String {
    match name.map(str::trim).filter(|n| !n.is_empty()) {
        Some(n) => n.to_lowercase(),
        None => UNKNOWN_REGION.to_owned(),
    }
}

pub fn aggregate_by_date(records: &[RawRecord]) -> DateAggregate {
    let mut out = DateAggregate::new();
    for record in records {
        out.entry(record.date).or_default().add(record.totals());
    }
    out
}

/// Totals per region and date, for callers that need region-scoped sums.
pub fn aggregate_by_region(records: &[RawRecord]) -> RegionAggregate {
    let mut out = RegionAggregate::new();
    for record in records {
        out.entry((region_key(record.municipality.as_deref()), record.date))
            .or_default()
            .add(record.totals());
    }
    out
}
