//! Read-only queries over the current dataset generation.
//!
//! Every query takes one snapshot at the start and answers entirely from it,
//! so a concurrent publish never mixes rows from two generations.

use crate::chart::ChartInput;
use crate::dataset::DatasetHandle;
use crate::dataset::aggregate::region_key;
use crate::error::{BotError, Result};
use crate::model::{DATE_FORMAT, DailyRow};
use crate::scheduler::clock::Clock;
use chrono::{Days, NaiveDate};
use chrono_tz::Tz;
use std::fmt;
use std::sync::Arc;

/// Ascending dated rows from one dataset generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSeries {
    pub generation: u64,
    pub rows: Vec<DailyRow>,
}

impl TimeSeries {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Chart value object: cases on the primary axis, hospital admissions
    /// and deaths on the secondary axis.
    pub fn to_chart_input(&self, title: impl Into<String>) -> ChartInput {
        let mut input = ChartInput {
            title: title.into(),
            ..ChartInput::default()
        };
        for row in &self.rows {
            input.dates.push(row.date);
            input.cases.push(row.totals.cases as f64);
            input.hospital.push(row.totals.hospital as f64);
            input.deceased.push(row.totals.deceased as f64);
            input.max_primary = input.max_primary.max(row.totals.cases);
            input.max_secondary = input
                .max_secondary
                .max(row.totals.hospital)
                .max(row.totals.deceased);
        }
        input
    }
}

/// Nationwide rows for the trailing window ending today.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecentWindow {
    pub days: u32,
    pub today: NaiveDate,
    pub generation: u64,
    pub rows: Vec<DailyRow>,
}

impl fmt::Display for RecentWindow {
    /// Fixed-width table: date, cases, hospital admissions, deaths.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:<10}  {:>7}  {:>6}  {:>6}", "date", "cases", "hosp", "deaths")?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<10}  {:>7}  {:>6}  {:>6}",
                row.date.format(DATE_FORMAT),
                row.totals.cases,
                row.totals.hospital,
                row.totals.deceased
            )?;
        }
        Ok(())
    }
}

/// Query entry points used by command handlers and the push notifier.
#[derive(Clone)]
pub struct QueryEngine {
    handle: Arc<DatasetHandle>,
    clock: Arc<dyn Clock>,
    tz: Tz,
    max_plots: usize,
}

impl QueryEngine {
    pub fn new(handle: Arc<DatasetHandle>, clock: Arc<dyn Clock>, tz: Tz, max_plots: usize) -> Self {
        Self {
            handle,
            clock,
            tz,
            max_plots: max_plots.max(1),
        }
    }

    /// Nationwide totals for every date, ascending.
    pub fn country_time_series(&self) -> TimeSeries {
        let snapshot = self.handle.snapshot();
        TimeSeries {
            generation: snapshot.generation(),
            rows: snapshot
                .by_date()
                .iter()
                .map(|(date, totals)| DailyRow {
                    date: *date,
                    totals: *totals,
                })
                .collect(),
        }
    }

    /// Rows of one municipality, matched case-insensitively, ascending by
    /// date and limited to the most recent `max_plots` points.
    ///
    /// # Errors
    ///
    /// [`BotError::RegionNotSpecified`] for a blank name,
    /// [`BotError::RegionNotFound`] when no record matches.
    pub fn region_time_series(&self, name: &str) -> Result<TimeSeries> {
        let name = name.trim();
        if name.is_empty() {
            return Err(BotError::RegionNotSpecified);
        }
        let wanted = region_key(Some(name));

        let snapshot = self.handle.snapshot();
        let mut rows: Vec<DailyRow> = snapshot
            .records()
            .iter()
            .filter(|r| r.municipality.is_some() && region_key(r.municipality.as_deref()) == wanted)
            .map(|r| DailyRow {
                date: r.date,
                totals: r.totals(),
            })
            .collect();
        if rows.is_empty() {
            return Err(BotError::RegionNotFound(name.to_owned()));
        }

        rows.sort_by_key(|row| row.date);
        if rows.len() > self.max_plots {
            rows.drain(..rows.len() - self.max_plots);
        }
        Ok(TimeSeries {
            generation: snapshot.generation(),
            rows,
        })
    }

    /// Nationwide rows dated within `days` days before today (inclusive)
    /// up to today, in the configured time zone.
    pub fn recent_window(&self, days: u32) -> RecentWindow {
        let today = self.clock.now().with_timezone(&self.tz).date_naive();
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);

        let snapshot = self.handle.snapshot();
        RecentWindow {
            days,
            today,
            generation: snapshot.generation(),
            rows: snapshot
                .by_date()
                .range(start..=today)
                .map(|(date, totals)| DailyRow {
                    date: *date,
                    totals: *totals,
                })
                .collect(),
        }
    }
}
