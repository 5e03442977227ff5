//! Daily recurring timer.
//!
//! [`FireSchedule`] computes fire instants for a wall-clock time in a named
//! time zone. [`RecurringTimer`] turns that into a cancellable stream of
//! [`Fire`] signals with at most one pending fire: a fire that finds the
//! slot occupied is dropped and counted as coalesced.

use crate::scheduler::clock::Clock;
use chrono::{DateTime, Days, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Step used to walk out of a DST gap.
const GAP_STEP_MINUTES: i64 = 15;

/// When the timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FireSchedule {
    at: NaiveTime,
    tz: Tz,
    every_days: u32,
}

impl FireSchedule {
    /// Fire once a day at `at` local time in `tz`.
    pub fn new(at: NaiveTime, tz: Tz) -> Self {
        Self {
            at,
            tz,
            every_days: 1,
        }
    }

    /// Fire every `days` days instead of daily (minimum 1).
    pub fn every_days(mut self, days: u32) -> Self {
        self.every_days = days.max(1);
        self
    }

    pub fn tz(&self) -> Tz {
        self.tz
    }

    /// First occurrence strictly after `instant`.
    ///
    /// Returns `None` only when the calendar runs out.
    pub fn next_fire_after(&self, instant: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut date = instant.with_timezone(&self.tz).date_naive();
        // Starting one day back covers zones where the local date is ahead of
        // the fire time's UTC date.
        date = date.checked_sub_days(Days::new(1))?;
        loop {
            let candidate = self.occurrence_on(date)?;
            if candidate > instant {
                return Some(candidate);
            }
            date = date.checked_add_days(Days::new(1))?;
        }
    }

    /// Occurrence `every_days` local days after a previous fire.
    pub fn following(&self, previous: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = previous
            .with_timezone(&self.tz)
            .date_naive()
            .checked_add_days(Days::new(u64::from(self.every_days)))?;
        self.occurrence_on(date)
    }

    /// Resolve the fire time on a local calendar date.
    ///
    /// Ambiguous local times (DST fall-back) resolve to the earlier instant;
    /// local times inside a DST gap move forward to the first valid quarter
    /// hour after the gap.
    pub fn occurrence_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let mut local: NaiveDateTime = date.and_time(self.at);
        for _ in 0..(24 * 60 / GAP_STEP_MINUTES) {
            match self.tz.from_local_datetime(&local) {
                LocalResult::Single(t) => return Some(t.with_timezone(&Utc)),
                LocalResult::Ambiguous(earliest, _) => return Some(earliest.with_timezone(&Utc)),
                LocalResult::None => {
                    local = local.checked_add_signed(chrono::Duration::minutes(GAP_STEP_MINUTES))?;
                }
            }
        }
        None
    }
}

impl std::fmt::Display for FireSchedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.every_days == 1 {
            write!(f, "daily at {} {}", self.at.format("%H:%M"), self.tz)
        } else {
            write!(
                f,
                "every {} days at {} {}",
                self.every_days,
                self.at.format("%H:%M"),
                self.tz
            )
        }
    }
}

/// One timer signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fire {
    /// Instant the fire was scheduled for.
    pub scheduled_at: DateTime<Utc>,
}

/// Cancellable periodic fire stream.
pub struct RecurringTimer {
    fires: mpsc::Receiver<Fire>,
    coalesced: Arc<AtomicU64>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl RecurringTimer {
    /// Start the timer task. It stops when `cancel` is triggered.
    pub fn spawn(schedule: FireSchedule, clock: Arc<dyn Clock>, cancel: CancellationToken) -> Self {
        let (tx, fires) = mpsc::channel(1);
        let coalesced = Arc::new(AtomicU64::new(0));
        // Anchor the first fire to the clock at spawn time, not task start.
        let first = schedule.next_fire_after(clock.now());
        let task = tokio::spawn(run_timer(
            schedule,
            first,
            clock,
            cancel.clone(),
            tx,
            Arc::clone(&coalesced),
        ));
        Self {
            fires,
            coalesced,
            cancel,
            task,
        }
    }

    /// Wait for the next fire. Returns `None` once cancelled.
    pub async fn next(&mut self) -> Option<Fire> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            fire = self.fires.recv() => fire,
        }
    }

    /// Fires dropped because the previous one was still pending.
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    /// Stop the timer and wait for its task to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }
}

async fn run_timer(
    schedule: FireSchedule,
    first: Option<DateTime<Utc>>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    tx: mpsc::Sender<Fire>,
    coalesced: Arc<AtomicU64>,
) {
    let Some(mut next) = first else {
        warn!("timer has no future fire for schedule {schedule}");
        return;
    };
    info!("timer started ({schedule}), first fire at {next}");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = clock.sleep_until(next) => {}
        }

        match tx.try_send(Fire { scheduled_at: next }) {
            Ok(()) => debug!("timer fired for {next}"),
            Err(mpsc::error::TrySendError::Full(_)) => {
                coalesced.fetch_add(1, Ordering::Relaxed);
                debug!("timer fire for {next} coalesced, previous fire still pending");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }

        // Skip occurrences that already passed instead of replaying them.
        let now = clock.now();
        let following = schedule
            .following(next)
            .filter(|t| *t > now)
            .or_else(|| schedule.next_fire_after(now));
        match following {
            Some(t) => next = t,
            None => {
                warn!("timer has no future fire for schedule {schedule}");
                break;
            }
        }
    }
    debug!("timer stopped");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::scheduler::clock::ManualClock;
    use std::time::Duration;

    fn amsterdam_1515() -> FireSchedule {
        FireSchedule::new(
            NaiveTime::from_hms_opt(15, 15, 0).unwrap(),
            chrono_tz::Europe::Amsterdam,
        )
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn fires_later_today_when_before_target() {
        // 10:00 UTC is 11:00 CET.
        let next = amsterdam_1515().next_fire_after(utc(2021, 1, 10, 10, 0)).unwrap();
        assert_eq!(next, utc(2021, 1, 10, 14, 15));
    }

    #[test]
    fn fires_tomorrow_when_started_after_target() {
        let next = amsterdam_1515().next_fire_after(utc(2021, 1, 10, 20, 0)).unwrap();
        assert_eq!(next, utc(2021, 1, 11, 14, 15));
    }

    #[test]
    fn exact_target_instant_is_not_repeated() {
        let next = amsterdam_1515().next_fire_after(utc(2021, 1, 10, 14, 15)).unwrap();
        assert_eq!(next, utc(2021, 1, 11, 14, 15));
    }

    #[test]
    fn wall_clock_time_is_kept_across_dst_switch() {
        let schedule = amsterdam_1515();
        // CET on 27 March, CEST from 28 March 2021.
        let before = schedule.following(utc(2021, 3, 27, 14, 15)).unwrap();
        assert_eq!(before, utc(2021, 3, 28, 13, 15));
        let autumn = schedule.following(utc(2021, 10, 30, 13, 15)).unwrap();
        assert_eq!(autumn, utc(2021, 10, 31, 14, 15));
    }

    #[test]
    fn gap_time_moves_past_the_gap() {
        let schedule = FireSchedule::new(
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            chrono_tz::Europe::Amsterdam,
        );
        let t = schedule
            .occurrence_on(NaiveDate::from_ymd_opt(2021, 3, 28).unwrap())
            .unwrap();
        // 03:00 CEST
        assert_eq!(t, utc(2021, 3, 28, 1, 0));
    }

    #[test]
    fn ambiguous_time_takes_earliest() {
        let schedule = FireSchedule::new(
            NaiveTime::from_hms_opt(2, 30, 0).unwrap(),
            chrono_tz::Europe::Amsterdam,
        );
        let t = schedule
            .occurrence_on(NaiveDate::from_ymd_opt(2021, 10, 31).unwrap())
            .unwrap();
        // 02:30 CEST, the first of the two.
        assert_eq!(t, utc(2021, 10, 31, 0, 30));
    }

    #[test]
    fn every_days_steps_multiple_days() {
        let schedule = amsterdam_1515().every_days(3);
        let next = schedule.following(utc(2021, 1, 10, 14, 15)).unwrap();
        assert_eq!(next, utc(2021, 1, 13, 14, 15));
    }

    #[test]
    fn display_mentions_time_and_zone() {
        assert_eq!(amsterdam_1515().to_string(), "daily at 15:15 Europe/Amsterdam");
    }

    #[tokio::test]
    async fn timer_fires_once_per_day_and_stops_on_cancel() {
        let clock = Arc::new(ManualClock::new(utc(2021, 1, 10, 10, 0)));
        let cancel = CancellationToken::new();
        let mut timer = RecurringTimer::spawn(amsterdam_1515(), clock.clone(), cancel.clone());

        clock.set(utc(2021, 1, 10, 14, 15));
        let first = timer.next().await.unwrap();
        assert_eq!(first.scheduled_at, utc(2021, 1, 10, 14, 15));

        clock.set(utc(2021, 1, 11, 14, 15));
        let second = timer.next().await.unwrap();
        assert_eq!(second.scheduled_at, utc(2021, 1, 11, 14, 15));

        cancel.cancel();
        assert!(timer.next().await.is_none());
        timer.shutdown().await;
    }

    #[tokio::test]
    async fn late_clock_skips_missed_occurrences() {
        let clock = Arc::new(ManualClock::new(utc(2021, 1, 10, 10, 0)));
        let cancel = CancellationToken::new();
        let mut timer = RecurringTimer::spawn(amsterdam_1515(), clock.clone(), cancel.clone());

        // Jump five days past the first fire: exactly one fire is emitted.
        clock.set(utc(2021, 1, 15, 16, 0));
        let fire = timer.next().await.unwrap();
        assert_eq!(fire.scheduled_at, utc(2021, 1, 10, 14, 15));

        // The next one lands on the following occurrence after "now".
        clock.set(utc(2021, 1, 16, 14, 15));
        let fire = timer.next().await.unwrap();
        assert_eq!(fire.scheduled_at, utc(2021, 1, 16, 14, 15));
        assert_eq!(timer.coalesced(), 0);

        timer.shutdown().await;
    }

    #[tokio::test]
    async fn slow_consumer_coalesces_to_one_pending_fire() {
        let clock = Arc::new(ManualClock::new(utc(2021, 1, 10, 10, 0)));
        let cancel = CancellationToken::new();
        let mut timer = RecurringTimer::spawn(amsterdam_1515(), clock.clone(), cancel.clone());

        clock.set(utc(2021, 1, 10, 14, 15));
        // Let the first fire land in the slot before the next day arrives.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        clock.set(utc(2021, 1, 11, 14, 15));

        tokio::time::timeout(Duration::from_secs(5), async {
            while timer.coalesced() == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("second fire coalesced");

        let pending = timer.next().await.unwrap();
        assert_eq!(pending.scheduled_at, utc(2021, 1, 10, 14, 15));

        clock.set(utc(2021, 1, 12, 14, 15));
        let next = timer.next().await.unwrap();
        assert_eq!(next.scheduled_at, utc(2021, 1, 12, 14, 15));

        timer.shutdown().await;
    }
}
