//! Injectable time source.
//!
//! Everything that reads "now" or sleeps in the refresh path goes through a
//! [`Clock`], so the timer and the probe retry loop can be driven by a
//! [`ManualClock`] in tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::sync::watch;

/// Source of wall-clock time and sleeping.
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Resolve once `now() >= deadline`.
    async fn sleep_until(&self, deadline: DateTime<Utc>);

    /// Sleep for a relative duration.
    async fn sleep(&self, duration: Duration) {
        let delta = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let deadline = self.now().checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.sleep_until(deadline).await;
    }
}

/// Real time, backed by `tokio::time`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(remaining).await;
    }
}

/// Test clock that only moves when told to.
///
/// In manual mode `sleep_until` parks until [`ManualClock::advance`] or
/// [`ManualClock::set`] moves time past the deadline. In auto-advance mode
/// every sleep jumps time forward to its deadline immediately.
#[derive(Debug)]
pub struct ManualClock {
    now: watch::Sender<DateTime<Utc>>,
    auto_advance: bool,
}

impl ManualClock {
    /// Clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self {
            now,
            auto_advance: false,
        }
    }

    /// Clock whose sleeps complete instantly by moving time forward.
    pub fn auto_advancing(start: DateTime<Utc>) -> Self {
        Self {
            auto_advance: true,
            ..Self::new(start)
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::Duration::from_std(by).unwrap_or(chrono::Duration::MAX);
        self.now.send_modify(|now| {
            *now = now.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC);
        });
    }

    /// Jump to an absolute instant (never backwards).
    pub fn set(&self, instant: DateTime<Utc>) {
        self.now.send_modify(|now| {
            if instant > *now {
                *now = instant;
            }
        });
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        if self.auto_advance {
            self.set(deadline);
            tokio::task::yield_now().await;
            return;
        }
        let mut rx = self.now.subscribe();
        // The sender lives as long as `self`, so the wait cannot fail.
        let _ = rx.wait_for(|now| *now >= deadline).await;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 1, 1, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn auto_advancing_sleep_moves_time() {
        let clock = ManualClock::auto_advancing(start());
        clock.sleep(Duration::from_secs(30)).await;
        assert_eq!(clock.now(), start() + chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn manual_sleep_waits_for_advance() {
        let clock = Arc::new(ManualClock::new(start()));
        let sleeper = {
            let clock = Arc::clone(&clock);
            tokio::spawn(async move { clock.sleep(Duration::from_secs(60)).await })
        };

        tokio::task::yield_now().await;
        clock.advance(Duration::from_secs(59));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::from_secs(1));
        tokio::time::timeout(Duration::from_secs(5), sleeper)
            .await
            .expect("sleeper woke")
            .unwrap();
    }

    #[test]
    fn set_never_moves_backwards() {
        let clock = ManualClock::new(start());
        clock.set(start() - chrono::Duration::hours(1));
        assert_eq!(clock.now(), start());
    }
}
