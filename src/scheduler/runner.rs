//! Refresh loop.
//!
//! Spawns a tokio task that waits on the [`RecurringTimer`] and runs a
//! refresh plus push notification for every fire, until cancelled. A refresh
//! that is running when the token fires is finished, not dropped, so no
//! staging file is left half written.

use crate::app::App;
use crate::scheduler::timer::{FireSchedule, RecurringTimer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Background loop that refreshes the dataset on schedule.
pub struct RefreshRunner {
    app: Arc<App>,
    schedule: FireSchedule,
    cancel: CancellationToken,
}

impl RefreshRunner {
    pub fn new(app: Arc<App>, schedule: FireSchedule, cancel: CancellationToken) -> Self {
        Self {
            app,
            schedule,
            cancel,
        }
    }

    /// Start the loop. The returned task ends after cancellation.
    pub fn run(self) -> tokio::task::JoinHandle<()> {
        let mut timer = RecurringTimer::spawn(
            self.schedule,
            Arc::clone(self.app.clock()),
            self.cancel.clone(),
        );

        tokio::spawn(async move {
            info!("refresh runner started, {}", self.schedule);
            while let Some(fire) = timer.next().await {
                debug!("refresh scheduled for {} starting", fire.scheduled_at);
                // Outcome and errors are logged and pushed inside.
                let _ = self.app.refresh_and_notify().await;
                if self.cancel.is_cancelled() {
                    info!("shutdown requested, refresh runner finishing");
                    break;
                }
            }

            let coalesced = timer.coalesced();
            if coalesced > 0 {
                warn!("{coalesced} timer fires were coalesced while a refresh was running");
            }
            timer.shutdown().await;
            info!("refresh runner stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::channels::traits::OutboundBody;
    use crate::config::BotConfig;
    use crate::notify::tests::RecordingTransport;
    use crate::scheduler::clock::ManualClock;
    use chrono::{NaiveTime, TimeZone, Utc};
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn schedule() -> FireSchedule {
        FireSchedule::new(
            NaiveTime::from_hms_opt(15, 15, 0).unwrap(),
            chrono_tz::Europe::Amsterdam,
        )
    }

    #[tokio::test]
    async fn fire_runs_refresh_and_pushes_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BotConfig::default();
        // Nothing listens on port 1, so the download fails fast.
        config.source.url = "http://127.0.0.1:1/data.json".to_owned();
        config.source.input_file = dir.path().join("input.json");
        config.source.output_file = None;
        config.notify.subscribers = vec!["42".to_owned()];

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2021, 1, 10, 10, 0, 0).unwrap(),
        ));
        let transport = Arc::new(RecordingTransport::default());
        let app = Arc::new(App::new(config, clock.clone(), transport.clone()).unwrap());
        let cancel = CancellationToken::new();
        let task = RefreshRunner::new(Arc::clone(&app), schedule(), cancel.clone()).run();

        clock.set(Utc.with_ymd_and_hms(2021, 1, 10, 14, 15, 0).unwrap());
        tokio::time::timeout(Duration::from_secs(10), async {
            while transport.sent.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("failure pushed");

        let sent = transport.sent.lock().unwrap().clone();
        assert_eq!(sent[0].reply_target, "42");
        let OutboundBody::Text(text) = &sent[0].body else {
            panic!("expected text, got {:?}", sent[0].body);
        };
        assert!(text.starts_with("error loading new data: download error"), "{text}");
        assert_eq!(app.dataset().generation(), 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner stops")
            .unwrap();
    }

    #[tokio::test]
    async fn shutdown_lets_the_running_refresh_finish() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.json"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(
                        r#"[{"Date_of_publication": "2021-01-10", "Total_reported": 3,
                             "Hospital_admission": 1, "Deceased": 0}]"#,
                    )
                    .set_delay(Duration::from_millis(300)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut config = BotConfig::default();
        config.source.url = format!("{}/data.json", server.uri());
        config.source.input_file = dir.path().join("input.json");
        config.source.output_file = None;
        let staging = config.source.staging_file();

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2021, 1, 10, 10, 0, 0).unwrap(),
        ));
        let app = Arc::new(
            App::new(config, clock.clone(), Arc::new(RecordingTransport::default())).unwrap(),
        );
        let cancel = CancellationToken::new();
        let task = RefreshRunner::new(Arc::clone(&app), schedule(), cancel.clone()).run();

        clock.set(Utc.with_ymd_and_hms(2021, 1, 10, 14, 15, 0).unwrap());
        tokio::time::timeout(Duration::from_secs(10), async {
            while server.received_requests().await.unwrap_or_default().is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("download started");

        // The response is still delayed when the token fires.
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("runner stops")
            .unwrap();

        assert_eq!(app.dataset().generation(), 1);
        assert!(!staging.exists());
    }
}
