//! Application context shared by the refresh loop and chat handlers.

use crate::channels::traits::{
    ChannelAdapter, ChannelInboundMessage, ChannelOutboundMessage, OutboundBody,
};
use crate::chart::{ChartRenderer, PngChartRenderer};
use crate::command::{Command, HELP_TEXT};
use crate::config::BotConfig;
use crate::dataset::{DatasetHandle, DatasetLoader};
use crate::error::{BotError, Result};
use crate::notify::PushNotifier;
use crate::query::{QueryEngine, TimeSeries};
use crate::refresh::{ChangeDetector, RefreshOutcome, RefreshPipeline, RetryPolicy, SourceClient};
use crate::scheduler::clock::Clock;
use std::sync::Arc;
use tracing::{info, warn};

const COUNTRY_TITLE: &str = "Netherlands";

/// Response to a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Text(String),
    Markdown(String),
    Image {
        file_name: String,
        bytes: Vec<u8>,
        caption: Option<String>,
    },
}

impl Reply {
    pub fn into_outbound(self, reply_target: impl Into<String>) -> ChannelOutboundMessage {
        let body = match self {
            Self::Text(text) => OutboundBody::Text(text),
            Self::Markdown(text) => OutboundBody::Markdown(text),
            Self::Image {
                file_name,
                bytes,
                caption,
            } => OutboundBody::Image {
                file_name,
                bytes,
                caption,
            },
        };
        ChannelOutboundMessage {
            reply_target: reply_target.into(),
            body,
        }
    }
}

/// Everything a handler needs, built once at startup.
pub struct App {
    config: BotConfig,
    handle: Arc<DatasetHandle>,
    query: QueryEngine,
    pipeline: RefreshPipeline,
    notifier: PushNotifier,
    renderer: Arc<dyn ChartRenderer>,
    clock: Arc<dyn Clock>,
}

impl App {
    /// Wire the core from `config`. Nothing is fetched or loaded yet.
    ///
    /// # Errors
    ///
    /// `Config` for an invalid schedule, `Download` if the HTTP client
    /// cannot be built.
    pub fn new(
        config: BotConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn ChannelAdapter>,
    ) -> Result<Self> {
        let tz = config.schedule.tz()?;
        let handle = Arc::new(DatasetHandle::new());

        let detector = ChangeDetector::new(
            SourceClient::new(&config.source)?,
            config.source.strategy,
            config.source.input_file.clone(),
            config.source.staging_file(),
            Arc::clone(&clock),
            tz,
        )
        .with_retry(RetryPolicy::new(
            config.probe.max_attempts,
            config.probe.interval(),
        ));
        let loader = DatasetLoader::new(Arc::clone(&handle))
            .with_output_file(config.source.output_file.clone());
        let pipeline = RefreshPipeline::new(detector, loader, Arc::clone(&clock));

        let query = QueryEngine::new(
            Arc::clone(&handle),
            Arc::clone(&clock),
            tz,
            config.query.max_plots,
        );
        let notifier = PushNotifier::new(
            transport,
            query.clone(),
            config.notify.subscribers.clone(),
            config.query.push_days,
        );

        Ok(Self {
            config,
            handle,
            query,
            pipeline,
            notifier,
            renderer: Arc::new(PngChartRenderer::default()),
            clock,
        })
    }

    /// Replace the default PNG renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &BotConfig {
        &self.config
    }

    pub fn dataset(&self) -> &Arc<DatasetHandle> {
        &self.handle
    }

    pub fn query(&self) -> &QueryEngine {
        &self.query
    }

    pub fn pipeline(&self) -> &RefreshPipeline {
        &self.pipeline
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Refresh, then push the result to subscribers.
    pub async fn refresh_and_notify(&self) -> Result<RefreshOutcome> {
        let result = self.pipeline.refresh().await;
        match &result {
            Ok(outcome) => info!("refresh finished: {outcome:?}"),
            Err(e) => warn!(error = %e, "refresh failed"),
        }
        self.notifier.after_refresh(&result).await;
        result
    }

    /// Answer one inbound chat message.
    pub async fn handle_inbound(&self, message: ChannelInboundMessage) -> ChannelOutboundMessage {
        let command = Command::parse(&message.text);
        info!(
            "{} command from {} in {}: {command:?}",
            message.channel, message.sender, message.reply_target
        );
        self.handle(command).await.into_outbound(message.reply_target)
    }

    /// Run a command against the current dataset.
    pub async fn handle(&self, command: Command) -> Reply {
        match command {
            Command::Help => Reply::Text(HELP_TEXT.to_owned()),
            Command::Unknown(_) => Reply::Text(format!("I did not understand that.\n{HELP_TEXT}")),
            Command::RecentWindow(days) => {
                let query = &self.config.query;
                let days = days
                    .unwrap_or(query.recent_days)
                    .min(query.max_recent_days);
                let window = self.query.recent_window(days);
                Reply::Markdown(format!("```\n{window}```"))
            }
            Command::CountryChart => {
                let series = self.query.country_time_series();
                if series.is_empty() {
                    return Reply::Text("No data has been loaded yet.".to_owned());
                }
                self.chart(series, COUNTRY_TITLE.to_owned()).await
            }
            Command::RegionChart(name) => match self.query.region_time_series(&name) {
                Ok(series) => self.chart(series, name).await,
                Err(BotError::RegionNotSpecified) => Reply::Text(
                    "Name a municipality, for example: /region Rotterdam".to_owned(),
                ),
                Err(e) => Reply::Text(format!("Cannot build chart data for {name}: {e}")),
            },
        }
    }

    /// Rasterize on the blocking pool.
    async fn chart(&self, series: TimeSeries, title: String) -> Reply {
        let renderer = Arc::clone(&self.renderer);
        let input = series.to_chart_input(title.clone());
        let rendered = tokio::task::spawn_blocking(move || {
            let bytes = renderer.render(&input)?;
            Ok::<_, BotError>((renderer.file_name(), bytes))
        })
        .await
        .map_err(|e| BotError::Render(format!("render task failed: {e}")))
        .and_then(|inner| inner);

        match rendered {
            Ok((file_name, bytes)) => Reply::Image {
                file_name: file_name.to_owned(),
                bytes,
                caption: Some(title),
            },
            Err(e) => {
                warn!("chart for {title} failed: {e}");
                Reply::Text(format!("Cannot render chart for {title}: {e}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use crate::dataset::Dataset;
    use crate::model::RawRecord;
    use crate::notify::tests::RecordingTransport;
    use crate::scheduler::clock::ManualClock;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn app() -> App {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2021, 1, 15, 14, 0, 0).unwrap(),
        ));
        let app = App::new(
            BotConfig::default(),
            clock,
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        let day = |d| NaiveDate::from_ymd_opt(2021, 1, d).unwrap();
        app.dataset().publish(Dataset::from_records(vec![
            RawRecord::new(day(13), 90, 4, 0).with_municipality("Utrecht"),
            RawRecord::new(day(14), 100, 5, 1).with_municipality("Utrecht"),
            RawRecord::new(day(15), 120, 6, 2).with_municipality("Rotterdam"),
        ]));
        app
    }

    #[tokio::test]
    async fn help_and_unknown_reply_with_help_text() {
        let app = app();
        assert_eq!(app.handle(Command::Help).await, Reply::Text(HELP_TEXT.to_owned()));
        let Reply::Text(text) = app.handle(Command::Unknown("hi".to_owned())).await else {
            panic!("expected text");
        };
        assert!(text.ends_with(HELP_TEXT));
    }

    #[tokio::test]
    async fn recent_uses_default_days() {
        let app = app();
        let Reply::Markdown(text) = app.handle(Command::RecentWindow(None)).await else {
            panic!("expected markdown");
        };
        assert!(text.contains("2021-01-13"));
        assert!(text.contains("2021-01-15"));

        let Reply::Markdown(text) = app.handle(Command::RecentWindow(Some(0))).await else {
            panic!("expected markdown");
        };
        assert!(!text.contains("2021-01-14"));
        assert!(text.contains("2021-01-15"));
    }

    #[tokio::test]
    async fn huge_recent_window_is_clamped() {
        let app = app();
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let records = (0..400)
            .map(|i| RawRecord::new(start + chrono::Days::new(i), 1000, 10, 1))
            .collect();
        app.dataset().publish(Dataset::from_records(records));

        let Reply::Markdown(text) = app.handle(Command::RecentWindow(Some(u32::MAX))).await else {
            panic!("expected markdown");
        };
        let max = app.config().query.max_recent_days as usize;
        // Header, fences and at most max + 1 dated rows.
        assert!(text.lines().count() <= max + 4, "{} lines", text.lines().count());
        assert!(text.len() < 4096, "{} chars", text.len());
    }

    #[tokio::test]
    async fn country_chart_is_png() {
        let Reply::Image { bytes, file_name, .. } = app().handle(Command::CountryChart).await
        else {
            panic!("expected image");
        };
        assert_eq!(file_name, "chart.png");
        assert_eq!(&bytes[..4], b"\x89PNG");
    }

    #[tokio::test]
    async fn region_errors_become_text() {
        let app = app();
        let Reply::Text(text) = app.handle(Command::RegionChart(String::new())).await else {
            panic!("expected text");
        };
        assert!(text.contains("/region"));

        let Reply::Text(text) = app.handle(Command::RegionChart("Atlantis".to_owned())).await
        else {
            panic!("expected text");
        };
        assert!(text.contains("not found"), "{text}");
    }

    struct BrokenRenderer;

    impl ChartRenderer for BrokenRenderer {
        fn render(&self, _input: &crate::chart::ChartInput) -> Result<Vec<u8>> {
            Err(BotError::Render("out of ink".to_owned()))
        }
    }

    #[tokio::test]
    async fn render_failure_becomes_text() {
        let app = app().with_renderer(Arc::new(BrokenRenderer));
        let Reply::Text(text) = app.handle(Command::CountryChart).await else {
            panic!("expected text");
        };
        assert!(text.contains("Netherlands") && text.contains("out of ink"), "{text}");
    }

    #[tokio::test]
    async fn region_chart_matches_case_insensitively() {
        let reply = app().handle(Command::RegionChart("utrecht".to_owned())).await;
        assert!(matches!(reply, Reply::Image { .. }));
    }

    #[tokio::test]
    async fn inbound_reply_goes_back_to_the_chat() {
        let out = app()
            .handle_inbound(ChannelInboundMessage {
                channel: "telegram".to_owned(),
                sender: "7".to_owned(),
                reply_target: "-5".to_owned(),
                text: "/help@EpiBot".to_owned(),
            })
            .await;
        assert_eq!(out.reply_target, "-5");
        assert_eq!(out.body, OutboundBody::Text(HELP_TEXT.to_owned()));
    }

    #[tokio::test]
    async fn empty_dataset_has_no_country_chart() {
        let app = App::new(
            BotConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(RecordingTransport::default()),
        )
        .unwrap();
        assert!(matches!(app.handle(Command::CountryChart).await, Reply::Text(_)));
    }
}
