//! Configuration types for the bot.
//!
//! Loaded from a TOML file (every section falls back to defaults), then
//! overlaid with the `BOT_TOKEN`, `CHAT_IDS` and `DEBUG` environment variables.

use crate::error::{BotError, Result};
use crate::scheduler::timer::FireSchedule;
use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default dataset endpoint (RIVM municipal counts per day).
pub const DEFAULT_SOURCE_URL: &str =
    "https://data.rivm.nl/covid-19/COVID-19_aantallen_gemeente_per_dag.json";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Enables debug logging and transport debug output.
    pub debug: bool,
    /// Remote dataset and local file locations.
    pub source: SourceConfig,
    /// Daily refresh schedule.
    pub schedule: ScheduleConfig,
    /// Freshness probe retry settings.
    pub probe: ProbeConfig,
    /// Query engine limits.
    pub query: QueryConfig,
    /// Push notification recipients.
    pub notify: NotifyConfig,
    /// Telegram transport settings.
    pub telegram: TelegramConfig,
}

/// How the refresh pipeline decides whether the remote file changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStrategy {
    /// Always download, compare the SHA-256 of the body with the last one.
    #[default]
    Hash,
    /// Issue a HEAD first and only download when `Last-Modified` is today.
    Probe,
}

impl std::fmt::Display for ChangeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hash => write!(f, "hash"),
            Self::Probe => write!(f, "probe"),
        }
    }
}

/// Dataset source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// URL of the JSON dataset.
    pub url: String,
    /// Canonical input file; the staging file is this path with `.new` appended.
    pub input_file: PathBuf,
    /// Optional normalized JSON copy of the decoded records.
    pub output_file: Option<PathBuf>,
    /// Change detection strategy.
    pub strategy: ChangeStrategy,
    /// HTTP request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SOURCE_URL.to_owned(),
            input_file: PathBuf::from("input.json"),
            output_file: Some(PathBuf::from("output.json")),
            strategy: ChangeStrategy::default(),
            timeout_secs: 300,
        }
    }
}

impl SourceConfig {
    /// Path the download is staged at before promotion.
    pub fn staging_file(&self) -> PathBuf {
        let mut name = self.input_file.as_os_str().to_owned();
        name.push(".new");
        PathBuf::from(name)
    }
}

/// Refresh schedule settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// Local wall-clock fire time, `HH:MM`.
    pub refresh_time: String,
    /// IANA time zone name the fire time and "today" are evaluated in.
    pub timezone: String,
    /// Days between fires.
    pub every_days: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_time: "15:15".to_owned(),
            timezone: "Europe/Amsterdam".to_owned(),
            every_days: 1,
        }
    }
}

impl ScheduleConfig {
    /// Parse the configured time zone.
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse()
            .map_err(|_| BotError::Config(format!("unknown time zone: {}", self.timezone)))
    }

    /// Build the timer schedule from `refresh_time`, `timezone` and `every_days`.
    pub fn fire_schedule(&self) -> Result<FireSchedule> {
        let at = NaiveTime::parse_from_str(self.refresh_time.trim(), "%H:%M").map_err(|e| {
            BotError::Config(format!("invalid refresh_time {}: {e}", self.refresh_time))
        })?;
        if self.every_days == 0 {
            return Err(BotError::Config("every_days must be at least 1".to_owned()));
        }
        Ok(FireSchedule::new(at, self.tz()?).every_days(self.every_days))
    }
}

/// Retry settings for the freshness probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Seconds between probe attempts.
    pub interval_secs: u64,
    /// Probes per refresh cycle before giving up.
    pub max_attempts: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            max_attempts: 30,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Query engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// Maximum number of points in a region chart (most recent kept).
    pub max_plots: usize,
    /// Default window for the recent-data command.
    pub recent_days: u32,
    /// Upper bound on a requested window, keeping the reply within one
    /// chat message.
    pub max_recent_days: u32,
    /// Window included in the push summary after a refresh.
    pub push_days: u32,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_plots: 365,
            recent_days: 10,
            max_recent_days: 60,
            push_days: 1,
        }
    }
}

/// Push notification settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Chat destinations that receive the summary after every refresh.
    pub subscribers: Vec<String>,
}

/// Telegram Bot API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token issued by BotFather.
    pub bot_token: String,
    /// API base URL, overridable for tests.
    pub api_base: String,
    /// Chats allowed to talk to the bot. Empty allows every chat.
    pub allowed_chat_ids: Vec<String>,
    /// Long-poll timeout for `getUpdates`.
    pub poll_timeout_secs: u64,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: "https://api.telegram.org".to_owned(),
            allowed_chat_ids: Vec::new(),
            poll_timeout_secs: 60,
        }
    }
}

impl BotConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| BotError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BotError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/epibot/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config).join("epibot").join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("epibot")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/epibot-config/config.toml")
        }
    }

    /// Overlay values from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary variable lookup.
    ///
    /// `CHAT_IDS` replaces the subscriber list; blank entries are skipped.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(token) = lookup("BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
            self.telegram.bot_token = token.trim().to_owned();
        }
        if let Some(ids) = lookup("CHAT_IDS") {
            self.notify.subscribers = ids
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_owned)
                .collect();
        }
        if let Some(debug) = lookup("DEBUG") {
            self.debug = debug.trim().eq_ignore_ascii_case("true");
        }
    }

    /// Check the settings the bot cannot start without.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Config`] describing every problem found.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.telegram.bot_token.trim().is_empty() {
            problems.push("missing bot token (BOT_TOKEN)".to_owned());
        }
        if self.source.url.trim().is_empty() {
            problems.push("missing source url".to_owned());
        }
        if let Err(e) = self.schedule.fire_schedule() {
            problems.push(e.to_string());
        }
        if self.probe.max_attempts == 0 {
            problems.push("probe.max_attempts must be at least 1".to_owned());
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(BotError::Config(problems.join("; ")))
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_sane() {
        let config = BotConfig::default();
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.source.strategy, ChangeStrategy::Hash);
        assert_eq!(config.schedule.refresh_time, "15:15");
        assert_eq!(config.probe.max_attempts, 30);
        assert!(config.query.max_plots > 0);
        assert!(config.query.recent_days <= config.query.max_recent_days);
        assert!(config.notify.subscribers.is_empty());
    }

    #[test]
    fn staging_file_appends_new_suffix() {
        let source = SourceConfig {
            input_file: PathBuf::from("/data/input.json"),
            ..Default::default()
        };
        assert_eq!(source.staging_file(), PathBuf::from("/data/input.json.new"));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = BotConfig::default();
        config.source.strategy = ChangeStrategy::Probe;
        config.schedule.refresh_time = "07:30".to_owned();
        config.notify.subscribers = vec!["-100123".to_owned()];

        config.save_to_file(&path).unwrap();
        let loaded = BotConfig::from_file(&path).unwrap();
        assert_eq!(loaded.source.strategy, ChangeStrategy::Probe);
        assert_eq!(loaded.schedule.refresh_time, "07:30");
        assert_eq!(loaded.notify.subscribers, vec!["-100123".to_owned()]);
    }

    #[test]
    fn partial_toml_uses_defaults() {
        let config: BotConfig = toml::from_str(
            r#"
            [source]
            strategy = "probe"
            "#,
        )
        .unwrap();
        assert_eq!(config.source.strategy, ChangeStrategy::Probe);
        assert_eq!(config.source.url, DEFAULT_SOURCE_URL);
        assert_eq!(config.probe.interval_secs, 30);
    }

    #[test]
    fn from_file_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "this is not valid toml {{{").unwrap();
        assert!(matches!(BotConfig::from_file(&path), Err(BotError::Config(_))));
    }

    #[test]
    fn env_overrides_token_subscribers_and_debug() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("BOT_TOKEN", " 123:abc "),
            ("CHAT_IDS", "111, -222,,333"),
            ("DEBUG", "TRUE"),
        ]);
        let mut config = BotConfig::default();
        config.apply_env_from(|k| env.get(k).map(|v| (*v).to_owned()));

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.notify.subscribers, vec!["111", "-222", "333"]);
        assert!(config.debug);
    }

    #[test]
    fn validate_reports_missing_token_and_bad_time() {
        let mut config = BotConfig::default();
        config.schedule.refresh_time = "25:99".to_owned();
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("BOT_TOKEN"));
        assert!(err.contains("refresh_time"));
    }

    #[test]
    fn validate_rejects_unknown_timezone() {
        let mut config = BotConfig::default();
        config.telegram.bot_token = "t".to_owned();
        config.schedule.timezone = "Mars/Olympus".to_owned();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_accepts_complete_config() {
        let mut config = BotConfig::default();
        config.telegram.bot_token = "t".to_owned();
        assert!(config.validate().is_ok());
    }
}
