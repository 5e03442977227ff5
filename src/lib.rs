//! epibot: chat bot for daily epidemiological statistics.
//!
//! A recurring timer downloads the public dataset, detects whether its
//! content changed, and if so decodes and aggregates it into a new immutable
//! [`dataset::Dataset`] generation that replaces the old one atomically.
//! Chat commands query whatever generation is current; subscribers get a
//! short summary after each update.
//!
//! # Architecture
//!
//! - **Scheduler**: injectable clock, daily fire schedule, refresh loop
//! - **Refresh**: change detection (probe or hash), staged download, retry
//! - **Dataset**: decoding, aggregation, generation handle
//! - **Query**: country and region time series, recent window table
//! - **Channels**: transport trait and the Telegram adapter

pub mod app;
pub mod channels;
pub mod chart;
pub mod command;
pub mod config;
pub mod dataset;
pub mod error;
pub mod model;
pub mod notify;
pub mod query;
pub mod refresh;
pub mod scheduler;

pub use app::{App, Reply};
pub use command::Command;
pub use config::BotConfig;
pub use error::{BotError, Result};
pub use query::QueryEngine;
pub use refresh::{RefreshOutcome, RefreshPipeline};
