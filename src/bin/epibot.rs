//! epibot binary: wires the config, refresh loop and Telegram channel.

use clap::{Parser, Subcommand};
use epibot::channels::{self, TelegramAdapter};
use epibot::channels::traits::ChannelAdapter;
use epibot::scheduler::{RefreshRunner, SystemClock};
use epibot::{App, BotConfig};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Chat bot that publishes daily epidemiological statistics and charts.
#[derive(Parser)]
#[command(name = "epibot", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long, env = "EPIBOT_CONFIG")]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Run the bot: scheduled refresh, push notifications and chat commands.
    Run,

    /// Refresh once, print the outcome and exit.
    Refresh,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(BotConfig::default_config_path);

    if let Some(Command::InitConfig { force }) = cli.command {
        if config_path.exists() && !force {
            anyhow::bail!(
                "{} already exists, pass --force to overwrite",
                config_path.display()
            );
        }
        BotConfig::default().save_to_file(&config_path)?;
        println!("wrote {}", config_path.display());
        return Ok(());
    }

    let mut config = if config_path.exists() {
        BotConfig::from_file(&config_path)?
    } else {
        BotConfig::default()
    };
    config.apply_env();

    let default_level = if config.debug { "epibot=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if config_path.exists() {
        info!("loaded config from {}", config_path.display());
    } else {
        info!("no config at {}, using defaults", config_path.display());
    }

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_bot(config).await,
        Command::Refresh => run_refresh(config).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

async fn run_bot(config: BotConfig) -> anyhow::Result<()> {
    config.validate()?;
    println!("epibot v{}", env!("CARGO_PKG_VERSION"));

    let schedule = config.schedule.fire_schedule()?;
    let telegram: Arc<dyn ChannelAdapter> = Arc::new(TelegramAdapter::new(&config.telegram)?);
    let app = Arc::new(App::new(config, Arc::new(SystemClock), Arc::clone(&telegram))?);

    // Serve whatever was downloaded last time until the first refresh lands.
    match app.pipeline().load_existing().await {
        Ok(outcome) => info!("loaded existing input: {outcome:?}"),
        Err(e) => warn!("no usable input file yet: {e}"),
    }
    let initial = Arc::clone(&app);
    tokio::spawn(async move {
        if let Err(e) = initial.refresh_and_notify().await {
            warn!("initial refresh failed: {e}");
        }
    });

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received Ctrl+C, shutting down...");
            cancel_clone.cancel();
        }
    });

    let runner = RefreshRunner::new(Arc::clone(&app), schedule, cancel.clone()).run();
    channels::run_runtime(telegram, app, 64, cancel).await;
    runner.await?;
    Ok(())
}

async fn run_refresh(config: BotConfig) -> anyhow::Result<()> {
    // Nothing is pushed from here; the adapter only satisfies the wiring.
    let telegram = Arc::new(TelegramAdapter::new(&config.telegram)?);
    let app = App::new(config, Arc::new(SystemClock), telegram)?;
    let outcome = app.pipeline().refresh().await?;
    println!("{outcome:?}");
    println!("{}", app.query().recent_window(app.config().query.recent_days));
    Ok(())
}
