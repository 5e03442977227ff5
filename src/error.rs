//! Error types for the epibot refresh pipeline and query engine.

/// Top-level error type for the bot core.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    /// Network failure or non-200 response while fetching the dataset.
    #[error("download error: {0}")]
    Download(String),

    /// Malformed JSON document or record field.
    #[error("decode error: {0}")]
    Decode(String),

    /// The freshness probe ran out of attempts without seeing today's data.
    #[error("remote data still stale after {attempts} probe attempts")]
    StaleProbeTimeout {
        /// Number of probes issued in this cycle.
        attempts: u32,
    },

    /// No rows exist for the requested region.
    #[error("region {0} not found")]
    RegionNotFound(String),

    /// A region query was issued with an empty name.
    #[error("no region specified")]
    RegionNotSpecified,

    /// Chart rasterization failed.
    #[error("render error: {0}")]
    Render(String),

    /// Filesystem failure during stage, promote or write.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Chat transport send/receive error.
    #[error("channel error: {0}")]
    Channel(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, BotError>;
