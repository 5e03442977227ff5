//! Scheduled refresh of the remote dataset.

pub mod detector;
pub mod fetch;
pub mod pipeline;
pub mod retry;
pub mod state;

pub use detector::{Change, ChangeDetector};
pub use fetch::SourceClient;
pub use pipeline::{RefreshOutcome, RefreshPipeline};
pub use retry::{Attempt, RetryPolicy};
pub use state::RefreshState;
