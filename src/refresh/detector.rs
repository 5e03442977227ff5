//! Deciding whether the remote dataset changed since the last ingest.
//!
//! Both strategies end in the same download path: the body is streamed to
//! the staging file, hashed, and promoted over the canonical input only when
//! the digest differs from the last ingested one. A failed download leaves
//! the canonical input untouched.

use crate::config::ChangeStrategy;
use crate::error::Result;
use crate::refresh::fetch::SourceClient;
use crate::refresh::retry::{Attempt, RetryPolicy};
use crate::refresh::state::RefreshState;
use crate::scheduler::clock::Clock;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a change check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change {
    /// Remote content matches what is already ingested. Carries the
    /// `Last-Modified` observed on the way, if any.
    Unchanged {
        last_modified: Option<DateTime<Utc>>,
    },
    /// New content has been promoted to the canonical input path.
    Changed {
        digest: String,
        last_modified: Option<DateTime<Utc>>,
    },
}

/// Change detector for one remote resource and its local files.
#[derive(Clone)]
pub struct ChangeDetector {
    client: SourceClient,
    strategy: ChangeStrategy,
    input: PathBuf,
    staging: PathBuf,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    tz: Tz,
}

impl ChangeDetector {
    pub fn new(
        client: SourceClient,
        strategy: ChangeStrategy,
        input: PathBuf,
        staging: PathBuf,
        clock: Arc<dyn Clock>,
        tz: Tz,
    ) -> Self {
        Self {
            client,
            strategy,
            input,
            staging,
            retry: RetryPolicy::new(30, std::time::Duration::from_secs(30)),
            clock,
            tz,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Canonical input path the loader reads.
    pub fn input(&self) -> &Path {
        &self.input
    }

    /// Check the remote resource against `state`.
    ///
    /// # Errors
    ///
    /// `Download` and `Io` errors from fetching or promoting, and
    /// `StaleProbeTimeout` when the probe never saw today's data.
    pub async fn check(&self, state: &RefreshState) -> Result<Change> {
        let last_modified = match self.strategy {
            ChangeStrategy::Hash => None,
            ChangeStrategy::Probe => {
                let observed = self.probe_until_fresh().await?;
                if observed.is_some() && observed == state.last_modified {
                    info!("remote data not modified since {:?}, not reloading", observed);
                    return Ok(Change::Unchanged {
                        last_modified: observed,
                    });
                }
                observed
            }
        };
        self.download_and_compare(state, last_modified).await
    }

    /// Probe until `Last-Modified` falls on today's date.
    ///
    /// A response without `Last-Modified` cannot be judged and counts as
    /// fresh; the digest comparison decides instead.
    async fn probe_until_fresh(&self) -> Result<Option<DateTime<Utc>>> {
        self.retry
            .run(self.clock.as_ref(), |attempt| async move {
                match self.client.probe_last_modified().await {
                    Ok(None) => {
                        debug!("probe {attempt}: no Last-Modified header");
                        Attempt::Done(None)
                    }
                    Ok(Some(modified)) => {
                        let today = self.clock.now().with_timezone(&self.tz).date_naive();
                        let modified_day = modified.with_timezone(&self.tz).date_naive();
                        if modified_day == today {
                            Attempt::Done(Some(modified))
                        } else {
                            debug!("probe {attempt}: remote data from {modified_day}, waiting for {today}");
                            Attempt::NotReady
                        }
                    }
                    Err(e) => Attempt::Failed(e),
                }
            })
            .await
    }

    async fn download_and_compare(
        &self,
        state: &RefreshState,
        probed: Option<DateTime<Utc>>,
    ) -> Result<Change> {
        let downloaded = self.client.download_to(&self.staging).await?;
        let last_modified = probed.or(downloaded.last_modified);

        if state.last_digest.as_deref() == Some(downloaded.digest.as_str()) {
            info!(
                "digest {} of {} matches the ingested data, not reloading",
                downloaded.digest,
                self.staging.display()
            );
            discard(&self.staging).await;
            return Ok(Change::Unchanged { last_modified });
        }

        promote(&self.staging, &self.input).await?;
        info!(
            "promoted {} ({} bytes) to {}",
            self.staging.display(),
            downloaded.bytes,
            self.input.display()
        );
        Ok(Change::Changed {
            digest: downloaded.digest,
            last_modified,
        })
    }
}

/// Move `staging` over `input`.
///
/// `rename` replaces the target atomically where the platform allows it.
/// Otherwise the old input is moved aside, the rename retried, and the old
/// input restored if that fails too, so an existing input never goes missing.
pub async fn promote(staging: &Path, input: &Path) -> Result<()> {
    let first = match tokio::fs::rename(staging, input).await {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if !tokio::fs::try_exists(staging).await.unwrap_or(false)
        || !tokio::fs::try_exists(input).await.unwrap_or(false)
    {
        return Err(first.into());
    }

    warn!(
        "rename {} -> {} failed ({first}), moving old input aside and retrying",
        staging.display(),
        input.display()
    );
    let mut backup = input.as_os_str().to_owned();
    backup.push(".old");
    let backup = PathBuf::from(backup);
    tokio::fs::rename(input, &backup).await?;
    match tokio::fs::rename(staging, input).await {
        Ok(()) => {
            discard(&backup).await;
            Ok(())
        }
        Err(e) => {
            if let Err(restore) = tokio::fs::rename(&backup, input).await {
                warn!("cannot restore {}: {restore}", input.display());
            }
            Err(e.into())
        }
    }
}

async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await
        && e.kind() != std::io::ErrorKind::NotFound
    {
        warn!("cannot remove {}: {e}", path.display());
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[tokio::test]
    async fn promote_replaces_existing_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        let staging = dir.path().join("input.json.new");
        std::fs::write(&input, "old").unwrap();
        std::fs::write(&staging, "new").unwrap();

        promote(&staging, &input).await.unwrap();

        assert_eq!(std::fs::read_to_string(&input).unwrap(), "new");
        assert!(!staging.exists());
    }

    #[tokio::test]
    async fn promote_without_previous_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        let staging = dir.path().join("input.json.new");
        std::fs::write(&staging, "first").unwrap();

        promote(&staging, &input).await.unwrap();
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "first");
    }

    #[tokio::test]
    async fn failed_promote_keeps_existing_input() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("input.json");
        std::fs::write(&input, "old").unwrap();

        assert!(promote(&dir.path().join("missing.new"), &input).await.is_err());
        assert_eq!(std::fs::read_to_string(&input).unwrap(), "old");
    }

    #[tokio::test]
    async fn promote_without_staging_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = promote(&dir.path().join("missing.new"), &dir.path().join("input.json"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::BotError::Io(_)));
    }

    #[tokio::test]
    async fn discard_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        discard(&dir.path().join("never-written.new")).await;
    }
}
