//! The `refresh()` entry point: detect, load, publish, commit state.

use crate::dataset::DatasetLoader;
use crate::error::Result;
use crate::refresh::detector::{Change, ChangeDetector};
use crate::refresh::fetch::sha256_hex;
use crate::refresh::state::RefreshState;
use crate::scheduler::clock::Clock;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// What a refresh did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Nothing new; the published dataset is untouched.
    Unchanged { generation: u64 },
    /// A new dataset generation was published.
    Updated { generation: u64, records: usize },
}

impl RefreshOutcome {
    pub fn generation(&self) -> u64 {
        match self {
            Self::Unchanged { generation } | Self::Updated { generation, .. } => *generation,
        }
    }

    pub fn is_updated(&self) -> bool {
        matches!(self, Self::Updated { .. })
    }
}

/// Serialized refresh of the shared dataset.
pub struct RefreshPipeline {
    detector: ChangeDetector,
    loader: DatasetLoader,
    state: Mutex<RefreshState>,
    clock: Arc<dyn Clock>,
}

impl RefreshPipeline {
    pub fn new(detector: ChangeDetector, loader: DatasetLoader, clock: Arc<dyn Clock>) -> Self {
        Self {
            detector,
            loader,
            state: Mutex::new(RefreshState::default()),
            clock,
        }
    }

    pub fn loader(&self) -> &DatasetLoader {
        &self.loader
    }

    /// Copy of the current bookkeeping.
    pub async fn state(&self) -> RefreshState {
        self.state.lock().await.clone()
    }

    /// Run one refresh cycle.
    ///
    /// Concurrent calls queue behind each other. The digest is committed
    /// only after the new dataset is published, so a decode failure leaves
    /// the next cycle free to retry the same content.
    ///
    /// # Errors
    ///
    /// Any error from the change detector or loader; the previously
    /// published dataset stays in place.
    pub async fn refresh(&self) -> Result<RefreshOutcome> {
        let mut state = self.state.lock().await;
        let change = self.detector.check(&state).await;
        state.mark_checked(self.clock.now());

        match change? {
            Change::Unchanged { last_modified } => {
                state.mark_unmodified(last_modified);
                let generation = self.loader.handle().generation();
                info!("no new data, serving generation {generation}");
                Ok(RefreshOutcome::Unchanged { generation })
            }
            Change::Changed {
                digest,
                last_modified,
            } => {
                let dataset = match self.loader.load(self.detector.input()).await {
                    Ok(dataset) => dataset,
                    Err(e) => {
                        warn!(error = %e, "new data could not be loaded");
                        return Err(e);
                    }
                };
                state.mark_ingested(digest, last_modified, self.clock.now());
                Ok(RefreshOutcome::Updated {
                    generation: dataset.generation(),
                    records: dataset.records().len(),
                })
            }
        }
    }

    /// Load whatever is already in the canonical input file.
    ///
    /// Used at startup so the bot can answer before the first download.
    /// The file's digest is recorded, so an unchanged remote does not
    /// trigger a reload or a push.
    ///
    /// # Errors
    ///
    /// `Io` if the file is missing, `Decode` if it is malformed.
    pub async fn load_existing(&self) -> Result<RefreshOutcome> {
        let mut state = self.state.lock().await;
        let input = self.detector.input();
        let digest = sha256_hex(&tokio::fs::read(input).await?);
        let dataset = self.loader.load(input).await?;
        state.mark_ingested(digest, None, self.clock.now());
        Ok(RefreshOutcome::Updated {
            generation: dataset.generation(),
            records: dataset.records().len(),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn outcome_accessors() {
        let unchanged = RefreshOutcome::Unchanged { generation: 3 };
        let updated = RefreshOutcome::Updated {
            generation: 4,
            records: 10,
        };
        assert_eq!(unchanged.generation(), 3);
        assert!(!unchanged.is_updated());
        assert_eq!(updated.generation(), 4);
        assert!(updated.is_updated());
    }
}
