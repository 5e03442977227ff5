//! In-memory dataset generations.
//!
//! A [`Dataset`] is built once from a full record set and never mutated.
//! [`DatasetHandle`] holds the current generation; readers clone the `Arc`
//! and keep using it while a newer generation is swapped in.

pub mod aggregate;
pub mod loader;

use crate::dataset::aggregate::DateAggregate;
use crate::model::RawRecord;
use std::sync::{Arc, RwLock};

pub use loader::DatasetLoader;

/// One immutable generation of decoded records and their per-date totals.
#[derive(Debug, Default)]
pub struct Dataset {
    generation: u64,
    records: Vec<RawRecord>,
    by_date: DateAggregate,
}

impl Dataset {
    /// Build a dataset, computing the nationwide aggregate from `records`.
    ///
    /// Region queries filter `records` directly, so no region aggregate is
    /// kept. The generation is assigned when the dataset is published.
    pub fn from_records(records: Vec<RawRecord>) -> Self {
        let by_date = aggregate::aggregate_by_date(&records);
        Self {
            generation: 0,
            records,
            by_date,
        }
    }

    /// Generation number; 0 means nothing has been published yet.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    pub fn by_date(&self) -> &DateAggregate {
        &self.by_date
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Shared pointer to the current [`Dataset`].
#[derive(Debug, Default)]
pub struct DatasetHandle {
    current: RwLock<Arc<Dataset>>,
}

impl DatasetHandle {
    /// Handle holding an empty generation-0 dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// The current generation. Holds the lock only for the `Arc` clone.
    pub fn snapshot(&self) -> Arc<Dataset> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Replace the current generation with `dataset`, numbering it one past
    /// the previous generation. Returns the published snapshot.
    pub fn publish(&self, mut dataset: Dataset) -> Arc<Dataset> {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        dataset.generation = current.generation + 1;
        let published = Arc::new(dataset);
        *current = Arc::clone(&published);
        published
    }

    pub fn generation(&self) -> u64 {
        self.snapshot().generation()
    }
}
