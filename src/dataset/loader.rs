//! Decoding the canonical input file and publishing a new generation.

use crate::dataset::{Dataset, DatasetHandle};
use crate::error::{BotError, Result};
use crate::model::RawRecord;
use serde_json::value::RawValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Decode a JSON array of records.
///
/// A document that is not a JSON array fails as a whole; otherwise each
/// element is decoded on its own so the error names the offending record.
pub fn decode_records(bytes: &[u8]) -> Result<Vec<RawRecord>> {
    let elements: Vec<&RawValue> = serde_json::from_slice(bytes)
        .map_err(|e| BotError::Decode(format!("document is not a JSON array of records: {e}")))?;

    elements
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            serde_json::from_str::<RawRecord>(raw.get())
                .map_err(|e| BotError::Decode(format!("record {index}: {e}")))
        })
        .collect()
}

/// Read and decode a records file.
pub fn read_records(path: &Path) -> Result<Vec<RawRecord>> {
    let bytes = std::fs::read(path)?;
    decode_records(&bytes)
}

/// Write records as a pretty-printed JSON array.
pub fn write_records(path: &Path, records: &[RawRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(records)
        .map_err(|e| BotError::Decode(format!("cannot encode records: {e}")))?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Loads the canonical input into the shared [`DatasetHandle`].
#[derive(Debug, Clone)]
pub struct DatasetLoader {
    handle: Arc<DatasetHandle>,
    output_file: Option<PathBuf>,
}

impl DatasetLoader {
    pub fn new(handle: Arc<DatasetHandle>) -> Self {
        Self {
            handle,
            output_file: None,
        }
    }

    /// Also write the normalized records to `path` after each publish.
    pub fn with_output_file(mut self, path: Option<PathBuf>) -> Self {
        self.output_file = path;
        self
    }

    pub fn handle(&self) -> &Arc<DatasetHandle> {
        &self.handle
    }

    /// Decode `input`, build the aggregates and publish the new generation.
    ///
    /// Decoding and aggregation run on the blocking pool without touching the
    /// handle; on failure the current generation stays published.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Io`] if the file cannot be read and
    /// [`BotError::Decode`] if any record is malformed.
    pub async fn load(&self, input: &Path) -> Result<Arc<Dataset>> {
        let path = input.to_path_buf();
        info!("reading input file {}", path.display());
        let dataset = tokio::task::spawn_blocking(move || {
            read_records(&path).map(Dataset::from_records)
        })
        .await
        .map_err(|e| BotError::Decode(format!("decode task failed: {e}")))??;

        let published = self.handle.publish(dataset);
        info!(
            "published dataset generation {} with {} records over {} dates",
            published.generation(),
            published.records().len(),
            published.by_date().len()
        );

        if let Some(output) = self.output_file.clone() {
            let snapshot = Arc::clone(&published);
            let written = tokio::task::spawn_blocking(move || {
                write_records(&output, snapshot.records()).map(|()| output)
            })
            .await;
            match written {
                Ok(Ok(output)) => info!("wrote normalized records to {}", output.display()),
                Ok(Err(e)) => warn!("cannot write output file: {e}"),
                Err(e) => warn!("output writer task failed: {e}"),
            }
        }

        Ok(published)
    }
}
