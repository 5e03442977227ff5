//! Bookkeeping for change detection.

use chrono::{DateTime, Utc};

/// What the last successful refresh ingested.
///
/// Only updated after a new dataset generation is published, so
/// `last_digest` always describes the content currently being served.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshState {
    /// SHA-256 hex digest of the ingested file.
    pub last_digest: Option<String>,
    /// `Last-Modified` of the ingested resource, when the server sent one.
    pub last_modified: Option<DateTime<Utc>>,
    /// When the last new generation was published.
    pub last_refresh: Option<DateTime<Utc>>,
    /// When the remote side was last checked, changed or not.
    pub last_check: Option<DateTime<Utc>>,
}

impl RefreshState {
    /// Record a successful ingest.
    pub fn mark_ingested(
        &mut self,
        digest: String,
        last_modified: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    ) {
        self.last_digest = Some(digest);
        if last_modified.is_some() {
            self.last_modified = last_modified;
        }
        self.last_refresh = Some(at);
        self.last_check = Some(at);
    }

    /// Record a `Last-Modified` seen for content identical to what is
    /// served, so the next probe can skip the download.
    pub fn mark_unmodified(&mut self, last_modified: Option<DateTime<Utc>>) {
        if last_modified.is_some() {
            self.last_modified = last_modified;
        }
    }

    pub fn mark_checked(&mut self, at: DateTime<Utc>) {
        self.last_check = Some(at);
    }
}
