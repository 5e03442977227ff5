//! HTTP access to the remote dataset.

use crate::config::SourceConfig;
use crate::error::{BotError, Result};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use reqwest::StatusCode;
use reqwest::header::LAST_MODIFIED;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

const USER_AGENT: &str = concat!("epibot/", env!("CARGO_PKG_VERSION"));

/// A completed download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Downloaded {
    /// SHA-256 hex digest of the body.
    pub digest: String,
    pub bytes: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

/// Client for the dataset URL. Redirects are never followed.
#[derive(Debug, Clone)]
pub struct SourceClient {
    client: reqwest::Client,
    url: String,
}

impl SourceClient {
    /// # Errors
    ///
    /// Returns [`BotError::Download`] if the client cannot be constructed.
    pub fn new(config: &SourceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| BotError::Download(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            url: config.url.clone(),
        })
    }

    /// `HEAD` the resource and return its `Last-Modified`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`BotError::Download`] on transport failure or a non-200 status.
    pub async fn probe_last_modified(&self) -> Result<Option<DateTime<Utc>>> {
        let response = self
            .client
            .head(&self.url)
            .send()
            .await
            .map_err(|e| BotError::Download(format!("probe of {} failed: {e}", self.url)))?;
        if response.status() != StatusCode::OK {
            return Err(BotError::Download(format!(
                "probe of {} returned {}",
                self.url,
                response.status()
            )));
        }
        Ok(last_modified(response.headers()))
    }

    /// Stream the resource into `dest`, hashing it on the way.
    ///
    /// `dest` is truncated first; on any failure it is removed again so no
    /// partial file is left behind.
    ///
    /// # Errors
    ///
    /// [`BotError::Download`] for transport failures or a non-200 status,
    /// [`BotError::Io`] when writing `dest` fails.
    pub async fn download_to(&self, dest: &Path) -> Result<Downloaded> {
        info!("downloading new data from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| BotError::Download(format!("download of {} failed: {e}", self.url)))?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(BotError::Download(format!(
                "download of {} returned {status}: {}",
                self.url,
                body.chars().take(200).collect::<String>()
            )));
        }

        let last_modified = last_modified(response.headers());
        match write_body(response, dest).await {
            Ok((digest, bytes)) => {
                debug!("sha256 of {}: {digest}", dest.display());
                Ok(Downloaded {
                    digest,
                    bytes,
                    last_modified,
                })
            }
            Err(e) => {
                if let Err(rm) = tokio::fs::remove_file(dest).await
                    && rm.kind() != std::io::ErrorKind::NotFound
                {
                    warn!("cannot remove partial download {}: {rm}", dest.display());
                }
                Err(e)
            }
        }
    }
}

async fn write_body(response: reqwest::Response, dest: &Path) -> Result<(String, u64)> {
    let mut file = tokio::fs::File::create(dest).await?;
    let mut hasher = Sha256::new();
    let mut bytes = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| BotError::Download(format!("body read failed: {e}")))?;
        hasher.update(&chunk);
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok((format!("{:x}", hasher.finalize()), bytes))
}

fn last_modified(headers: &reqwest::header::HeaderMap) -> Option<DateTime<Utc>> {
    let value = headers.get(LAST_MODIFIED)?.to_str().ok()?;
    match DateTime::parse_from_rfc2822(value) {
        Ok(t) => Some(t.with_timezone(&Utc)),
        Err(e) => {
            warn!("ignoring unparsable Last-Modified {value:?}: {e}");
            None
        }
    }
}

/// SHA-256 hex digest of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;
    use chrono::TimeZone;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn parses_http_date() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LAST_MODIFIED,
            HeaderValue::from_static("Sun, 10 Jan 2021 14:01:02 GMT"),
        );
        assert_eq!(
            last_modified(&headers),
            Some(Utc.with_ymd_and_hms(2021, 1, 10, 14, 1, 2).unwrap())
        );
    }

    #[test]
    fn bad_or_missing_last_modified_is_none() {
        let mut headers = HeaderMap::new();
        assert!(last_modified(&headers).is_none());
        headers.insert(LAST_MODIFIED, HeaderValue::from_static("yesterday-ish"));
        assert!(last_modified(&headers).is_none());
    }

    #[test]
    fn sha256_of_known_input() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn client_builds_from_default_config() {
        assert!(SourceClient::new(&SourceConfig::default()).is_ok());
    }
}
