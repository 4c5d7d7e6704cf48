//! Fetching metadata files from untrusted mirrors.
//!
//! Every read is bounded by a caller-supplied maximum length so a hostile
//! mirror cannot exhaust memory. `Ok(None)` means the file is unavailable.

use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{FetchLimits, Mirror};
use crate::storage::is_plain_filename;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("'{filename}' exceeds the maximum length of {max_length} bytes")]
    TooLarge { filename: String, max_length: u64 },
    #[error("invalid metadata filename '{0}'")]
    InvalidFilename(String),
    #[error("HTTP error fetching '{url}': status {status}")]
    Status { url: String, status: u16 },
    #[error("transport error fetching '{filename}': {message}")]
    Transport { filename: String, message: String },
    #[error("no mirrors configured")]
    NoMirrors,
}

pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, filename: &str, max_length: u64) -> Result<Option<Vec<u8>>, FetchError>;
}

impl<F: MetadataFetcher + ?Sized> MetadataFetcher for &F {
    fn fetch(&self, filename: &str, max_length: u64) -> Result<Option<Vec<u8>>, FetchError> {
        (**self).fetch(filename, max_length)
    }
}

/// Read at most `max_length` bytes, failing if the source has more.
fn read_bounded<R: Read>(
    reader: R,
    filename: &str,
    max_length: u64,
) -> Result<Vec<u8>, FetchError> {
    let mut bytes = Vec::new();
    reader
        .take(max_length.saturating_add(1))
        .read_to_end(&mut bytes)
        .map_err(|e| FetchError::Transport {
            filename: filename.to_string(),
            message: e.to_string(),
        })?;
    if bytes.len() as u64 > max_length {
        return Err(FetchError::TooLarge {
            filename: filename.to_string(),
            max_length,
        });
    }
    Ok(bytes)
}

fn check_filename(filename: &str) -> Result<(), FetchError> {
    if is_plain_filename(filename) {
        Ok(())
    } else {
        Err(FetchError::InvalidFilename(filename.to_string()))
    }
}

// =============================================================================
// Local directory
// =============================================================================

/// Serves metadata from a local directory laid out like a mirror's
/// metadata path.
#[derive(Debug, Clone)]
pub struct FilesystemFetcher {
    dir: PathBuf,
}

impl FilesystemFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl MetadataFetcher for FilesystemFetcher {
    fn fetch(&self, filename: &str, max_length: u64) -> Result<Option<Vec<u8>>, FetchError> {
        check_filename(filename)?;
        match std::fs::File::open(self.dir.join(filename)) {
            Ok(file) => read_bounded(file, filename, max_length).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(FetchError::Transport {
                filename: filename.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

// =============================================================================
// HTTP mirrors
// =============================================================================

/// Fetches metadata over HTTP, trying each mirror once, in order.
///
/// A file is unavailable only if every mirror answers 404. If no mirror
/// succeeds and at least one failed for another reason, the last such
/// failure is returned.
#[derive(Debug, Clone)]
pub struct MirrorFetcher {
    mirrors: Vec<Mirror>,
    http_client: reqwest::blocking::Client,
}

impl MirrorFetcher {
    pub fn new(mirrors: Vec<Mirror>, limits: &FetchLimits) -> Result<Self, FetchError> {
        if mirrors.is_empty() {
            return Err(FetchError::NoMirrors);
        }
        let http_client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(limits.fetch_timeout_secs))
            .build()
            .map_err(|e| FetchError::Transport {
                filename: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self {
            mirrors,
            http_client,
        })
    }

    pub fn mirrors(&self) -> &[Mirror] {
        &self.mirrors
    }

    fn fetch_from(
        &self,
        mirror: &Mirror,
        filename: &str,
        max_length: u64,
    ) -> Result<Option<Vec<u8>>, FetchError> {
        let url = mirror.metadata_url(filename);
        let transport = |e: reqwest::Error| FetchError::Transport {
            filename: filename.to_string(),
            message: e.to_string(),
        };

        let response = self.http_client.get(&url).send().map_err(transport)?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status().as_u16(),
            });
        }
        if let Some(len) = response.content_length() {
            if len > max_length {
                return Err(FetchError::TooLarge {
                    filename: filename.to_string(),
                    max_length,
                });
            }
        }

        read_bounded(response, filename, max_length).map(Some)
    }
}

impl MetadataFetcher for MirrorFetcher {
    fn fetch(&self, filename: &str, max_length: u64) -> Result<Option<Vec<u8>>, FetchError> {
        check_filename(filename)?;

        let mut last_error = None;
        for mirror in &self.mirrors {
            match self.fetch_from(mirror, filename, max_length) {
                Ok(Some(bytes)) => {
                    debug!(mirror = %mirror.url_prefix, filename, len = bytes.len(), "fetched metadata");
                    return Ok(Some(bytes));
                }
                Ok(None) => {
                    debug!(mirror = %mirror.url_prefix, filename, "metadata not on mirror");
                }
                Err(e) => {
                    warn!(mirror = %mirror.url_prefix, filename, error = %e, "mirror fetch failed");
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }
}
