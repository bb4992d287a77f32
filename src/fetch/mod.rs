//! Bounded remote retrieval of a media file prefix.

pub mod disposition;
mod http;
pub mod provider;

pub use http::{RemoteFetcher, validate_url};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::humanize::ByteSize;

#[derive(Debug, Clone, bon::Builder)]
pub struct FetchRequest {
    #[builder(into)]
    pub url: String,
    /// Upper bound on retrieved bytes regardless of the declared length
    pub max_bytes: ByteSize,
    /// Headers layered over the browser-emulation defaults
    #[builder(default)]
    pub emulated_headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchDiagnostics {
    pub resolved_filename: String,
    pub chunk_count: u32,
    pub elapsed_ms: u64,
    pub was_truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewritten_from_provider: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchResult {
    pub buffer: Bytes,
    pub filename: String,
    pub declared_file_size: u64,
    pub diagnostics: FetchDiagnostics,
}

/// Fetch failures. `Display` is the caller-facing message.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Carries the transport detail for logs only
    #[error("Unable to reach the source URL.")]
    Unreachable(String),

    #[error("The source URL did not respond in time.")]
    Timeout,

    #[error("Google Drive file is rate-limited. Please try again in 24 hours.")]
    ProviderRateLimited,

    #[error("The URL links to a webpage, not a media file. Please provide a direct link.")]
    NotMedia,

    #[error("The media file could not be found. Check the URL for errors.")]
    NotFound,

    #[error("Access to this file is denied. The link may have expired or requires authentication.")]
    AccessDenied,

    #[error("Unable to access file (HTTP {0}).")]
    Status(u16),

    #[error("Failed to fetch initial chunk: HTTP {0}")]
    RangeStatus(u16),

    #[error("Could not determine file size")]
    MissingSize,

    #[error("Failed to read the file contents.")]
    Body(String),

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

impl FetchError {
    /// Conditions that are a property of the URL itself are not retryable.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            FetchError::InvalidUrl(_)
                | FetchError::NotMedia
                | FetchError::NotFound
                | FetchError::AccessDenied
                | FetchError::MissingSize
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, FetchError::Timeout)
    }
}
