//! HEAD probe, ranged GET and capped streaming

use bytes::BytesMut;
use futures_util::StreamExt;
use reqwest::header::{
    ACCEPT, ACCEPT_LANGUAGE, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, HeaderMap,
    HeaderName, HeaderValue, RANGE, USER_AGENT,
};
use reqwest::{Client, StatusCode};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use url::Url;

use super::{FetchDiagnostics, FetchError, FetchRequest, FetchResult, disposition, provider};
use crate::config::FetchConfig;
use crate::diagnostics::redact::redact_url;

pub type Result<T> = std::result::Result<T, FetchError>;

/// Initial allocation ceiling for the body buffer
const MAX_PREALLOCATION: usize = 8 * 1024 * 1024;

/// Accept only absolute http(s) URLs with a host.
pub fn validate_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).map_err(|e| FetchError::InvalidUrl(e.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(FetchError::InvalidUrl(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(FetchError::InvalidUrl("URL has no host".to_string()));
    }
    Ok(url)
}

/// Retrieves a bounded prefix of a remote file. Performs no retries.
#[derive(Debug, Clone)]
pub struct RemoteFetcher {
    client: Client,
    base_headers: HeaderMap,
}

impl RemoteFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        let mut base_headers = HeaderMap::new();
        let user_agent = HeaderValue::from_str(&config.user_agent)
            .map_err(|e| FetchError::Client(format!("invalid user agent: {e}")))?;
        base_headers.insert(USER_AGENT, user_agent);
        base_headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
        base_headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));
        merge_headers(&mut base_headers, &config.emulated_headers);

        Ok(Self {
            client,
            base_headers,
        })
    }

    fn request_headers(&self, extra: &BTreeMap<String, String>) -> HeaderMap {
        let mut headers = self.base_headers.clone();
        merge_headers(&mut headers, extra);
        headers
    }

    pub async fn fetch(&self, request: &FetchRequest) -> Result<FetchResult> {
        let started = Instant::now();

        let (target, rewritten_from) = match provider::rewrite(&request.url) {
            Some(rewrite) => {
                info!(provider = rewrite.provider, "Rewrote share link to direct download");
                (rewrite.url, Some(rewrite.provider))
            }
            None => (request.url.trim().to_string(), None),
        };
        let url = validate_url(&target)?;
        let headers = self.request_headers(&request.emulated_headers);

        let head = self
            .client
            .head(url.clone())
            .headers(headers.clone())
            .send()
            .await
            .map_err(map_transport_error)?;

        // An HTML body means a landing page, whatever the status
        let content_type = header_str(head.headers(), &CONTENT_TYPE).unwrap_or_default();
        if content_type.to_ascii_lowercase().contains("text/html") {
            return Err(if rewritten_from.is_some() {
                FetchError::ProviderRateLimited
            } else {
                FetchError::NotMedia
            });
        }

        let status = head.status();
        if !status.is_success() {
            return Err(match status {
                StatusCode::NOT_FOUND => FetchError::NotFound,
                StatusCode::FORBIDDEN => FetchError::AccessDenied,
                other => FetchError::Status(other.as_u16()),
            });
        }

        // HEAD has no body, so read the header rather than the body size hint
        let declared_size = header_str(head.headers(), &CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|size| *size > 0)
            .ok_or(FetchError::MissingSize)?;

        let filename = disposition::resolve_filename(
            header_str(head.headers(), &CONTENT_DISPOSITION),
            &target,
        );

        let cap = request.max_bytes.as_u64().min(declared_size).max(1);
        let range = format!("bytes=0-{}", cap - 1);
        debug!(
            url = %redact_url(url.as_str()),
            declared_size,
            %range,
            "Requesting byte range"
        );

        let mut stream = self
            .client
            .get(url.clone())
            .headers(headers)
            .header(RANGE, &range)
            .send()
            .await
            .map_err(map_transport_error)?
            .error_for_status()
            .map_err(|e| match e.status() {
                Some(status) => FetchError::RangeStatus(status.as_u16()),
                None => FetchError::Body(e.to_string()),
            })?
            .bytes_stream();

        let cap = usize::try_from(cap).unwrap_or(usize::MAX);
        let mut buffer = BytesMut::with_capacity(cap.min(MAX_PREALLOCATION));
        let mut chunk_count = 0u32;

        while let Some(item) = stream.next().await {
            let chunk = match item {
                Ok(chunk) => chunk,
                Err(e) if buffer.is_empty() => return Err(map_body_error(e)),
                Err(e) => {
                    warn!(
                        error = %e,
                        received = buffer.len(),
                        "Body stream interrupted, keeping received prefix"
                    );
                    break;
                }
            };

            chunk_count += 1;
            let remaining = cap - buffer.len();
            if chunk.len() >= remaining {
                buffer.extend_from_slice(&chunk[..remaining]);
                debug!(received = buffer.len(), chunk_count, "Reached byte cap, cancelling stream");
                break;
            }
            buffer.extend_from_slice(&chunk);
        }
        // dropping the stream aborts the upstream body
        drop(stream);

        let buffer = buffer.freeze();
        let diagnostics = FetchDiagnostics {
            resolved_filename: filename.clone(),
            chunk_count,
            elapsed_ms: started.elapsed().as_millis() as u64,
            was_truncated: (buffer.len() as u64) < declared_size,
            rewritten_from_provider: rewritten_from.map(str::to_string),
        };

        info!(
            bytes = buffer.len(),
            declared_size,
            chunk_count,
            truncated = diagnostics.was_truncated,
            elapsed_ms = diagnostics.elapsed_ms,
            "Fetch completed"
        );

        Ok(FetchResult {
            buffer,
            filename,
            declared_file_size: declared_size,
            diagnostics,
        })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn merge_headers(headers: &mut HeaderMap, extra: &BTreeMap<String, String>) {
    for (name, value) in extra {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => warn!(header = %name, "Skipping invalid emulation header"),
        }
    }
}

fn map_transport_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Unreachable(e.without_url().to_string())
    }
}

fn map_body_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Body(e.without_url().to_string())
    }
}
