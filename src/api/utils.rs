//! Request header helpers
//!
//! Pure functions over `HeaderMap`, kept apart from the gateway so they can be
//! unit tested without a router.

use axum::body::{Body, Bytes};
use axum::http::{HeaderMap, header};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use uuid::Uuid;

use super::error::AnalyzeError;
use super::grant::constant_time_eq;
use crate::diagnostics::HttpMetadata;

pub const CF_CONNECTING_IP: &str = "cf-connecting-ip";
pub const X_REAL_IP: &str = "x-real-ip";
pub const CF_RAY: &str = "cf-ray";
pub const X_API_KEY: &str = "x-api-key";

/// Rate-limit identity when no client address header is present
pub const ANONYMOUS_CLIENT: &str = "anonymous";

fn header_str<'a>(headers: &'a HeaderMap, name: impl header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

pub fn client_ip(headers: &HeaderMap) -> &str {
    header_str(headers, CF_CONNECTING_IP)
        .or_else(|| header_str(headers, X_REAL_IP))
        .unwrap_or(ANONYMOUS_CLIENT)
}

/// Edge ray id when present, otherwise a fresh UUIDv4
pub fn request_id(headers: &HeaderMap) -> String {
    header_str(headers, CF_RAY)
        .map(str::to_owned)
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// Key from `x-api-key`, falling back to `Authorization: Bearer`
pub fn api_key(headers: &HeaderMap) -> Option<&str> {
    if let Some(key) = header_str(headers, X_API_KEY) {
        return Some(key);
    }
    header_str(headers, header::AUTHORIZATION)?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// Fails closed: a configured key must be presented and match.
pub fn check_api_key(headers: &HeaderMap, expected: Option<&str>) -> Result<(), AnalyzeError> {
    let Some(expected) = expected.map(str::trim).filter(|key| !key.is_empty()) else {
        return Ok(());
    };
    match api_key(headers) {
        None => Err(AnalyzeError::missing_api_key()),
        Some(provided) if constant_time_eq(provided.as_bytes(), expected.as_bytes()) => Ok(()),
        Some(_) => Err(AnalyzeError::invalid_api_key()),
    }
}

pub fn http_metadata(method: &str, path: &str, headers: &HeaderMap) -> HttpMetadata {
    HttpMetadata {
        request_method: method.to_string(),
        request_url: path.to_string(),
        status: 200,
        remote_ip: header_str(headers, CF_CONNECTING_IP).map(str::to_owned),
        user_agent: header_str(headers, header::USER_AGENT).map(str::to_owned),
    }
}

/// Parses and validates Content-Type header for application/json
///
/// Accepts `application/json` with optional parameters; rejects `application/jsonp`,
/// `application/json-patch+json`, `text/json` and malformed media types.
pub fn parse_content_type(content_type: &str) -> Result<mime::Mime, AnalyzeError> {
    let media_type: mime::Mime = content_type
        .parse()
        .map_err(|_| AnalyzeError::validation("Content-Type must be application/json."))?;

    if media_type.type_() != mime::APPLICATION || media_type.subtype() != mime::JSON {
        return Err(AnalyzeError::validation("Content-Type must be application/json.")
            .with_detail(format!("got {}/{}", media_type.type_(), media_type.subtype())));
    }

    Ok(media_type)
}

/// A declared Content-Type must be JSON; an absent one is tolerated.
pub fn check_json_content_type(headers: &HeaderMap) -> Result<(), AnalyzeError> {
    match header_str(headers, header::CONTENT_TYPE) {
        Some(content_type) => parse_content_type(content_type).map(|_| ()),
        None => Ok(()),
    }
}

/// Collect the request body, failing once it exceeds `max_size` bytes
pub async fn read_body(body: Body, max_size: usize) -> Result<Bytes, AnalyzeError> {
    match Limited::new(body, max_size).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
            Err(AnalyzeError::payload_too_large(max_size as u64))
        }
        Err(err) => Err(AnalyzeError::validation("Failed to read the request body.")
            .with_detail(err.to_string())),
    }
}
