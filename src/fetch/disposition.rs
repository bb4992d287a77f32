//! `Content-Disposition` filename extraction.

use regex::Regex;
use std::sync::LazyLock;

static EXTENDED: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)filename\*=UTF-8''([^;]+)").expect("valid regex"));
static SIMPLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)filename="?([^";]+)"?"#).expect("valid regex"));

/// Resolve the display filename.
///
/// Prefers the RFC 5987 `filename*=UTF-8''...` form (percent-decoded), then the plain
/// `filename=` form, then the URL itself. An undecodable extended value falls back to
/// the URL, not to the plain form.
pub fn resolve_filename(content_disposition: Option<&str>, url: &str) -> String {
    let Some(header) = content_disposition else {
        return url.to_string();
    };

    if let Some(encoded) = EXTENDED.captures(header).and_then(|c| c.get(1)) {
        return match urlencoding::decode(encoded.as_str().trim()) {
            Ok(decoded) => decoded.into_owned(),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to decode extended filename");
                url.to_string()
            }
        };
    }

    SIMPLE
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| url.to_string())
}
