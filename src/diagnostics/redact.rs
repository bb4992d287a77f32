//! Scrubbing of secrets from log documents.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;
use url::Url;

pub const REDACTED: &str = "[REDACTED]";

const SENSITIVE_QUERY_KEYS: &[&str] = &[
    "token",
    "sig",
    "signature",
    "key",
    "auth",
    "authorization",
    "expires",
    "api_key",
    "apikey",
    "access_token",
    "id_token",
    "refresh_token",
];
const SENSITIVE_QUERY_PREFIXES: &[&str] = &["x-amz-", "x-goog-"];

static SENSITIVE_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)token|secret|api[-_]?key|authorization|cookie|password|signature")
        .expect("valid regex")
});

/// `name=value` pairs embedded in free text
static INLINE_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(token|sig|signature|key|auth|authorization|expires|api_key|apikey|access_token|id_token|refresh_token|x-amz-[\w-]+|x-goog-[\w-]+)=([^&\s]+)",
    )
    .expect("valid regex")
});

pub fn is_sensitive_field(key: &str) -> bool {
    SENSITIVE_FIELD.is_match(key)
}

pub fn is_sensitive_query_param(param: &str) -> bool {
    let normalized = param.trim().to_ascii_lowercase();
    SENSITIVE_QUERY_KEYS.contains(&normalized.as_str())
        || SENSITIVE_QUERY_PREFIXES
            .iter()
            .any(|prefix| normalized.starts_with(prefix))
}

fn looks_like_absolute_url(value: &str) -> bool {
    let trimmed = value.trim_start();
    trimmed
        .get(..7)
        .is_some_and(|p| p.eq_ignore_ascii_case("http://"))
        || trimmed
            .get(..8)
            .is_some_and(|p| p.eq_ignore_ascii_case("https://"))
}

/// Replace the values of sensitive query parameters. Non-URLs pass through.
pub fn redact_url(raw: &str) -> String {
    if !looks_like_absolute_url(raw) {
        return raw.to_string();
    }
    let Ok(mut url) = Url::parse(raw.trim()) else {
        return raw.to_string();
    };
    if url.query().is_none() {
        return url.to_string();
    }

    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if is_sensitive_query_param(&k) {
                REDACTED.to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect();
    url.query_pairs_mut().clear().extend_pairs(pairs);
    url.to_string()
}

fn redact_string(value: &str) -> String {
    let value = if looks_like_absolute_url(value) {
        redact_url(value)
    } else {
        value.to_string()
    };
    INLINE_PAIR
        .replace_all(&value, |caps: &regex::Captures<'_>| {
            format!("{}={REDACTED}", &caps[1])
        })
        .into_owned()
}

/// Recursively redact a JSON document.
///
/// Object members whose key looks sensitive are replaced wholesale; string values
/// elsewhere have URL query secrets and inline `key=value` secrets scrubbed.
pub fn redact_value(value: Value) -> Value {
    match value {
        Value::String(s) => Value::String(redact_string(&s)),
        Value::Array(items) => Value::Array(items.into_iter().map(redact_value).collect()),
        Value::Object(map) => Value::Object(redact_map(map)),
        other => other,
    }
}

pub fn redact_map(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter()
        .map(|(key, value)| {
            let value = if is_sensitive_field(&key) {
                Value::String(REDACTED.to_string())
            } else {
                redact_value(value)
            };
            (key, value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_query_values_are_replaced() {
        let redacted = redact_url(
            "https://bucket.s3.amazonaws.com/v.mp4?X-Amz-Signature=abc&X-Amz-Credential=me&part=2",
        );
        assert!(!redacted.contains("abc"));
        assert!(!redacted.contains("=me"));
        assert!(redacted.contains("part=2"));
        assert!(redacted.contains("X-Amz-Signature=%5BREDACTED%5D"));
    }

    #[test]
    fn test_non_urls_untouched() {
        assert_eq!(redact_url("clip.mp4"), "clip.mp4");
        assert_eq!(redact_url("https://example.com/a"), "https://example.com/a");
    }

    #[test]
    fn test_nested_documents() {
        let doc = json!({
            "targetUrl": "https://cdn.example.com/a.mkv?token=s3cr3t&x=1",
            "headers": { "Authorization": "Bearer abc", "accept": "*/*" },
            "apiKey": "k",
            "notes": ["retry with sig=deadbeef please"],
            "fileSize": 1000,
            "nested": { "grantSecret": { "deep": 1 } }
        });

        let out = redact_value(doc);
        assert!(!out["targetUrl"].as_str().unwrap().contains("s3cr3t"));
        assert!(out["targetUrl"].as_str().unwrap().contains("x=1"));
        assert_eq!(out["headers"]["Authorization"], REDACTED);
        assert_eq!(out["headers"]["accept"], "*/*");
        assert_eq!(out["apiKey"], REDACTED);
        assert_eq!(out["notes"][0], "retry with sig=[REDACTED] please");
        assert_eq!(out["fileSize"], 1000);
        assert_eq!(out["nested"]["grantSecret"], REDACTED);
    }

    #[test]
    fn test_query_param_classification() {
        assert!(is_sensitive_query_param("API_KEY"));
        assert!(is_sensitive_query_param("x-goog-signature"));
        assert!(!is_sensitive_query_param("format"));
        assert!(!is_sensitive_query_param("keyframe"));
    }
}
