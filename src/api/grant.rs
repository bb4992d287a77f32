//! Signed verification grants bound to a canonical URL.
//!
//! Token layout: `base64url(json{e, u}) "." base64url(hmac_sha256(secret, encoded_payload))`
//! where `e` is the expiry in epoch seconds and `u` is `base64url(sha256(canonical_url))`.

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

type HmacSha256 = Hmac<Sha256>;

pub const GRANT_COOKIE_NAME: &str = "mp_turnstile_grant";
pub const GRANT_COOKIE_PATH: &str = "/resource/analyze";

#[derive(Debug, Serialize, Deserialize)]
struct GrantPayload {
    e: i64,
    u: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantVerdict {
    Valid { expires_at: i64 },
    Missing,
    Malformed,
    InvalidSignature,
    Expired,
    UrlMismatch,
}

impl GrantVerdict {
    pub fn is_valid(&self) -> bool {
        matches!(self, GrantVerdict::Valid { .. })
    }

    pub fn reason(&self) -> &'static str {
        match self {
            GrantVerdict::Valid { .. } => "GRANT_VALID",
            GrantVerdict::Missing => "GRANT_MISSING",
            GrantVerdict::Malformed => "GRANT_MALFORMED",
            GrantVerdict::InvalidSignature => "GRANT_INVALID_SIGNATURE",
            GrantVerdict::Expired => "GRANT_EXPIRED",
            GrantVerdict::UrlMismatch => "GRANT_URL_MISMATCH",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedGrant {
    pub token: String,
    pub expires_at: i64,
}

/// Normalize a URL for grant binding.
///
/// Credentials and fragment are removed, scheme and host lower-cased, default ports
/// dropped, and query pairs sorted by key then value. Idempotent.
pub fn canonicalize_url(raw: &str) -> Result<String, url::ParseError> {
    // parsing lower-cases scheme and host and drops default ports
    let mut url = Url::parse(raw.trim())?;
    let _ = url.set_username("");
    let _ = url.set_password(None);
    url.set_fragment(None);

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();

    if pairs.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(pairs);
    }
    Ok(url.to_string())
}

/// Digest that binds a grant to a URL
pub fn hash_url(raw: &str) -> Result<String, url::ParseError> {
    let canonical = canonicalize_url(raw)?;
    Ok(URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes())))
}

fn keyed_mac(secret: &str, encoded_payload: &str) -> HmacSha256 {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(encoded_payload.as_bytes());
    mac
}

pub fn create_grant(
    secret: &str,
    url: &str,
    now_secs: i64,
    ttl_secs: u64,
) -> Result<IssuedGrant, url::ParseError> {
    let expires_at = now_secs + ttl_secs as i64;
    let payload = GrantPayload {
        e: expires_at,
        u: hash_url(url)?,
    };
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    let encoded = URL_SAFE_NO_PAD.encode(json);
    let signature = URL_SAFE_NO_PAD.encode(keyed_mac(secret, &encoded).finalize().into_bytes());

    Ok(IssuedGrant {
        token: format!("{encoded}.{signature}"),
        expires_at,
    })
}

/// Check order: presence, shape, signature, expiry, URL binding.
pub fn verify_grant(secret: &str, url: &str, token: Option<&str>, now_secs: i64) -> GrantVerdict {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return GrantVerdict::Missing;
    };

    let mut parts = token.split('.');
    let (Some(encoded), Some(signature), None) = (parts.next(), parts.next(), parts.next()) else {
        return GrantVerdict::Malformed;
    };
    if encoded.is_empty() || signature.is_empty() {
        return GrantVerdict::Malformed;
    }

    let Some(payload) = URL_SAFE_NO_PAD
        .decode(encoded)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<GrantPayload>(&bytes).ok())
    else {
        return GrantVerdict::Malformed;
    };

    let Ok(provided) = URL_SAFE_NO_PAD.decode(signature) else {
        return GrantVerdict::InvalidSignature;
    };
    // constant-time comparison
    if keyed_mac(secret, encoded).verify_slice(&provided).is_err() {
        return GrantVerdict::InvalidSignature;
    }

    if payload.e <= now_secs {
        return GrantVerdict::Expired;
    }

    let Ok(expected) = hash_url(url) else {
        return GrantVerdict::UrlMismatch;
    };
    if !constant_time_eq(payload.u.as_bytes(), expected.as_bytes()) {
        return GrantVerdict::UrlMismatch;
    }

    GrantVerdict::Valid {
        expires_at: payload.e,
    }
}

pub(crate) fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter().zip(right).fold(0u8, |acc, (l, r)| acc | (l ^ r)) == 0
}

/// Value of the grant cookie from a `Cookie` header
pub fn read_grant_cookie(cookie_header: Option<&str>) -> Option<String> {
    let prefix = format!("{GRANT_COOKIE_NAME}=");
    cookie_header?
        .split(';')
        .map(str::trim)
        .find_map(|entry| entry.strip_prefix(prefix.as_str()))
        .filter(|value| !value.is_empty())
        .map(|value| match urlencoding::decode(value) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => value.to_string(),
        })
}

pub fn grant_cookie(token: &str, ttl_secs: u64, secure: bool) -> String {
    let mut attributes = vec![
        format!("{GRANT_COOKIE_NAME}={}", urlencoding::encode(token)),
        format!("Max-Age={ttl_secs}"),
        format!("Path={GRANT_COOKIE_PATH}"),
        "HttpOnly".to_string(),
        "SameSite=Lax".to_string(),
    ];
    if secure {
        attributes.push("Secure".to_string());
    }
    attributes.join("; ")
}
