//! The analyze pipeline: auth, quota, input, human verification, delegation and
//! the response envelope. Each stage can short-circuit with an [`AnalyzeError`].

use axum::Json;
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, header};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, error, warn};

use super::delegate::{DelegateError, DelegateOutcome};
use super::error::{AnalyzeError, ErrorReply};
use super::grant::{create_grant, grant_cookie, read_grant_cookie, verify_grant};
use super::models::SuccessEnvelope;
use super::state::AppState;
use super::turnstile::TURNSTILE_HEADER;
use super::utils::{self, CF_CONNECTING_IP};
use super::validation::{self, AnalyzeInput};
use crate::diagnostics::redact::redact_url;
use crate::diagnostics::{
    ArchiveHint, DiagnosticEvent, RequestContext, RequestScope, TokenSummary, VerificationSummary,
};

pub const LEGACY_GET_WARNING: &str =
    "299 - \"GET /resource/analyze is deprecated. Use POST /resource/analyze with JSON body.\"";

const REQUEST_MESSAGE: &str = "Media Analysis Request";

/// How the caller shaped the request
pub enum AnalyzeCall {
    /// `POST` with a JSON body
    Post(Body),
    /// Deprecated `GET` with the raw query string
    LegacyGet(Option<String>),
}

impl AnalyzeCall {
    pub fn api_contract(&self) -> &'static str {
        match self {
            AnalyzeCall::Post(_) => "post_json",
            AnalyzeCall::LegacyGet(_) => "legacy_get_query",
        }
    }

    pub fn is_legacy(&self) -> bool {
        matches!(self, AnalyzeCall::LegacyGet(_))
    }
}

pub async fn handle_analyze(
    state: &AppState,
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    call: AnalyzeCall,
) -> Response {
    let request_id = utils::request_id(headers);
    let ctx = RequestContext::new(
        request_id,
        utils::http_metadata(method.as_str(), uri.path(), headers),
    );
    let mut scope = RequestScope::new(ctx, state.logger.clone());
    scope.set_message(REQUEST_MESSAGE);
    scope.set("apiContract", call.api_contract());
    let legacy = call.is_legacy();

    let mut set_cookie = None;
    let mut response = match run(state, headers, call, &mut scope, &mut set_cookie).await {
        Ok(outcome) => success_response(state, &mut scope, outcome),
        Err(error) => failure_response(state, &mut scope, error),
    };

    let response_headers = response.headers_mut();
    if let Some(cookie) = set_cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        response_headers.insert(header::SET_COOKIE, cookie);
    }
    if legacy {
        response_headers.insert(
            HeaderName::from_static("deprecation"),
            HeaderValue::from_static("true"),
        );
        response_headers.insert(header::WARNING, HeaderValue::from_static(LEGACY_GET_WARNING));
    }

    scope.set_status(response.status().as_u16());
    response
}

async fn run(
    state: &AppState,
    headers: &HeaderMap,
    call: AnalyzeCall,
    ctx: &mut RequestContext,
    set_cookie: &mut Option<String>,
) -> Result<DelegateOutcome, AnalyzeError> {
    utils::check_api_key(headers, state.config.secrets.public_api_key.as_deref())?;

    if state.config.rate_limit.enabled {
        let decision = state.limiter.check(utils::client_ip(headers));
        if let Some(retry_after) = decision.retry_after_secs() {
            ctx.set("rateLimitSource", "in_memory");
            return Err(AnalyzeError::rate_limited(retry_after));
        }
    }

    let api_contract = call.api_contract();
    let input = match call {
        AnalyzeCall::Post(body) => {
            utils::check_json_content_type(headers)?;
            let limit = usize::try_from(state.config.server.max_payload_bytes.as_u64())
                .unwrap_or(usize::MAX);
            let bytes = utils::read_body(body, limit).await?;
            validation::parse_body(&bytes, &state.formats)?
        }
        AnalyzeCall::LegacyGet(query) => validation::parse_query(query.as_deref(), &state.formats)?,
    };

    state.bus.publish(
        ctx,
        DiagnosticEvent::RequestStarted {
            api_contract,
            target_url: redact_url(&input.url),
            formats: input.formats.iter().map(|f| f.as_str().to_string()).collect(),
        },
    );

    *set_cookie = verify_human(state, headers, &input, ctx).await?;

    run_delegate(state, &input, ctx).await
}

/// Run the delegate under the configured deadline.
pub(super) async fn run_delegate(
    state: &AppState,
    input: &AnalyzeInput,
    ctx: &mut RequestContext,
) -> Result<DelegateOutcome, AnalyzeError> {
    let timeout = state.config.delegation.timeout();
    ctx.set("delegation", state.delegate.mode().as_str());
    ctx.set("analyzerTimeoutMs", timeout.as_millis() as u64);

    let request_id = ctx.request_id.clone();
    let delegated = tokio::time::timeout(timeout, state.delegate.analyze(&request_id, input)).await;

    match delegated {
        Ok(Ok(outcome)) => Ok(outcome),
        Ok(Err(err)) => {
            for (key, value) in err.exchange_fields() {
                ctx.set(key, value);
            }
            Err(err.into())
        }
        Err(_) => {
            warn!(request_id = %request_id, timeout_ms = timeout.as_millis() as u64, "Delegated analysis timed out");
            Err(DelegateError::Timeout(timeout).into())
        }
    }
}

/// Honor a valid grant, otherwise require and check a challenge token.
/// Returns the `Set-Cookie` value for a freshly issued grant.
async fn verify_human(
    state: &AppState,
    headers: &HeaderMap,
    input: &AnalyzeInput,
    ctx: &mut RequestContext,
) -> Result<Option<String>, AnalyzeError> {
    let config = &state.config.turnstile;
    let token = headers
        .get(TURNSTILE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let summary = |outcome: &'static str, grant: Option<&'static str>, error_codes: Vec<String>| {
        VerificationSummary {
            enabled: config.enabled,
            outcome,
            grant,
            challenge: TokenSummary::of(token),
            error_codes,
        }
    };

    if !config.enabled {
        state.bus.publish(
            ctx,
            DiagnosticEvent::VerificationChecked(summary("disabled", None, Vec::new())),
        );
        return Ok(None);
    }

    let secrets = &state.config.secrets;
    let Some(secret) = secrets
        .turnstile_secret_key
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
    else {
        return Err(AnalyzeError::verification_misconfigured());
    };
    let signing_key = secrets
        .grant_signing_key()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(secret);

    let now = Utc::now().timestamp();
    let cookie = headers.get(header::COOKIE).and_then(|v| v.to_str().ok());
    let presented = read_grant_cookie(cookie);
    let verdict = verify_grant(signing_key, &input.url, presented.as_deref(), now);
    if verdict.is_valid() {
        state.bus.publish(
            ctx,
            DiagnosticEvent::VerificationChecked(summary("grant", Some(verdict.reason()), Vec::new())),
        );
        return Ok(None);
    }

    let Some(token) = token else {
        state.bus.publish(
            ctx,
            DiagnosticEvent::VerificationChecked(summary("rejected", Some(verdict.reason()), Vec::new())),
        );
        return Err(AnalyzeError::verification_required());
    };

    let remote_ip = headers
        .get(CF_CONNECTING_IP)
        .and_then(|v| v.to_str().ok());
    let outcome = state
        .verifier
        .verify(secret, token, remote_ip, &ctx.request_id)
        .await
        .map_err(|e| AnalyzeError::verification_unavailable().with_detail(e.to_string()))?;

    if !outcome.success {
        state.bus.publish(
            ctx,
            DiagnosticEvent::VerificationChecked(summary(
                "rejected",
                Some(verdict.reason()),
                outcome.error_codes,
            )),
        );
        return Err(AnalyzeError::verification_failed());
    }

    state.bus.publish(
        ctx,
        DiagnosticEvent::VerificationChecked(summary("challenge", Some(verdict.reason()), Vec::new())),
    );

    let issued = create_grant(signing_key, &input.url, now, config.grant_ttl_secs)
        .map_err(|e| AnalyzeError::internal(format!("grant issuance failed: {e}")))?;
    debug!(expires_at = issued.expires_at, "Verification grant issued");
    Ok(Some(grant_cookie(
        &issued.token,
        config.grant_ttl_secs,
        !state.config.telemetry.app_env.is_development(),
    )))
}

/// Publish the completion events for `outcome`
pub(super) fn record_outcome(state: &AppState, ctx: &mut RequestContext, outcome: &DelegateOutcome) {
    let fetch = &outcome.diagnostics.fetch;
    state.bus.publish(
        ctx,
        DiagnosticEvent::FetchCompleted {
            filename: fetch.resolved_filename.clone(),
            file_size: outcome.file_size,
            diagnostics: fetch.clone(),
        },
    );
    state.bus.publish(
        ctx,
        DiagnosticEvent::AnalysisCompleted {
            diagnostics: outcome.diagnostics.analysis.clone(),
            archive: archive_hint(&outcome.results, &fetch.resolved_filename),
        },
    );
}

fn success_response(state: &AppState, ctx: &mut RequestContext, outcome: DelegateOutcome) -> Response {
    record_outcome(state, ctx, &outcome);
    Json(SuccessEnvelope {
        success: true,
        request_id: ctx.request_id.clone(),
        results: outcome.results,
        diagnostics: Some(outcome.diagnostics),
    })
    .into_response()
}

pub(super) fn failure_response(
    state: &AppState,
    ctx: &mut RequestContext,
    error: AnalyzeError,
) -> Response {
    if error.status.is_server_error() {
        error!(
            request_id = %ctx.request_id,
            code = error.code.as_str(),
            class = error.class,
            detail = error.detail.as_deref().unwrap_or_default(),
            "Analyze request failed"
        );
    } else {
        debug!(request_id = %ctx.request_id, code = error.code.as_str(), "Analyze request rejected");
    }

    state.bus.publish(
        ctx,
        DiagnosticEvent::ErrorRaised {
            code: error.code.as_str(),
            class: error.class,
            message: error.message.clone(),
            retryable: error.retryable,
            severity: error.severity(),
            detail: error.detail.clone(),
        },
    );

    ErrorReply {
        request_id: ctx.request_id.clone(),
        error,
    }
    .into_response()
}

/// Archive container name from the General track of the JSON rendering
pub fn archive_hint(results: &BTreeMap<String, String>, filename: &str) -> Option<ArchiveHint> {
    let document: Value = serde_json::from_str(results.get("json")?).ok()?;
    let archive_name = document
        .get("media")?
        .get("track")?
        .as_array()?
        .iter()
        .find(|track| track.get("@type").and_then(Value::as_str) == Some("General"))?
        .get("Archive_Name")?
        .as_str()?;

    Some(ArchiveHint {
        archive_name: archive_name.to_string(),
        inner_filename: filename.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn results(json: &str) -> BTreeMap<String, String> {
        BTreeMap::from([("json".to_string(), json.to_string())])
    }

    #[test]
    fn test_archive_hint_from_general_track() {
        let hint = archive_hint(
            &results(r#"{"media":{"track":[{"@type":"General","Archive_Name":"pack.zip"}]}}"#),
            "inner.mkv",
        )
        .unwrap();
        assert_eq!(hint.archive_name, "pack.zip");
        assert_eq!(hint.inner_filename, "inner.mkv");
    }

    #[test]
    fn test_archive_hint_absent() {
        assert!(archive_hint(&results(r#"{"media":{"track":[{"@type":"General"}]}}"#), "a").is_none());
        assert!(archive_hint(&results("not json"), "a").is_none());
        assert!(archive_hint(&BTreeMap::new(), "a").is_none());
    }

    #[test]
    fn test_contract_names() {
        assert_eq!(AnalyzeCall::Post(Body::empty()).api_contract(), "post_json");
        let legacy = AnalyzeCall::LegacyGet(None);
        assert!(legacy.is_legacy());
        assert_eq!(legacy.api_contract(), "legacy_get_query");
    }
}
