use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
};

use super::delegate::DelegateOutcome;
use super::error::AnalyzeError;
use super::gateway::{self, AnalyzeCall};
use super::models::{AnalyzeRpcResponse, HealthResponse};
use super::state::AppState;
use super::{utils, validation};
use crate::diagnostics::redact::redact_url;
use crate::diagnostics::{DiagnosticEvent, RequestContext, RequestScope};

/// Canonical analyze endpoint (POST /resource/analyze)
pub async fn analyze_post(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    gateway::handle_analyze(&state, &method, &uri, &headers, AnalyzeCall::Post(body)).await
}

/// Deprecated query form (GET /resource/analyze?url=...&format=...)
pub async fn analyze_get(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    let query = uri.query().map(str::to_owned);
    gateway::handle_analyze(&state, &method, &uri, &headers, AnalyzeCall::LegacyGet(query)).await
}

/// Analyzer service RPC endpoint (POST /analyze)
///
/// Always runs the pipeline in-process and answers with the typed envelope the
/// gateway's RPC delegate decodes. Requires `x-api-key` when `ANALYZE_API_KEY` is set.
pub async fn analyze_rpc(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Body,
) -> Response {
    let ctx = RequestContext::new(
        utils::request_id(&headers),
        utils::http_metadata(method.as_str(), uri.path(), &headers),
    );
    let mut scope = RequestScope::new(ctx, state.logger.clone());
    scope.set_message("Analyzer RPC Request");
    scope.set("apiContract", "rpc");

    let response = match rpc(&state, &headers, body, &mut scope).await {
        Ok(outcome) => {
            gateway::record_outcome(&state, &mut scope, &outcome);
            Json(AnalyzeRpcResponse {
                success: true,
                request_id: Some(scope.request_id.clone()),
                file_size: Some(outcome.file_size),
                results: Some(outcome.results),
                diagnostics: Some(outcome.diagnostics),
                error: None,
            })
            .into_response()
        }
        Err(error) => gateway::failure_response(&state, &mut scope, error),
    };

    scope.set_status(response.status().as_u16());
    response
}

async fn rpc(
    state: &AppState,
    headers: &HeaderMap,
    body: Body,
    ctx: &mut RequestContext,
) -> Result<DelegateOutcome, AnalyzeError> {
    utils::check_api_key(headers, state.config.secrets.analyzer_api_key.as_deref())?;
    utils::check_json_content_type(headers)?;

    let limit = usize::try_from(state.config.server.max_payload_bytes.as_u64()).unwrap_or(usize::MAX);
    let bytes = utils::read_body(body, limit).await?;
    let input = validation::parse_body(&bytes, &state.formats)?;

    state.bus.publish(
        ctx,
        DiagnosticEvent::RequestStarted {
            api_contract: "rpc",
            target_url: redact_url(&input.url),
            formats: input.formats.iter().map(|f| f.as_str().to_string()).collect(),
        },
    );

    gateway::run_delegate(state, &input, ctx).await
}

/// Health check endpoint (GET /health)
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = HealthResponse {
        status: "healthy".to_string(),
        service: state.config.telemetry.service_name.clone(),
        delegation: state.delegate.mode().as_str().to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    };
    (StatusCode::OK, Json(response))
}
