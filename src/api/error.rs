use axum::{
    Json,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::delegate::DelegateError;
use super::models::{ErrorBody, FailureEnvelope};
use super::validation::InputError;
use crate::analyzer::{DriverError, EngineError};
use crate::diagnostics::Severity;
use crate::fetch::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    AuthRequired,
    AuthInvalid,
    RateLimited,
    ValidationFailed,
    CpuBudgetExceeded,
    UpstreamFetchFailed,
    InternalError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "AUTH_REQUIRED",
            ErrorCode::AuthInvalid => "AUTH_INVALID",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
            ErrorCode::CpuBudgetExceeded => "CPU_BUDGET_EXCEEDED",
            ErrorCode::UpstreamFetchFailed => "UPSTREAM_FETCH_FAILED",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Class recorded when the code arrives from the analyzer service
    pub fn remote_class(&self) -> &'static str {
        match self {
            ErrorCode::AuthRequired => "ANALYZE_AUTH_REQUIRED",
            ErrorCode::AuthInvalid => "ANALYZE_AUTH_INVALID",
            ErrorCode::RateLimited => "ANALYZE_RATE_LIMITED",
            ErrorCode::ValidationFailed => "ANALYZE_VALIDATION_FAILED",
            ErrorCode::CpuBudgetExceeded => "CPU_LIMIT_EXCEEDED",
            ErrorCode::UpstreamFetchFailed => "ANALYZE_UPSTREAM_FETCH_FAILED",
            ErrorCode::InternalError => "ANALYZE_INTERNAL_ERROR",
        }
    }
}

/// Outward failure: one taxonomy code plus the transport details.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AnalyzeError {
    pub code: ErrorCode,
    pub status: StatusCode,
    pub message: String,
    pub retryable: bool,
    /// Finer-grained cause recorded on the request context
    pub class: &'static str,
    pub retry_after: Option<u64>,
    /// Log-only detail, never sent to the caller
    pub detail: Option<String>,
    /// Fetch/analysis diagnostics relayed from the analyzer service
    pub diagnostics: Option<Value>,
}

impl AnalyzeError {
    pub fn new(
        code: ErrorCode,
        status: StatusCode,
        message: impl Into<String>,
        retryable: bool,
        class: &'static str,
    ) -> Self {
        Self {
            code,
            status,
            message: message.into(),
            retryable,
            class,
            retry_after: None,
            detail: None,
            diagnostics: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn missing_api_key() -> Self {
        Self::new(
            ErrorCode::AuthRequired,
            StatusCode::UNAUTHORIZED,
            "Missing API key.",
            false,
            "ANALYZE_AUTH_FAILED",
        )
    }

    pub fn invalid_api_key() -> Self {
        Self::new(
            ErrorCode::AuthInvalid,
            StatusCode::FORBIDDEN,
            "Invalid API key.",
            false,
            "ANALYZE_AUTH_FAILED",
        )
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        let mut error = Self::new(
            ErrorCode::RateLimited,
            StatusCode::TOO_MANY_REQUESTS,
            "Too many analysis requests. Please retry shortly.",
            true,
            "ANALYZE_RATE_LIMITED",
        );
        error.retry_after = Some(retry_after_secs.max(1));
        error
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            StatusCode::UNPROCESSABLE_ENTITY,
            message,
            false,
            "ANALYZE_VALIDATION_FAILED",
        )
    }

    pub fn payload_too_large(limit: u64) -> Self {
        Self::new(
            ErrorCode::ValidationFailed,
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body is too large.",
            false,
            "ANALYZE_VALIDATION_FAILED",
        )
        .with_detail(format!("limit={limit}"))
    }

    pub fn verification_required() -> Self {
        Self::new(
            ErrorCode::AuthRequired,
            StatusCode::FORBIDDEN,
            "Security verification is required. Please complete the check.",
            false,
            "ANALYZE_AUTH_FAILED",
        )
    }

    pub fn verification_failed() -> Self {
        Self::new(
            ErrorCode::AuthInvalid,
            StatusCode::FORBIDDEN,
            "Security check failed. Please refresh and try again.",
            false,
            "ANALYZE_AUTH_FAILED",
        )
    }

    pub fn verification_misconfigured() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Security verification is currently unavailable. Please try again later.",
            true,
            "TURNSTILE_MISCONFIGURED",
        )
    }

    pub fn verification_unavailable() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::SERVICE_UNAVAILABLE,
            "Unable to validate the security check right now. Please try again.",
            true,
            "TURNSTILE_VERIFY_UNAVAILABLE",
        )
    }

    pub fn analyzer_unavailable() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::SERVICE_UNAVAILABLE,
            "Analyzer service binding is unavailable. Please try again shortly.",
            true,
            "ANALYZER_BINDING_MISSING",
        )
    }

    pub fn analyzer_invalid_response() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::BAD_GATEWAY,
            "Analyzer service returned an unexpected response. Please retry.",
            true,
            "ANALYZER_INVALID_RESPONSE",
        )
    }

    pub fn analyzer_invalid_json() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::BAD_GATEWAY,
            "Analyzer service returned malformed data. Please retry.",
            true,
            "ANALYZER_INVALID_JSON",
        )
    }

    pub fn analyzer_incomplete() -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::BAD_GATEWAY,
            "Analyzer response was incomplete. Please retry.",
            true,
            "ANALYZER_RESPONSE_INCOMPLETE",
        )
    }

    pub fn timeout() -> Self {
        Self::new(
            ErrorCode::UpstreamFetchFailed,
            StatusCode::GATEWAY_TIMEOUT,
            "Analysis request timed out upstream. Please retry with a smaller or simpler source URL.",
            true,
            "ANALYZER_TIMEOUT",
        )
    }

    pub fn cpu_budget_exceeded() -> Self {
        Self::new(
            ErrorCode::CpuBudgetExceeded,
            StatusCode::SERVICE_UNAVAILABLE,
            "CPU budget exceeded while analyzing this source. Please retry with a smaller or simpler media file.",
            true,
            "CPU_LIMIT_EXCEEDED",
        )
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalError,
            StatusCode::INTERNAL_SERVER_ERROR,
            "An unexpected error occurred.",
            true,
            "ANALYZE_INTERNAL_ERROR",
        )
        .with_detail(detail)
    }

    /// Server-side failures log at ERROR, caller-side ones at WARNING.
    pub fn severity(&self) -> Severity {
        if self.status.is_server_error() {
            Severity::Error
        } else {
            Severity::Warning
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            code: self.code,
            message: self.message.clone(),
            retryable: self.retryable,
        }
    }
}

impl From<FetchError> for AnalyzeError {
    fn from(error: FetchError) -> Self {
        match &error {
            FetchError::InvalidUrl(_) => AnalyzeError::validation(error.to_string()),
            FetchError::Timeout => AnalyzeError::timeout(),
            FetchError::Client(detail) => AnalyzeError::internal(detail.clone()),
            FetchError::Unreachable(detail) | FetchError::Body(detail) => AnalyzeError::new(
                ErrorCode::UpstreamFetchFailed,
                StatusCode::BAD_GATEWAY,
                error.to_string(),
                true,
                "ANALYZE_UPSTREAM_FETCH_FAILED",
            )
            .with_detail(detail.clone()),
            _ => AnalyzeError::new(
                ErrorCode::UpstreamFetchFailed,
                StatusCode::BAD_GATEWAY,
                error.to_string(),
                error.is_retryable(),
                "ANALYZE_UPSTREAM_FETCH_FAILED",
            ),
        }
    }
}

impl From<InputError> for AnalyzeError {
    fn from(error: InputError) -> Self {
        AnalyzeError::validation(error.to_string())
    }
}

impl From<DriverError> for AnalyzeError {
    fn from(error: DriverError) -> Self {
        match error {
            e if e.is_resource_exhaustion() => {
                AnalyzeError::cpu_budget_exceeded().with_detail(e.to_string())
            }
            DriverError::NoFormats => AnalyzeError::validation("At least one format is required."),
            e => AnalyzeError::new(
                ErrorCode::InternalError,
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to analyze the media file.",
                true,
                "ANALYZE_INTERNAL_ERROR",
            )
            .with_detail(e.to_string()),
        }
    }
}

impl From<EngineError> for AnalyzeError {
    fn from(error: EngineError) -> Self {
        match error {
            EngineError::ResourceExhausted(detail) => {
                AnalyzeError::cpu_budget_exceeded().with_detail(detail)
            }
            e => AnalyzeError::internal(e.to_string()),
        }
    }
}

impl From<DelegateError> for AnalyzeError {
    fn from(error: DelegateError) -> Self {
        match error {
            DelegateError::Fetch(e) => e.into(),
            DelegateError::Driver(e) => e.into(),
            DelegateError::Engine(e) => e.into(),
            DelegateError::Timeout(limit) => {
                AnalyzeError::timeout().with_detail(format!("limit={}ms", limit.as_millis()))
            }
            DelegateError::NotConfigured => AnalyzeError::analyzer_unavailable(),
            e @ DelegateError::Unreachable(_) => {
                AnalyzeError::analyzer_unavailable().with_detail(e.to_string())
            }
            e @ DelegateError::Aborted(_) => AnalyzeError::internal(e.to_string()),
            e @ DelegateError::InvalidContentType { .. } => {
                AnalyzeError::analyzer_invalid_response().with_detail(e.to_string())
            }
            e @ DelegateError::InvalidJson { .. } => {
                AnalyzeError::analyzer_invalid_json().with_detail(e.to_string())
            }
            DelegateError::Incomplete { .. } => AnalyzeError::analyzer_incomplete(),
            DelegateError::Remote {
                status,
                error,
                diagnostics,
            } => {
                let status = StatusCode::from_u16(status)
                    .ok()
                    .filter(|s| s.is_client_error() || s.is_server_error())
                    .unwrap_or(StatusCode::BAD_GATEWAY);
                let mut mapped = AnalyzeError::new(
                    error.code,
                    status,
                    error.message,
                    error.retryable,
                    error.code.remote_class(),
                );
                mapped.diagnostics = diagnostics.and_then(|d| serde_json::to_value(d).ok());
                mapped
            }
        }
    }
}

/// A failure bound to the request it answers
#[derive(Debug)]
pub struct ErrorReply {
    pub request_id: String,
    pub error: AnalyzeError,
}

impl IntoResponse for ErrorReply {
    fn into_response(self) -> Response {
        let envelope = FailureEnvelope {
            success: false,
            request_id: self.request_id,
            error: self.error.body(),
            diagnostics: self.error.diagnostics.clone(),
        };
        let mut response = (self.error.status, Json(envelope)).into_response();
        if let Some(secs) = self.error.retry_after {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_errors_map_to_upstream() {
        let not_found = AnalyzeError::from(FetchError::NotFound);
        assert_eq!(not_found.code, ErrorCode::UpstreamFetchFailed);
        assert_eq!(not_found.status, StatusCode::BAD_GATEWAY);
        assert!(!not_found.retryable);

        let rate_limited = AnalyzeError::from(FetchError::ProviderRateLimited);
        assert!(rate_limited.retryable);
        assert!(rate_limited.message.contains("24 hours"));

        let timeout = AnalyzeError::from(FetchError::Timeout);
        assert_eq!(timeout.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(timeout.retryable);

        let unreachable = AnalyzeError::from(FetchError::Unreachable("dns error".into()));
        assert_eq!(unreachable.detail.as_deref(), Some("dns error"));
        assert!(!unreachable.message.contains("dns"));
    }

    #[test]
    fn test_budget_errors_are_structural() {
        let error = AnalyzeError::from(DriverError::BudgetExceeded { max_steps: 10 });
        assert_eq!(error.code, ErrorCode::CpuBudgetExceeded);
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert!(error.retryable);

        let error = AnalyzeError::from(DriverError::ResourceExhausted("cpu".into()));
        assert_eq!(error.class, "CPU_LIMIT_EXCEEDED");
    }

    #[test]
    fn test_remote_failures_keep_code_and_status() {
        let error = AnalyzeError::from(DelegateError::Remote {
            status: 503,
            error: ErrorBody {
                code: ErrorCode::CpuBudgetExceeded,
                message: "Analysis too heavy for this worker tier.".into(),
                retryable: true,
            },
            diagnostics: None,
        });
        assert_eq!(error.code, ErrorCode::CpuBudgetExceeded);
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(error.class, "CPU_LIMIT_EXCEEDED");
        assert!(error.retryable);

        let odd_status = AnalyzeError::from(DelegateError::Remote {
            status: 200,
            error: ErrorBody {
                code: ErrorCode::InternalError,
                message: "x".into(),
                retryable: false,
            },
            diagnostics: None,
        });
        assert_eq!(odd_status.status, StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_delegation_timeout_is_retryable_upstream_failure() {
        let error = AnalyzeError::from(DelegateError::Timeout(std::time::Duration::from_secs(60)));
        assert_eq!(error.code, ErrorCode::UpstreamFetchFailed);
        assert_eq!(error.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(error.retryable);
        assert_eq!(error.class, "ANALYZER_TIMEOUT");
    }

    #[test]
    fn test_severity_follows_status() {
        assert_eq!(AnalyzeError::rate_limited(3).severity(), Severity::Warning);
        assert_eq!(AnalyzeError::analyzer_incomplete().severity(), Severity::Error);
    }

    #[test]
    fn test_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::CpuBudgetExceeded).unwrap();
        assert_eq!(json, "\"CPU_BUDGET_EXCEEDED\"");
        let parsed: ErrorCode = serde_json::from_str("\"UPSTREAM_FETCH_FAILED\"").unwrap();
        assert_eq!(parsed, ErrorCode::UpstreamFetchFailed);
    }
}
