use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use super::error::ErrorCode;
use crate::analyzer::AnalysisDiagnostics;
use crate::fetch::FetchDiagnostics;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
    pub retryable: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SuccessEnvelope {
    pub success: bool,
    pub request_id: String,
    pub results: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<PipelineDiagnostics>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEnvelope {
    pub success: bool,
    pub request_id: String,
    pub error: ErrorBody,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PipelineDiagnostics {
    pub fetch: FetchDiagnostics,
    pub analysis: AnalysisDiagnostics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub delegation: String,
    pub version: String,
}

/// Body of `POST /analyze` on the analyzer service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeRpcRequest {
    pub url: String,
    pub format: Vec<String>,
}

/// Analyzer service reply, either envelope shape. Every field is optional so
/// an incomplete success can be told apart from malformed JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRpcResponse {
    pub success: bool,
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<PipelineDiagnostics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_envelope_shape() {
        let mut results = BTreeMap::new();
        results.insert("json".to_string(), "{}".to_string());
        let envelope = SuccessEnvelope {
            success: true,
            request_id: "abc".into(),
            results,
            diagnostics: None,
        };

        let value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["requestId"], "abc");
        assert_eq!(value["results"]["json"], "{}");
        assert!(value.get("diagnostics").is_none());
    }

    #[test]
    fn test_rpc_failure_parses() {
        let parsed: AnalyzeRpcResponse = serde_json::from_str(
            r#"{"success":false,"requestId":"r","error":{"code":"CPU_BUDGET_EXCEEDED","message":"heavy","retryable":true}}"#,
        )
        .unwrap();
        let error = parsed.error.unwrap();
        assert_eq!(error.code, ErrorCode::CpuBudgetExceeded);
        assert!(parsed.results.is_none());
    }
}
