//! Where fetch + analyze runs: in this process, or on the analyzer service over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

use super::models::{AnalyzeRpcRequest, AnalyzeRpcResponse, ErrorBody, PipelineDiagnostics};
use super::utils::{CF_RAY, X_API_KEY};
use super::validation::AnalyzeInput;
use crate::analyzer::{
    AnalysisEngine, AnalyzeRequest, AnalyzerDriver, DriverError, DriverOptions, EngineError,
    EngineFactory, ProbeEngine,
};
use crate::config::{Config, DelegationMode};
use crate::fetch::{FetchError, FetchRequest, RemoteFetcher};
use crate::humanize::ByteSize;

/// Longest slice of an unexpected analyzer body kept for the request log
pub const RESPONSE_PREVIEW_CHARS: usize = 240;

const RPC_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq)]
pub struct DelegateOutcome {
    pub file_size: u64,
    pub results: BTreeMap<String, String>,
    pub diagnostics: PipelineDiagnostics,
}

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("analysis task aborted: {0}")]
    Aborted(String),

    #[error("delegated analysis timed out after {0:?}")]
    Timeout(Duration),

    #[error("analyzer endpoint is not configured")]
    NotConfigured,

    #[error("analyzer service unreachable: {0}")]
    Unreachable(String),

    #[error("analyzer answered HTTP {status} with content type '{content_type}'")]
    InvalidContentType {
        status: u16,
        content_type: String,
        preview: String,
    },

    #[error("analyzer answered malformed JSON: {detail}")]
    InvalidJson {
        status: u16,
        detail: String,
        preview: String,
    },

    #[error("analyzer response is missing results or diagnostics")]
    Incomplete { status: u16 },

    #[error("analyzer reported {}: {}", .error.code.as_str(), .error.message)]
    Remote {
        status: u16,
        error: ErrorBody,
        diagnostics: Option<PipelineDiagnostics>,
    },
}

impl DelegateError {
    /// Fields describing the analyzer exchange, for the request context
    pub fn exchange_fields(&self) -> Vec<(&'static str, Value)> {
        match self {
            DelegateError::InvalidContentType {
                status,
                content_type,
                preview,
            } => vec![
                ("analyzerStatus", json!(status)),
                ("analyzerContentType", json!(content_type)),
                ("analyzerResponsePreview", json!(preview)),
            ],
            DelegateError::InvalidJson {
                status,
                detail,
                preview,
            } => vec![
                ("analyzerStatus", json!(status)),
                ("analyzerJsonError", json!(detail)),
                ("analyzerResponsePreview", json!(preview)),
            ],
            DelegateError::Incomplete { status } | DelegateError::Remote { status, .. } => {
                vec![("analyzerStatus", json!(status))]
            }
            _ => Vec::new(),
        }
    }
}

fn preview(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(RESPONSE_PREVIEW_CHARS)
        .collect()
}

#[async_trait]
pub trait Delegate: Send + Sync {
    fn mode(&self) -> DelegationMode;

    async fn analyze(
        &self,
        request_id: &str,
        input: &AnalyzeInput,
    ) -> Result<DelegateOutcome, DelegateError>;
}

fn probe_engine() -> Result<Box<dyn AnalysisEngine>, EngineError> {
    Ok(Box::new(ProbeEngine::new()))
}

/// The built-in signature engine
pub fn default_engines() -> Arc<dyn EngineFactory> {
    Arc::new(probe_engine)
}

/// Fetches and analyzes in this process. The driver runs on the blocking pool.
#[derive(Clone)]
pub struct LocalDelegate {
    fetcher: RemoteFetcher,
    driver: AnalyzerDriver,
    engines: Arc<dyn EngineFactory>,
    max_bytes: ByteSize,
}

impl LocalDelegate {
    pub fn new(config: &Config, engines: Arc<dyn EngineFactory>) -> Result<Self, DelegateError> {
        let driver = AnalyzerDriver::new(DriverOptions {
            chunk_size: usize::try_from(config.analyzer.chunk_size.as_u64()).unwrap_or(usize::MAX),
            max_steps: config.analyzer.max_steps,
        });
        Ok(Self {
            fetcher: RemoteFetcher::new(&config.fetch)?,
            driver,
            engines,
            max_bytes: config.fetch.max_bytes,
        })
    }
}

#[async_trait]
impl Delegate for LocalDelegate {
    fn mode(&self) -> DelegationMode {
        DelegationMode::Local
    }

    async fn analyze(
        &self,
        request_id: &str,
        input: &AnalyzeInput,
    ) -> Result<DelegateOutcome, DelegateError> {
        let fetched = self
            .fetcher
            .fetch(
                &FetchRequest::builder()
                    .url(input.url.as_str())
                    .max_bytes(self.max_bytes)
                    .build(),
            )
            .await?;

        let request = AnalyzeRequest::builder()
            .buffer(fetched.buffer.clone())
            .declared_size(fetched.declared_file_size)
            .filename(fetched.filename.as_str())
            .formats(input.formats.clone())
            .build();

        let driver = self.driver.clone();
        let engines = Arc::clone(&self.engines);
        let analysis = tokio::task::spawn_blocking(move || {
            let mut engine = engines.create()?;
            driver
                .analyze(engine.as_mut(), &request)
                .map_err(DelegateError::from)
        })
        .await
        .map_err(|e| DelegateError::Aborted(e.to_string()))??;

        debug!(
            request_id,
            formats = analysis.results_by_format.len(),
            "Local analysis finished"
        );

        Ok(DelegateOutcome {
            file_size: fetched.declared_file_size,
            results: analysis.results_by_format,
            diagnostics: PipelineDiagnostics {
                fetch: fetched.diagnostics,
                analysis: analysis.diagnostics,
            },
        })
    }
}

/// Calls `POST {endpoint}/analyze` on a separately deployed analyzer service.
#[derive(Debug, Clone)]
pub struct RpcDelegate {
    client: Client,
    analyze_url: String,
    api_key: Option<String>,
}

impl RpcDelegate {
    pub fn new(endpoint: &str, api_key: Option<String>) -> Result<Self, DelegateError> {
        let client = Client::builder()
            .connect_timeout(RPC_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| DelegateError::Unreachable(e.to_string()))?;
        Ok(Self {
            client,
            analyze_url: format!("{}/analyze", endpoint.trim_end_matches('/')),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    fn decode(status: u16, content_type: &str, body: &[u8]) -> Result<DelegateOutcome, DelegateError> {
        if !content_type.contains("application/json") {
            return Err(DelegateError::InvalidContentType {
                status,
                content_type: content_type.to_string(),
                preview: preview(body),
            });
        }

        let parsed: AnalyzeRpcResponse =
            serde_json::from_slice(body).map_err(|e| DelegateError::InvalidJson {
                status,
                detail: e.to_string(),
                preview: preview(body),
            })?;

        if !parsed.success {
            return match parsed.error {
                Some(error) => Err(DelegateError::Remote {
                    status,
                    error,
                    diagnostics: parsed.diagnostics,
                }),
                None => Err(DelegateError::Incomplete { status }),
            };
        }

        match (parsed.results, parsed.diagnostics) {
            (Some(results), Some(diagnostics)) => Ok(DelegateOutcome {
                file_size: parsed.file_size.unwrap_or(0),
                results,
                diagnostics,
            }),
            _ => Err(DelegateError::Incomplete { status }),
        }
    }
}

#[async_trait]
impl Delegate for RpcDelegate {
    fn mode(&self) -> DelegationMode {
        DelegationMode::Rpc
    }

    async fn analyze(
        &self,
        request_id: &str,
        input: &AnalyzeInput,
    ) -> Result<DelegateOutcome, DelegateError> {
        let payload = AnalyzeRpcRequest {
            url: input.url.clone(),
            format: input.formats.iter().map(|f| f.as_str().to_string()).collect(),
        };

        let mut request = self
            .client
            .post(&self.analyze_url)
            .header(CF_RAY, request_id)
            .json(&payload);
        if let Some(key) = &self.api_key {
            request = request.header(X_API_KEY, key);
        }

        let response = request.send().await.map_err(|e| {
            let detail = e.without_url().to_string();
            warn!(request_id, error = %detail, "Analyzer call failed");
            DelegateError::Unreachable(detail)
        })?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let body = response
            .bytes()
            .await
            .map_err(|e| DelegateError::Unreachable(e.to_string()))?;

        debug!(request_id, status, content_type = %content_type, "Analyzer answered");
        Self::decode(status, &content_type, &body)
    }
}

/// Delegate selected by `delegation.mode`
pub fn from_config(config: &Config) -> Result<Arc<dyn Delegate>, DelegateError> {
    match config.delegation.mode {
        DelegationMode::Local => Ok(Arc::new(LocalDelegate::new(config, default_engines())?)),
        DelegationMode::Rpc => {
            let endpoint = config
                .delegation
                .endpoint
                .as_deref()
                .ok_or(DelegateError::NotConfigured)?;
            Ok(Arc::new(RpcDelegate::new(
                endpoint,
                config.secrets.analyzer_api_key.clone(),
            )?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::error::ErrorCode;

    const SUCCESS: &str = r#"{
        "success": true,
        "requestId": "r1",
        "fileSize": 1000,
        "results": {"json": "{}"},
        "diagnostics": {
            "fetch": {"resolvedFilename": "a.mp4", "chunkCount": 1, "elapsedMs": 3, "wasTruncated": false},
            "analysis": {"formatErrors": {}}
        }
    }"#;

    #[test]
    fn test_decode_success() {
        let outcome = RpcDelegate::decode(200, "application/json", SUCCESS.as_bytes()).unwrap();
        assert_eq!(outcome.file_size, 1000);
        assert_eq!(outcome.results["json"], "{}");
        assert_eq!(outcome.diagnostics.fetch.resolved_filename, "a.mp4");
    }

    #[test]
    fn test_decode_rejects_non_json_with_preview() {
        let body = "x".repeat(1000);
        let err = RpcDelegate::decode(200, "text/html; charset=utf-8", body.as_bytes()).unwrap_err();
        match &err {
            DelegateError::InvalidContentType { preview, .. } => {
                assert_eq!(preview.chars().count(), RESPONSE_PREVIEW_CHARS)
            }
            other => panic!("unexpected {other:?}"),
        }
        let fields = err.exchange_fields();
        assert!(fields.iter().any(|(key, _)| *key == "analyzerResponsePreview"));
    }

    #[test]
    fn test_decode_malformed_and_incomplete() {
        assert!(matches!(
            RpcDelegate::decode(200, "application/json", b"{not json"),
            Err(DelegateError::InvalidJson { .. })
        ));
        assert!(matches!(
            RpcDelegate::decode(200, "application/json", br#"{"success":true,"results":{}}"#),
            Err(DelegateError::Incomplete { status: 200 })
        ));
    }

    #[test]
    fn test_decode_remote_failure() {
        let body = br#"{"success":false,"requestId":"r","error":{"code":"CPU_BUDGET_EXCEEDED","message":"Analysis too heavy for this worker tier.","retryable":true}}"#;
        match RpcDelegate::decode(503, "application/json", body) {
            Err(DelegateError::Remote { status, error, .. }) => {
                assert_eq!(status, 503);
                assert_eq!(error.code, ErrorCode::CpuBudgetExceeded);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_rpc_url_joins_endpoint() {
        let delegate = RpcDelegate::new("http://analyzer:8081/", Some(" ".into())).unwrap();
        assert_eq!(delegate.analyze_url, "http://analyzer:8081/analyze");
        assert!(delegate.api_key.is_none());
    }
}
