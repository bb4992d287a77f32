use serde::Serialize;
use serde_json::{Value, json};
use std::fmt;
use std::sync::Arc;

use super::context::{RequestContext, Severity};
use crate::analyzer::AnalysisDiagnostics;
use crate::fetch::FetchDiagnostics;

/// Presence and length of a client-supplied credential. Never the value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenSummary {
    pub provided: bool,
    pub length: usize,
}

impl TokenSummary {
    pub fn of(token: Option<&str>) -> Self {
        let trimmed = token.map(str::trim).unwrap_or_default();
        Self {
            provided: !trimmed.is_empty(),
            length: trimmed.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationSummary {
    pub enabled: bool,
    /// `grant`, `challenge`, `disabled` or `rejected`
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grant: Option<&'static str>,
    pub challenge: TokenSummary,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub error_codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveHint {
    pub archive_name: String,
    pub inner_filename: String,
}

/// Typed diagnostics events. Correlation comes from the `RequestContext` they are
/// published into.
#[derive(Debug, Clone)]
pub enum DiagnosticEvent {
    RequestStarted {
        api_contract: &'static str,
        target_url: String,
        formats: Vec<String>,
    },
    VerificationChecked(VerificationSummary),
    FetchCompleted {
        filename: String,
        file_size: u64,
        diagnostics: FetchDiagnostics,
    },
    AnalysisCompleted {
        diagnostics: AnalysisDiagnostics,
        archive: Option<ArchiveHint>,
    },
    ErrorRaised {
        code: &'static str,
        class: &'static str,
        message: String,
        retryable: bool,
        severity: Severity,
        detail: Option<String>,
    },
}

impl DiagnosticEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            DiagnosticEvent::RequestStarted { .. } => "request_started",
            DiagnosticEvent::VerificationChecked(_) => "verification_checked",
            DiagnosticEvent::FetchCompleted { .. } => "fetch_completed",
            DiagnosticEvent::AnalysisCompleted { .. } => "analysis_completed",
            DiagnosticEvent::ErrorRaised { .. } => "error_raised",
        }
    }
}

pub trait DiagnosticSubscriber: Send + Sync {
    fn on_event(&self, ctx: &mut RequestContext, event: &DiagnosticEvent);
}

/// Explicitly constructed publish/subscribe hub. Subscribers are registered once at
/// startup and invoked in registration order.
#[derive(Clone, Default)]
pub struct DiagnosticsBus {
    subscribers: Vec<Arc<dyn DiagnosticSubscriber>>,
}

impl DiagnosticsBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, subscriber: Arc<dyn DiagnosticSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn with_subscriber(mut self, subscriber: Arc<dyn DiagnosticSubscriber>) -> Self {
        self.subscribe(subscriber);
        self
    }

    pub fn publish(&self, ctx: &mut RequestContext, event: DiagnosticEvent) {
        tracing::trace!(event = event.kind(), request_id = %ctx.request_id, "Diagnostic event");
        for subscriber in &self.subscribers {
            subscriber.on_event(ctx, &event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

impl fmt::Debug for DiagnosticsBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticsBus")
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

/// Folds events into the request's custom context.
#[derive(Debug, Default)]
pub struct ContextRecorder;

impl DiagnosticSubscriber for ContextRecorder {
    fn on_event(&self, ctx: &mut RequestContext, event: &DiagnosticEvent) {
        match event {
            DiagnosticEvent::RequestStarted {
                api_contract,
                target_url,
                formats,
            } => {
                ctx.set("apiContract", *api_contract);
                ctx.set("targetUrl", target_url.as_str());
                ctx.set("formats", json!(formats));
            }
            DiagnosticEvent::VerificationChecked(summary) => {
                ctx.set("turnstile", to_value(summary));
            }
            DiagnosticEvent::FetchCompleted {
                filename,
                file_size,
                diagnostics,
            } => {
                ctx.set("filename", filename.as_str());
                ctx.set("fileSize", *file_size);
                ctx.set("fetch", to_value(diagnostics));
            }
            DiagnosticEvent::AnalysisCompleted {
                diagnostics,
                archive,
            } => {
                ctx.set("analysis", to_value(diagnostics));
                if let Some(hint) = archive {
                    ctx.set("archiveName", hint.archive_name.as_str());
                    ctx.set("innerFilename", hint.inner_filename.as_str());
                }
            }
            DiagnosticEvent::ErrorRaised {
                code,
                class,
                message,
                retryable,
                severity,
                detail,
            } => {
                ctx.escalate(*severity);
                ctx.set_message(message.as_str());
                ctx.set(
                    "error",
                    json!({
                        "code": code,
                        "class": class,
                        "retryable": retryable,
                        "detail": detail,
                    }),
                );
            }
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}
