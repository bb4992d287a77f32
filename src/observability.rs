//! Tracing setup and process counters

use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::EnvFilter;

use crate::config::{LogFormat, TelemetryConfig};
use crate::diagnostics::{DiagnosticEvent, DiagnosticSubscriber, RequestContext};

/// Install the global `fmt` subscriber. `RUST_LOG` wins over the default `info`.
pub fn init_tracing(config: &TelemetryConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    let result = match config.log_format {
        LogFormat::Json => builder.json().flatten_event(true).try_init(),
        LogFormat::Text => builder.try_init(),
    };
    if let Err(e) = result {
        eprintln!("tracing already initialised: {e}");
    }
}

/// Metrics handle for recording counters
#[derive(Debug, Default)]
pub struct Metrics {
    requests_started: AtomicU64,
    requests_failed: AtomicU64,
    requests_rate_limited: AtomicU64,
    analyses_completed: AtomicU64,
    logs_emitted: AtomicU64,
    logs_dropped: AtomicU64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_started(&self) {
        self.requests_started.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "requests_started", "Metric incremented");
    }

    pub fn request_failed(&self) {
        self.requests_failed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "requests_failed", "Metric incremented");
    }

    pub fn rate_limited(&self) {
        self.requests_rate_limited.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "requests_rate_limited", "Metric incremented");
    }

    pub fn analysis_completed(&self) {
        self.analyses_completed.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(counter = "analyses_completed", "Metric incremented");
    }

    pub fn record_log(&self, emitted: bool) {
        if emitted {
            self.logs_emitted.fetch_add(1, Ordering::Relaxed);
        } else {
            self.logs_dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_started: self.requests_started.load(Ordering::Relaxed),
            requests_failed: self.requests_failed.load(Ordering::Relaxed),
            requests_rate_limited: self.requests_rate_limited.load(Ordering::Relaxed),
            analyses_completed: self.analyses_completed.load(Ordering::Relaxed),
            logs_emitted: self.logs_emitted.load(Ordering::Relaxed),
            logs_dropped: self.logs_dropped.load(Ordering::Relaxed),
        }
    }
}

impl DiagnosticSubscriber for Metrics {
    fn on_event(&self, _ctx: &mut RequestContext, event: &DiagnosticEvent) {
        match event {
            DiagnosticEvent::RequestStarted { .. } => self.request_started(),
            DiagnosticEvent::AnalysisCompleted { .. } => self.analysis_completed(),
            DiagnosticEvent::ErrorRaised { code, .. } => {
                if *code == "RATE_LIMITED" {
                    self.rate_limited();
                }
                self.request_failed();
            }
            DiagnosticEvent::VerificationChecked(_) | DiagnosticEvent::FetchCompleted { .. } => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub requests_started: u64,
    pub requests_failed: u64,
    pub requests_rate_limited: u64,
    pub analyses_completed: u64,
    pub logs_emitted: u64,
    pub logs_dropped: u64,
}
