use chrono::{SecondsFormat, Utc};
use serde_json::{Value, json};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use super::context::{RequestContext, Severity};
use super::redact::{redact_map, redact_url};
use super::sampling::TailSampler;
use crate::config::TelemetryConfig;
use crate::observability::Metrics;

/// Target of the one-per-request record
pub const REQUEST_LOG_TARGET: &str = "mediapeek::request";

/// Builds, samples and emits request records.
#[derive(Debug, Clone)]
pub struct RequestLogger {
    service: String,
    environment: &'static str,
    sampler: TailSampler,
    metrics: Option<Arc<Metrics>>,
}

impl RequestLogger {
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            service: config.service_name.clone(),
            environment: config.app_env.as_str(),
            sampler: TailSampler::from_config(config),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// The redacted record for `ctx`
    pub fn build_record(&self, ctx: &RequestContext) -> Value {
        let http = &ctx.http;
        let mut http_request = json!({
            "requestMethod": http.request_method,
            "requestUrl": redact_url(&http.request_url),
            "status": http.status,
            "latency": format!("{:.3}s", ctx.elapsed().as_secs_f64()),
        });
        if let Some(ip) = &http.remote_ip {
            http_request["remoteIp"] = Value::from(ip.as_str());
        }
        if let Some(agent) = &http.user_agent {
            http_request["userAgent"] = Value::from(agent.as_str());
        }

        json!({
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "service": self.service,
            "version": env!("CARGO_PKG_VERSION"),
            "environment": self.environment,
            "severity": ctx.severity().as_str(),
            "message": ctx.message(),
            "requestId": ctx.request_id,
            "httpRequest": http_request,
            "context": Value::Object(redact_map(ctx.custom().clone())),
        })
    }

    /// Apply tail sampling and emit. Returns the record when it was written.
    pub fn flush(&self, ctx: &RequestContext) -> Option<Value> {
        let decision = self.sampler.decide(ctx.severity(), ctx.elapsed());
        if let Some(metrics) = &self.metrics {
            metrics.record_log(decision.emit());
        }
        if !decision.emit() {
            return None;
        }

        let record = self.build_record(ctx);
        let line = record.to_string();
        match ctx.severity() {
            Severity::Error => tracing::error!(target: REQUEST_LOG_TARGET, record = %line, "{}", ctx.message()),
            Severity::Warning => tracing::warn!(target: REQUEST_LOG_TARGET, record = %line, "{}", ctx.message()),
            Severity::Info => tracing::info!(target: REQUEST_LOG_TARGET, record = %line, "{}", ctx.message()),
        }
        Some(record)
    }
}

/// Owns a request's context and flushes its record exactly once when dropped,
/// on every exit path.
pub struct RequestScope {
    ctx: RequestContext,
    logger: Arc<RequestLogger>,
}

impl RequestScope {
    pub fn new(ctx: RequestContext, logger: Arc<RequestLogger>) -> Self {
        Self { ctx, logger }
    }
}

impl Deref for RequestScope {
    type Target = RequestContext;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

impl DerefMut for RequestScope {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.ctx
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        self.logger.flush(&self.ctx);
    }
}
