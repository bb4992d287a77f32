use serde::Serialize;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpMetadata {
    pub request_method: String,
    pub request_url: String,
    pub status: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Request-scoped state, passed explicitly down the call chain.
///
/// Subscribers accumulate fields here; nothing is logged until the owning
/// [`RequestScope`](super::RequestScope) is dropped.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub http: HttpMetadata,
    custom: Map<String, Value>,
    severity: Severity,
    message: String,
    started: Instant,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, http: HttpMetadata) -> Self {
        Self {
            request_id: request_id.into(),
            http,
            custom: Map::new(),
            severity: Severity::Info,
            message: "request completed".to_string(),
            started: Instant::now(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.custom.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.custom.get(key)
    }

    pub fn custom(&self) -> &Map<String, Value> {
        &self.custom
    }

    /// Raise the record's severity; never lowers it.
    pub fn escalate(&mut self, severity: Severity) {
        self.severity = self.severity.max(severity);
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn set_status(&mut self, status: u16) {
        self.http.status = status;
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, by: Duration) {
        if let Some(earlier) = self.started.checked_sub(by) {
            self.started = earlier;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_only_escalates() {
        let mut ctx = RequestContext::new("r1", HttpMetadata::default());
        ctx.escalate(Severity::Error);
        ctx.escalate(Severity::Warning);
        assert_eq!(ctx.severity(), Severity::Error);
    }

    #[test]
    fn test_custom_fields_overwrite() {
        let mut ctx = RequestContext::new("r1", HttpMetadata::default());
        ctx.set("fileSize", 10);
        ctx.set("fileSize", 20);
        assert_eq!(ctx.get("fileSize"), Some(&Value::from(20)));
        assert_eq!(ctx.custom().len(), 1);
    }
}
