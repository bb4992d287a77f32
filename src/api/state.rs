use std::sync::Arc;
use thiserror::Error;

use super::delegate::{self, Delegate, DelegateError};
use super::rate_limit::FixedWindowLimiter;
use super::turnstile::{TurnstileError, TurnstileVerifier};
use super::validation::FormatPolicy;
use crate::config::Config;
use crate::diagnostics::{ContextRecorder, DiagnosticsBus, RequestLogger};
use crate::observability::Metrics;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to build the analysis delegate: {0}")]
    Delegate(#[from] DelegateError),
    #[error("failed to build the verification client: {0}")]
    Turnstile(#[from] TurnstileError),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub formats: Arc<FormatPolicy>,
    pub limiter: Arc<FixedWindowLimiter>,
    pub delegate: Arc<dyn Delegate>,
    pub verifier: Arc<TurnstileVerifier>,
    pub bus: DiagnosticsBus,
    pub logger: Arc<RequestLogger>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    /// State with the delegate selected by `delegation.mode`
    pub fn from_config(config: Config) -> Result<Self, StateError> {
        let delegate = delegate::from_config(&config)?;
        Self::new(config, delegate)
    }

    pub fn new(config: Config, delegate: Arc<dyn Delegate>) -> Result<Self, StateError> {
        let metrics = Arc::new(Metrics::new());
        let bus = DiagnosticsBus::new()
            .with_subscriber(Arc::new(ContextRecorder))
            .with_subscriber(metrics.clone());
        let logger = RequestLogger::new(&config.telemetry).with_metrics(metrics.clone());

        Ok(Self {
            formats: Arc::new(FormatPolicy::from_config(&config.analyzer)),
            limiter: Arc::new(FixedWindowLimiter::from_config(&config.rate_limit)),
            verifier: Arc::new(TurnstileVerifier::new(&config.turnstile)?),
            delegate,
            bus,
            logger: Arc::new(logger),
            metrics,
            config: Arc::new(config),
        })
    }
}
