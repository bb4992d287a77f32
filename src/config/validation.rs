use super::models::{Config, DelegationMode};
use crate::analyzer::Format;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("rate_limit.window_secs must be greater than zero")]
    ZeroRateLimitWindow,

    #[error("rate_limit.max_requests must be greater than zero")]
    ZeroRateLimitQuota,

    #[error("fetch.max_bytes must be greater than zero")]
    ZeroFetchCap,

    #[error("analyzer.chunk_size must be greater than zero")]
    ZeroChunkSize,

    #[error("analyzer.max_steps must be greater than zero")]
    ZeroStepBudget,

    #[error("analyzer.supported_formats must not be empty")]
    NoSupportedFormats,

    #[error("unknown analysis format '{0}'")]
    UnknownFormat(String),

    #[error("default format '{0}' is not listed in analyzer.supported_formats")]
    DefaultFormatNotSupported(String),

    #[error("delegation.mode is rpc but delegation.endpoint is not set")]
    MissingRpcEndpoint,

    #[error("delegation.endpoint '{0}' must be an absolute http(s) URL")]
    InvalidRpcEndpoint(String),
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_rate_limit(config)?;
    validate_fetch(config)?;
    validate_analyzer(config)?;
    validate_delegation(config)?;

    if config.turnstile.enabled && config.secrets.turnstile_secret_key.is_none() {
        // Requests fail with INTERNAL_ERROR at runtime; startup stays possible.
        tracing::warn!("turnstile is enabled but TURNSTILE_SECRET_KEY is not set");
    }

    Ok(())
}

fn validate_rate_limit(config: &Config) -> Result<(), ValidationError> {
    if config.rate_limit.window_secs == 0 {
        return Err(ValidationError::ZeroRateLimitWindow);
    }
    if config.rate_limit.max_requests == 0 {
        return Err(ValidationError::ZeroRateLimitQuota);
    }
    Ok(())
}

fn validate_fetch(config: &Config) -> Result<(), ValidationError> {
    if config.fetch.max_bytes.as_u64() == 0 {
        return Err(ValidationError::ZeroFetchCap);
    }
    Ok(())
}

fn validate_analyzer(config: &Config) -> Result<(), ValidationError> {
    let analyzer = &config.analyzer;

    if analyzer.chunk_size.as_u64() == 0 {
        return Err(ValidationError::ZeroChunkSize);
    }
    if analyzer.max_steps == 0 {
        return Err(ValidationError::ZeroStepBudget);
    }
    if analyzer.supported_formats.is_empty() {
        return Err(ValidationError::NoSupportedFormats);
    }

    let mut supported = Vec::with_capacity(analyzer.supported_formats.len());
    for name in &analyzer.supported_formats {
        let format = Format::parse(name).ok_or_else(|| ValidationError::UnknownFormat(name.clone()))?;
        supported.push(format);
    }

    for name in &analyzer.default_formats {
        let format = Format::parse(name).ok_or_else(|| ValidationError::UnknownFormat(name.clone()))?;
        if !supported.contains(&format) {
            return Err(ValidationError::DefaultFormatNotSupported(name.clone()));
        }
    }

    Ok(())
}

fn validate_delegation(config: &Config) -> Result<(), ValidationError> {
    if config.delegation.mode != DelegationMode::Rpc {
        return Ok(());
    }

    let endpoint = config
        .delegation
        .endpoint
        .as_deref()
        .ok_or(ValidationError::MissingRpcEndpoint)?;

    match url::Url::parse(endpoint) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => Ok(()),
        _ => Err(ValidationError::InvalidRpcEndpoint(endpoint.to_string())),
    }
}
