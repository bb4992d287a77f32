//! Gateway and analyzer settings.
//!
//! Precedence, lowest first: struct defaults, the TOML file, then
//! `MEDIAPEEK__<SECTION>__<KEY>` environment overrides, e.g.
//! `MEDIAPEEK__RATE_LIMIT__MAX_REQUESTS=60` or `MEDIAPEEK__FETCH__MAX_BYTES=20MB`.
//! The file defaults to `config/mediapeek.toml`; `MEDIAPEEK_CONFIG` points elsewhere.
//!
//! Secrets never come from the file. They are read from `ANALYZE_PUBLIC_API_KEY`,
//! `ANALYZE_API_KEY`, `TURNSTILE_SECRET_KEY` and `TURNSTILE_GRANT_SECRET`.
//!
//! ```no_run
//! use mediapeek::config::Config;
//!
//! let config = Config::load().expect("invalid configuration");
//! assert!(config.rate_limit.max_requests > 0);
//! ```

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{
    AnalyzerConfig, AppEnvironment, Config, DelegationConfig, DelegationMode, FetchConfig,
    LogFormat, MAX_DELEGATION_TIMEOUT_MS, RateLimitConfig, Secrets, ServerConfig,
    TelemetryConfig, TurnstileConfig,
};
pub use validation::ValidationError;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),

    #[error("Failed to render configuration: {0}")]
    RenderError(#[from] toml::ser::Error),
}

impl Config {
    /// Defaults, file, environment and secrets, validated
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Load configuration, overriding the TOML path when one is given
    pub fn load_with(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = sources::load(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// File and environment overrides only; `secrets` stays empty
    pub fn load_from_path(path: PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Effective settings as TOML. Secrets are never included.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_minimal_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[rate_limit]\nmax_requests = 10\n").unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.rate_limit.max_requests, 10);
        assert_eq!(config.analyzer.supported_formats.len(), 4);
    }

    #[test]
    fn test_validation_catches_rpc_without_endpoint() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[delegation]\nmode = \"rpc\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::MissingRpcEndpoint)
        ));
    }

    #[test]
    fn test_rendered_config_round_trips_without_secrets() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("rendered.toml");

        let mut config = Config::default();
        config.secrets.public_api_key = Some("very-secret-value".into());
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("very-secret-value"));
        assert!(rendered.contains("[rate_limit]"));

        fs::write(&config_path, rendered).unwrap();
        let reloaded = Config::load_from_path(config_path).unwrap();
        assert_eq!(reloaded.rate_limit.max_requests, config.rate_limit.max_requests);
        assert_eq!(reloaded.fetch.max_bytes, config.fetch.max_bytes);
    }

    #[test]
    fn test_full_config_example() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "0.0.0.0:8080"
max_payload_bytes = "16KB"

[rate_limit]
window_secs = 60
max_requests = 30
gc_threshold = 100

[fetch]
max_bytes = "50MB"
connect_timeout_ms = 5000

[analyzer]
chunk_size = "256KB"
supported_formats = ["json", "text"]
default_formats = ["json"]

[delegation]
mode = "rpc"
endpoint = "http://127.0.0.1:8081"

[turnstile]
enabled = false

[telemetry]
app_env = "staging"
log_slow_request_ms = 1500
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();

        assert_eq!(config.server.max_payload_bytes.as_u64(), 16 * 1024);
        assert_eq!(config.rate_limit.gc_threshold, 100);
        assert_eq!(config.fetch.connect_timeout_ms, 5000);
        assert_eq!(config.analyzer.supported_formats, vec!["json", "text"]);
        assert_eq!(config.delegation.mode, DelegationMode::Rpc);
        assert_eq!(config.telemetry.app_env, AppEnvironment::Staging);
        assert_eq!(config.telemetry.log_slow_request_ms, 1500);
    }
}
