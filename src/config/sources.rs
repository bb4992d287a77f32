use super::models::{Config, Secrets};
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "MEDIAPEEK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/mediapeek.toml";
const ENV_PREFIX: &str = "MEDIAPEEK";
const ENV_SEPARATOR: &str = "__";

/// Where the TOML layer comes from when no explicit path is given
pub fn default_config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Full load: `.env` is applied to the process environment first, so its values
/// act as both overrides and secrets.
pub fn load(config_path: Option<PathBuf>) -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();

    let config_path = config_path.unwrap_or_else(default_config_path);
    let mut config = load_from_sources(config_path)?;
    config.secrets = secrets_from_env();

    Ok(config)
}

/// Blank values count as unset
fn secrets_from_env() -> Secrets {
    let read = |name: &str| {
        env::var(name)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };

    Secrets {
        public_api_key: read("ANALYZE_PUBLIC_API_KEY"),
        analyzer_api_key: read("ANALYZE_API_KEY"),
        turnstile_secret_key: read("TURNSTILE_SECRET_KEY"),
        grant_secret: read("TURNSTILE_GRANT_SECRET"),
    }
}

pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Reading configuration file");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::warn!(path = %config_path.display(), "No configuration file, using defaults");
    }

    // MEDIAPEEK__RATE_LIMIT__MAX_REQUESTS -> rate_limit.max_requests
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::models::{AppEnvironment, DelegationMode};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.analyzer.default_formats, vec!["json"]);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[server]
bind_addr = "127.0.0.1:9000"

[fetch]
max_bytes = "10MB"

[fetch.emulated_headers]
referer = "https://example.com/"

[analyzer]
chunk_size = "64KB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(config.server.bind_addr.to_string(), "127.0.0.1:9000");
        assert_eq!(config.fetch.max_bytes.as_u64(), 10 * 1024 * 1024);
        assert_eq!(config.analyzer.chunk_size.as_u64(), 64 * 1024);
        assert_eq!(
            config.fetch.emulated_headers.get("referer").map(String::as_str),
            Some("https://example.com/")
        );
    }

    #[test]
    fn test_complex_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[rate_limit]
window_secs = 30
max_requests = 5

[delegation]
mode = "rpc"
endpoint = "http://analyzer:8081"
timeout_ms = 45000

[turnstile]
enabled = true
grant_ttl_secs = 120

[telemetry]
app_env = "development"
log_sample_rate = 0.5
log_force_all_requests = true
log_format = "text"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();

        assert_eq!(config.rate_limit.window_secs, 30);
        assert_eq!(config.rate_limit.max_requests, 5);
        assert!(config.rate_limit.enabled);

        assert_eq!(config.delegation.mode, DelegationMode::Rpc);
        assert_eq!(config.delegation.endpoint.as_deref(), Some("http://analyzer:8081"));
        assert_eq!(config.delegation.timeout_ms, 45_000);

        assert!(config.turnstile.enabled);
        assert_eq!(config.turnstile.grant_ttl_secs, 120);

        assert_eq!(config.telemetry.app_env, AppEnvironment::Development);
        assert_eq!(config.telemetry.log_sample_rate, 0.5);
        assert!(config.telemetry.log_force_all_requests);
    }
}
