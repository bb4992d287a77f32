use crate::humanize::ByteSize;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::Duration;

/// Upper bound for the delegated analysis call
pub const MAX_DELEGATION_TIMEOUT_MS: u64 = 180_000;

/// Top-level configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub analyzer: AnalyzerConfig,
    #[serde(default)]
    pub delegation: DelegationConfig,
    #[serde(default)]
    pub turnstile: TurnstileConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    /// Secrets loaded from the environment only
    #[serde(skip)]
    pub secrets: Secrets,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,
    #[serde(default = "default_max_payload_bytes")]
    pub max_payload_bytes: ByteSize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            max_payload_bytes: default_max_payload_bytes(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

fn default_max_payload_bytes() -> ByteSize {
    ByteSize::kib(64)
}

/// Fixed-window, per-client-IP limiter settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    /// Expired entries are swept once the map grows past this many keys
    #[serde(default = "default_gc_threshold")]
    pub gc_threshold: usize,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_secs: default_window_secs(),
            max_requests: default_max_requests(),
            gc_threshold: default_gc_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_window_secs() -> u64 {
    60
}

fn default_max_requests() -> u32 {
    30
}

fn default_gc_threshold() -> usize {
    4000
}

/// Remote fetch settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Hard cap on retrieved bytes, regardless of the declared size
    #[serde(default = "default_fetch_max_bytes")]
    pub max_bytes: ByteSize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Extra headers merged onto the browser-emulation defaults
    #[serde(default)]
    pub emulated_headers: BTreeMap<String, String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_bytes: default_fetch_max_bytes(),
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            user_agent: default_user_agent(),
            emulated_headers: BTreeMap::new(),
        }
    }
}

fn default_fetch_max_bytes() -> ByteSize {
    ByteSize::mib(50)
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    60_000
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/124.0.0.0 Safari/537.36"
        .to_string()
}

/// Analysis driver settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnalyzerConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: ByteSize,
    /// Engine-call budget per analysis
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_supported_formats")]
    pub supported_formats: Vec<String>,
    #[serde(default = "default_formats")]
    pub default_formats: Vec<String>,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_steps: default_max_steps(),
            supported_formats: default_supported_formats(),
            default_formats: default_formats(),
        }
    }
}

fn default_chunk_size() -> ByteSize {
    ByteSize::kib(256)
}

fn default_max_steps() -> u32 {
    100_000
}

fn default_supported_formats() -> Vec<String> {
    ["json", "xml", "html", "text"].map(String::from).to_vec()
}

fn default_formats() -> Vec<String> {
    vec!["json".to_string()]
}

/// Where fetch + analyze runs
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DelegationMode {
    #[default]
    Local,
    Rpc,
}

impl DelegationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DelegationMode::Local => "local",
            DelegationMode::Rpc => "rpc",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DelegationConfig {
    #[serde(default)]
    pub mode: DelegationMode,
    /// Base URL of the analyzer service, e.g. `http://analyzer:8081`
    pub endpoint: Option<String>,
    #[serde(default = "default_delegation_timeout_ms")]
    pub timeout_ms: u64,
}

impl DelegationConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.clamp(1, MAX_DELEGATION_TIMEOUT_MS))
    }
}

impl Default for DelegationConfig {
    fn default() -> Self {
        Self {
            mode: DelegationMode::Local,
            endpoint: None,
            timeout_ms: default_delegation_timeout_ms(),
        }
    }
}

fn default_delegation_timeout_ms() -> u64 {
    60_000
}

/// Human-verification settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TurnstileConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_verify_url")]
    pub verify_url: String,
    #[serde(default = "default_grant_ttl_secs")]
    pub grant_ttl_secs: u64,
}

impl Default for TurnstileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            verify_url: default_verify_url(),
            grant_ttl_secs: default_grant_ttl_secs(),
        }
    }
}

fn default_verify_url() -> String {
    "https://challenges.cloudflare.com/turnstile/v0/siteverify".to_string()
}

fn default_grant_ttl_secs() -> u64 {
    10 * 60
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AppEnvironment {
    Development,
    Staging,
    #[default]
    Production,
}

impl AppEnvironment {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppEnvironment::Development => "development",
            AppEnvironment::Staging => "staging",
            AppEnvironment::Production => "production",
        }
    }

    pub fn is_development(&self) -> bool {
        matches!(self, AppEnvironment::Development)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

/// Logging and tail-sampling configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub app_env: AppEnvironment,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default = "default_log_sample_rate")]
    pub log_sample_rate: f64,
    #[serde(default = "default_log_slow_request_ms")]
    pub log_slow_request_ms: u64,
    #[serde(default)]
    pub log_force_all_requests: bool,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl TelemetryConfig {
    pub fn sample_rate(&self) -> f64 {
        if self.log_sample_rate.is_finite() {
            self.log_sample_rate.clamp(0.0, 1.0)
        } else {
            default_log_sample_rate()
        }
    }

    pub fn slow_request_threshold(&self) -> Duration {
        Duration::from_millis(self.log_slow_request_ms.clamp(1, 300_000))
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            app_env: AppEnvironment::default(),
            service_name: default_service_name(),
            log_sample_rate: default_log_sample_rate(),
            log_slow_request_ms: default_log_slow_request_ms(),
            log_force_all_requests: false,
            log_format: LogFormat::default(),
        }
    }
}

fn default_service_name() -> String {
    "mediapeek".to_string()
}

fn default_log_sample_rate() -> f64 {
    0.1
}

fn default_log_slow_request_ms() -> u64 {
    2_000
}

/// Secret material. Never serialized, never read from TOML.
#[derive(Clone, Default)]
pub struct Secrets {
    /// Shared key callers must present to the public gateway
    pub public_api_key: Option<String>,
    /// Key the gateway presents to (and the analyzer demands of) RPC callers
    pub analyzer_api_key: Option<String>,
    pub turnstile_secret_key: Option<String>,
    /// HMAC key for verification grants; falls back to the turnstile secret
    pub grant_secret: Option<String>,
}

impl Secrets {
    pub fn grant_signing_key(&self) -> Option<&str> {
        self.grant_secret
            .as_deref()
            .or(self.turnstile_secret_key.as_deref())
    }
}

impl std::fmt::Debug for Secrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mark = |v: &Option<String>| if v.is_some() { "set" } else { "unset" };
        f.debug_struct("Secrets")
            .field("public_api_key", &mark(&self.public_api_key))
            .field("analyzer_api_key", &mark(&self.analyzer_api_key))
            .field("turnstile_secret_key", &mark(&self.turnstile_secret_key))
            .field("grant_secret", &mark(&self.grant_secret))
            .finish()
    }
}
