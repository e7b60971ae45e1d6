pub mod validation;

use serde::{Deserialize, Serialize};

use self::validation::validate_config;

pub const CONFIG_PATH_ENV: &str = "QBRIDGE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_host")]
    pub host: String,
    /// Upstream request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_http_pool_max_idle_per_host")]
    pub http_pool_max_idle_per_host: usize,
    #[serde(default = "default_http_pool_idle_timeout_secs")]
    pub http_pool_idle_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub http_use_env_proxy: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default)]
    pub base_path: String,
    #[serde(default = "default_true")]
    pub enable_cors: bool,
    #[serde(default = "default_pipeline_queue_capacity")]
    pub pipeline_queue_capacity: usize,
}

fn default_port() -> u16 {
    8000
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_timeout() -> u64 {
    300
}
fn default_http_pool_max_idle_per_host() -> usize {
    10
}
fn default_http_pool_idle_timeout_secs() -> u64 {
    90
}
fn default_pipeline_queue_capacity() -> usize {
    100
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            timeout: default_timeout(),
            http_pool_max_idle_per_host: default_http_pool_max_idle_per_host(),
            http_pool_idle_timeout_secs: default_http_pool_idle_timeout_secs(),
            http_use_env_proxy: true,
            proxy: None,
            base_path: String::new(),
            enable_cors: true,
            pipeline_queue_capacity: default_pipeline_queue_capacity(),
        }
    }
}

/// Backend API endpoint and request identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default = "default_api_url")]
    pub api_url: String,
    #[serde(default = "default_target")]
    pub target: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_amz_user_agent")]
    pub amz_user_agent: String,
    #[serde(default = "default_operating_system")]
    pub operating_system: String,
    #[serde(default = "default_working_directory")]
    pub working_directory: String,
    #[serde(default = "default_true")]
    pub validate_checksums: bool,
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

fn default_api_url() -> String {
    "https://q.us-east-1.amazonaws.com/".to_string()
}
fn default_target() -> String {
    "AmazonCodeWhispererStreamingService.GenerateAssistantResponse".to_string()
}
fn default_user_agent() -> String {
    "aws-sdk-rust/1.3.9 ua/2.1 api/codewhispererstreaming/0.1.11582 os/windows lang/rust/1.87.0 md/appVersion-1.19.4 app/AmazonQ-For-CLI".to_string()
}
fn default_amz_user_agent() -> String {
    "aws-sdk-rust/1.3.9 ua/2.1 api/codewhispererstreaming/0.1.11582 os/windows lang/rust/1.87.0 m/F app/AmazonQ-For-CLI".to_string()
}
fn default_operating_system() -> String {
    "macos".to_string()
}
fn default_working_directory() -> String {
    "/".to_string()
}
fn default_max_frame_bytes() -> usize {
    crate::eventstream::DEFAULT_MAX_FRAME_BYTES
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            target: default_target(),
            user_agent: default_user_agent(),
            amz_user_agent: default_amz_user_agent(),
            operating_system: default_operating_system(),
            working_directory: default_working_directory(),
            validate_checksums: true,
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

/// Token endpoint and refresh cadence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_refresh_interval_secs")]
    pub refresh_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_oidc_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_oidc_amz_user_agent")]
    pub amz_user_agent: String,
}

fn default_token_url() -> String {
    "https://oidc.us-east-1.amazonaws.com/token".to_string()
}
fn default_refresh_interval_secs() -> u64 {
    45 * 60
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_oidc_user_agent() -> String {
    "aws-sdk-rust/1.3.9 os/windows lang/rust/1.87.0".to_string()
}
fn default_oidc_amz_user_agent() -> String {
    "aws-sdk-rust/1.3.9 ua/2.1 api/ssooidc/1.88.0 os/windows lang/rust/1.87.0 m/E app/AmazonQ-For-CLI".to_string()
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_url: default_token_url(),
            refresh_interval_secs: default_refresh_interval_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            user_agent: default_oidc_user_agent(),
            amz_user_agent: default_oidc_amz_user_agent(),
        }
    }
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_thinking_budget")]
    pub thinking_budget_default: u32,
    #[serde(default = "default_tool_description_limit")]
    pub tool_description_limit: usize,
    #[serde(default = "default_tool_description_truncate_at")]
    pub tool_description_truncate_at: usize,
}

fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_thinking_budget() -> u32 {
    16_000
}
fn default_tool_description_limit() -> usize {
    10_240
}
fn default_tool_description_truncate_at() -> usize {
    10_100
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            thinking_budget_default: default_thinking_budget(),
            tool_description_limit: default_tool_description_limit(),
            tool_description_truncate_at: default_tool_description_truncate_at(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] or [`ConfigError::Validation`].
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = if contents.trim().is_empty() {
        AppConfig::default()
    } else {
        serde_yaml::from_str(contents)?
    };
    validate_config(&config)?;
    Ok(config)
}

/// Resolve the config path from `QBRIDGE_CONFIG`, load it (falling back to
/// defaults when the file does not exist) and apply the `PORT` override.
///
/// # Errors
///
/// Returns [`ConfigError`] for unreadable, unparsable or invalid files.
pub fn load_from_env() -> Result<AppConfig, ConfigError> {
    let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let mut config = match load_config(&path) {
        Ok(config) => config,
        Err(ConfigError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            AppConfig::default()
        }
        Err(err) => return Err(err),
    };
    if let Some(port) = std::env::var("PORT").ok().and_then(|raw| raw.trim().parse().ok()) {
        config.server.port = port;
    }
    validate_config(&config)?;
    Ok(config)
}
