use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_upstream(config)?;
    validate_auth(config)?;
    validate_log_level(config)?;
    validate_tool_description_limits(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if server.port == 0 {
        return Err(validation_err("server.port must be greater than 0"));
    }
    if server.http_pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "server.http_pool_max_idle_per_host must be greater than 0",
        ));
    }
    if server.pipeline_queue_capacity == 0 {
        return Err(validation_err(
            "server.pipeline_queue_capacity must be greater than 0",
        ));
    }
    validate_proxy_url("server.proxy", server.proxy.as_deref())?;
    Ok(())
}

fn validate_upstream(config: &AppConfig) -> Result<(), ConfigError> {
    validate_http_url("upstream.api_url", &config.upstream.api_url)?;
    if config.upstream.target.trim().is_empty() {
        return Err(validation_err("upstream.target cannot be empty"));
    }
    if config.upstream.max_frame_bytes < crate::eventstream::frame::MIN_FRAME_LEN {
        return Err(validation_err(
            "upstream.max_frame_bytes is smaller than the minimum frame size",
        ));
    }
    Ok(())
}

fn validate_auth(config: &AppConfig) -> Result<(), ConfigError> {
    validate_http_url("auth.token_url", &config.auth.token_url)?;
    if config.auth.refresh_interval_secs == 0 {
        return Err(validation_err(
            "auth.refresh_interval_secs must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_http_url(field_name: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|err| validation_err(format!("{field_name} is not a valid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_proxy_url(field_name: &str, proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err(format!(
            "{field_name} cannot be empty when set"
        )));
    }
    validate_http_url(field_name, proxy)
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

fn validate_tool_description_limits(config: &AppConfig) -> Result<(), ConfigError> {
    let features = &config.features;
    if features.tool_description_truncate_at > features.tool_description_limit {
        return Err(validation_err(
            "features.tool_description_truncate_at cannot exceed features.tool_description_limit",
        ));
    }
    Ok(())
}
