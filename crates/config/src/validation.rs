//! Configuration validation

use crate::{AppConfig, ConfigError, Result};
use std::net::SocketAddr;

/// Validation error details
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate the entire application configuration, reporting every problem at once
pub fn validate_config(config: &AppConfig) -> Result<()> {
    let mut errors = Vec::new();

    if let Err(e) = validate_log_level(&config.service.log_level) {
        errors.push(e);
    }

    if config.service.metrics_enabled
        && config.service.metrics_addr.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "service.metrics_addr",
            format!("'{}' is not a socket address", config.service.metrics_addr),
        ));
    }

    if let Some(url) = &config.redis.url {
        if let Err(e) = validate_url(url, &["redis://", "rediss://"]) {
            errors.push(ValidationError::new("redis.url", e));
        }
    }

    if config.redis.key_prefix.contains(char::is_whitespace) {
        errors.push(ValidationError::new(
            "redis.key_prefix",
            "must not contain whitespace",
        ));
    }

    if let Some(url) = &config.database.url {
        if let Err(e) = validate_url(url, &["sqlite:"]) {
            errors.push(ValidationError::new("database.url", e));
        }
    }

    if config.circuit_breaker.failure_threshold == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.failure_threshold",
            "must be greater than 0",
        ));
    }

    if config.circuit_breaker.cooldown_secs == 0 {
        errors.push(ValidationError::new(
            "circuit_breaker.cooldown_secs",
            "must be greater than 0",
        ));
    }

    if config.retry.max_delay_secs == Some(0) {
        errors.push(ValidationError::new(
            "retry.max_delay_secs",
            "must be greater than 0 when set",
        ));
    }

    if config.gate.admin_override_enabled && config.gate.admin_scope.trim().is_empty() {
        errors.push(ValidationError::new(
            "gate.admin_scope",
            "scope is required while admin overrides are enabled",
        ));
    }

    if !errors.is_empty() {
        let error_msg = errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(ConfigError::ValidationError(error_msg));
    }

    Ok(())
}

/// Validate a URL against a set of accepted schemes
pub fn validate_url(url: &str, schemes: &[&str]) -> std::result::Result<(), String> {
    if url.is_empty() {
        return Err("URL cannot be empty".to_string());
    }

    if !schemes.iter().any(|scheme| url.starts_with(scheme)) {
        return Err(format!("URL must start with one of: {}", schemes.join(", ")));
    }

    Ok(())
}

fn validate_log_level(level: &str) -> std::result::Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ValidationError::new(
            "service.log_level",
            format!(
                "invalid log level '{level}', must be one of: trace, debug, info, warn, error"
            ),
        )),
    }
}
