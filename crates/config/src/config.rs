//! Application settings for the notify-guard service

use serde::{Deserialize, Serialize};

/// Main application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// Shared token store; in-process buckets when unset
    #[serde(default)]
    pub redis: RedisConfig,

    /// Rate-limit and retry policy rows
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerSettings,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub gate: GateSettings,
}

/// Process-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Deployment environment (local, staging, production)
    #[serde(default)]
    pub environment: Environment,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable metrics collection
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,

    /// Bind address of the metrics server
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

/// Environment types
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Local,
    Staging,
    Production,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedisConfig {
    /// e.g. `redis://127.0.0.1:6379`
    #[serde(default)]
    pub url: Option<String>,

    /// Prepended to every bucket key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// sqlx connection string, e.g. `sqlite://notify-guard.db?mode=rwc`.
    /// Rows are kept in memory when unset.
    #[serde(default)]
    pub url: Option<String>,

    /// Install global wildcard rows when they are missing
    #[serde(default = "default_true")]
    pub seed_defaults: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open a provider circuit
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Upper bound on a single backoff delay; uncapped when unset
    #[serde(default)]
    pub max_delay_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateSettings {
    /// Scope that lets a verified caller skip quota checks
    #[serde(default = "default_admin_scope")]
    pub admin_scope: String,

    #[serde(default = "default_true")]
    pub admin_override_enabled: bool,
}

impl GateSettings {
    /// The override scope to hand to the gate, if overrides are on
    pub fn effective_admin_scope(&self) -> Option<&str> {
        self.admin_override_enabled
            .then_some(self.admin_scope.as_str())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_key_prefix() -> String {
    "notify-guard:".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_secs() -> u64 {
    60
}

fn default_admin_scope() -> String {
    "notifications:admin".to_string()
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            environment: Environment::default(),
            log_level: default_log_level(),
            metrics_enabled: default_true(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: None,
            key_prefix: default_key_prefix(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            seed_defaults: default_true(),
        }
    }
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            admin_scope: default_admin_scope(),
            admin_override_enabled: default_true(),
        }
    }
}
