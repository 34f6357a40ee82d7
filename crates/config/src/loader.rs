//! Configuration loading from multiple sources

use crate::{AppConfig, ConfigError, Result};
use config::{Config, ConfigBuilder, Environment, File, FileFormat};
use std::path::Path;

/// Prefix of environment overrides, e.g. `NOTIFY_GUARD_REDIS__URL`
pub const ENV_PREFIX: &str = "NOTIFY_GUARD";

/// Configuration loader with support for multiple formats and sources
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a file
    ///
    /// Supports TOML, YAML, and JSON formats based on file extension
    pub fn from_file(path: &Path) -> Result<AppConfig> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| ConfigError::LoadError("No file extension found".to_string()))?;

        let content = std::fs::read_to_string(path)?;

        match extension {
            "toml" => Self::from_toml(&content),
            "yaml" | "yml" => Self::from_yaml(&content),
            "json" => Self::from_json(&content),
            _ => Err(ConfigError::LoadError(format!(
                "Unsupported file extension: {}",
                extension
            ))),
        }
    }

    pub fn from_toml(content: &str) -> Result<AppConfig> {
        toml::from_str(content).map_err(ConfigError::from)
    }

    pub fn from_yaml(content: &str) -> Result<AppConfig> {
        serde_yaml::from_str(content).map_err(ConfigError::from)
    }

    pub fn from_json(content: &str) -> Result<AppConfig> {
        serde_json::from_str(content).map_err(ConfigError::from)
    }

    /// Load configuration from `NOTIFY_GUARD_*` environment variables
    pub fn from_env() -> Result<AppConfig> {
        Self::from_env_with_prefix(ENV_PREFIX)
    }

    /// Environment variables take the form `PREFIX_SECTION__KEY`,
    /// for example `NOTIFY_GUARD_CIRCUIT_BREAKER__COOLDOWN_SECS=30`
    pub fn from_env_with_prefix(prefix: &str) -> Result<AppConfig> {
        Self::builder().add_env(prefix).build()
    }

    /// Load a file and overlay environment variables key by key
    pub fn from_file_with_env(path: &Path, env_prefix: &str) -> Result<AppConfig> {
        if !path.exists() {
            return Err(ConfigError::LoadError(format!(
                "config file not found: {}",
                path.display()
            )));
        }

        tracing::debug!(path = %path.display(), env_prefix, "loading configuration");
        Self::builder()
            .add_file(path, true)
            .add_env(env_prefix)
            .build()
    }

    /// Build configuration using the config crate's builder pattern
    pub fn builder() -> ConfigLoaderBuilder {
        ConfigLoaderBuilder {
            builder: Config::builder(),
        }
    }
}

/// Builder for layered configuration sources; later sources win
pub struct ConfigLoaderBuilder {
    builder: ConfigBuilder<config::builder::DefaultState>,
}

impl ConfigLoaderBuilder {
    /// Add a configuration file source
    pub fn add_file(mut self, path: &Path, required: bool) -> Self {
        let format = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => FileFormat::Yaml,
            Some("json") => FileFormat::Json,
            _ => FileFormat::Toml,
        };

        self.builder = self
            .builder
            .add_source(File::from(path).format(format).required(required));
        self
    }

    /// Add environment variable source with prefix
    pub fn add_env(mut self, prefix: &str) -> Self {
        self.builder = self.builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
        self
    }

    /// Set a default value for a key
    pub fn set_default(mut self, key: &str, value: &str) -> Result<Self> {
        self.builder = self.builder.set_default(key, value)?;
        Ok(self)
    }

    pub fn build(self) -> Result<AppConfig> {
        let config = self.builder.build()?;
        config.try_deserialize().map_err(ConfigError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const LOCAL_TOML: &str = r#"
        [service]
        environment = "local"
        log_level = "debug"
        metrics_addr = "127.0.0.1:9100"

        [redis]
        key_prefix = "ng-test:"

        [database]
        url = "sqlite::memory:"
        seed_defaults = true

        [circuit_breaker]
        failure_threshold = 3
        cooldown_secs = 30

        [retry]
        max_delay_secs = 120
    "#;

    #[test]
    fn test_load_from_toml() {
        let config = ConfigLoader::from_toml(LOCAL_TOML).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.service.metrics_addr, "127.0.0.1:9100");
        assert_eq!(config.redis.url, None);
        assert_eq!(config.redis.key_prefix, "ng-test:");
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.retry.max_delay_secs, Some(120));
        // Missing section falls back to defaults
        assert_eq!(config.gate, crate::GateSettings::default());
    }

    #[test]
    fn test_load_from_yaml() {
        let yaml = r#"
service:
  environment: production
  log_level: warn

redis:
  url: "redis://cache:6379"

gate:
  admin_override_enabled: false
        "#;

        let config = ConfigLoader::from_yaml(yaml).unwrap();
        assert_eq!(config.service.environment, crate::Environment::Production);
        assert_eq!(config.redis.url.as_deref(), Some("redis://cache:6379"));
        assert_eq!(config.gate.effective_admin_scope(), None);
    }

    #[test]
    fn test_load_from_json() {
        let json = r#"
{
  "service": { "log_level": "info", "metrics_enabled": false },
  "circuit_breaker": { "failure_threshold": 10, "cooldown_secs": 120 }
}
        "#;

        let config = ConfigLoader::from_json(json).unwrap();
        assert!(!config.service.metrics_enabled);
        assert_eq!(config.circuit_breaker.cooldown_secs, 120);
        assert!(config.database.seed_defaults);
    }

    #[test]
    fn test_empty_document_is_all_defaults() {
        let config = ConfigLoader::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(
            config.gate.effective_admin_scope(),
            Some("notifications:admin")
        );
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(LOCAL_TOML.as_bytes()).unwrap();

        let config = ConfigLoader::from_file(file.path()).unwrap();
        assert_eq!(config.service.log_level, "debug");
        assert_eq!(config.database.url.as_deref(), Some("sqlite::memory:"));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new()
            .suffix(".ini")
            .tempfile()
            .unwrap();

        let result = ConfigLoader::from_file(file.path());
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn test_env_overlays_file_per_key() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        file.write_all(LOCAL_TOML.as_bytes()).unwrap();

        // Unique prefix so parallel tests don't see each other's variables
        std::env::set_var("NGTEST_OVERLAY_CIRCUIT_BREAKER__COOLDOWN_SECS", "45");
        let config = ConfigLoader::from_file_with_env(file.path(), "NGTEST_OVERLAY").unwrap();
        std::env::remove_var("NGTEST_OVERLAY_CIRCUIT_BREAKER__COOLDOWN_SECS");

        assert_eq!(config.circuit_breaker.cooldown_secs, 45);
        // Keys not overridden keep their file values
        assert_eq!(config.circuit_breaker.failure_threshold, 3);
        assert_eq!(config.service.log_level, "debug");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let result =
            ConfigLoader::from_file_with_env(Path::new("/nonexistent/notify-guard.toml"), ENV_PREFIX);
        assert!(matches!(result, Err(ConfigError::LoadError(_))));
    }
}
