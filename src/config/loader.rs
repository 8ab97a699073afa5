//! Configuration Loader
//!
//! Layered loading with the `config` crate: built-in defaults, then an optional
//! TOML file, then `RESILIENCE__*` environment overrides. The merged result is
//! validated before it is handed out.

use super::ResilienceConfig;
use crate::error::{ResilienceError, Result};
use config::{Config, Environment, File, FileFormat};
use std::path::PathBuf;
use tracing::{debug, info};

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "RESILIENCE";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Builder-style loader for [`ResilienceConfig`]
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    required: bool,
    env_prefix: String,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            required: false,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Read this TOML file if it exists
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.required = false;
        self
    }

    /// Read this TOML file, failing if it is missing
    pub fn with_required_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self.required = true;
        self
    }

    /// Override the environment prefix (tests use a unique one)
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build, deserialize and validate the configuration
    pub fn load(&self) -> Result<ResilienceConfig> {
        let defaults = Config::try_from(&ResilienceConfig::default())
            .map_err(|e| ResilienceError::configuration(format!("config defaults error: {e}")))?;

        let mut builder = Config::builder().add_source(defaults);

        if let Some(path) = &self.file {
            debug!(path = %path.display(), required = self.required, "Adding configuration file");
            builder = builder.add_source(
                File::from(path.as_path())
                    .format(FileFormat::Toml)
                    .required(self.required),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix(&self.env_prefix)
                .prefix_separator(ENV_SEPARATOR)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let merged: ResilienceConfig = builder
            .build()
            .map_err(|e| ResilienceError::configuration(format!("config build error: {e}")))?
            .try_deserialize()
            .map_err(|e| {
                ResilienceError::configuration(format!("config deserialize error: {e}"))
            })?;

        merged.validate()?;

        info!(
            file = ?self.file.as_ref().map(|p| p.display().to_string()),
            components = merged.circuit_breakers.component_configs.len(),
            "Resilience configuration loaded"
        );

        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_missing_optional_file_uses_defaults() {
        let config = ConfigLoader::new()
            .with_file("/nonexistent/resilience.toml")
            .with_env_prefix("RESILIENCE_LOADER_TEST_A")
            .load()
            .unwrap();

        assert_eq!(config, ResilienceConfig::default());
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let result = ConfigLoader::new()
            .with_required_file("/nonexistent/resilience.toml")
            .with_env_prefix("RESILIENCE_LOADER_TEST_B")
            .load();

        assert!(matches!(result, Err(ResilienceError::Configuration { .. })));
    }

    #[test]
    fn test_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[database]
read_timeout_ms = 800

[circuit_breakers.component_configs.payments]
failure_threshold = 2
reset_timeout_ms = 1500
half_open_max_attempts = 1
"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_required_file(file.path())
            .with_env_prefix("RESILIENCE_LOADER_TEST_C")
            .load()
            .unwrap();

        assert_eq!(config.database.read_timeout_ms, 800);
        // Untouched fields keep their defaults
        assert_eq!(
            config.database.write_timeout_ms,
            crate::constants::timeouts::DATABASE_WRITE_MS
        );

        let payments = config.circuit_breakers.config_for_component("payments");
        assert_eq!(payments.failure_threshold, 2);
        assert_eq!(payments.reset_timeout.as_millis(), 1500);
    }

    #[test]
    fn test_invalid_file_values_fail_validation() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[database]\nslow_warning_ms = 5000\nslow_error_ms = 100").unwrap();

        let result = ConfigLoader::new()
            .with_required_file(file.path())
            .with_env_prefix("RESILIENCE_LOADER_TEST_D")
            .load();

        assert!(matches!(result, Err(ResilienceError::Configuration { .. })));
    }
}
