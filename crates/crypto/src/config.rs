//! Device configuration loaded from TOML with env var overrides.

use serde::Deserialize;

use olmdev_shared::constants::DEFAULT_STORE_PATH;

use crate::error::CryptoError;

/// Device configuration loaded from `olmdev.toml` with env var overrides.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DeviceConfig {
    /// Path of the SQLite key store. Default: "olm_device.db"
    #[serde(default = "default_store_path")]
    pub store_path: String,
    /// Cap on the unpublished one-time key pool. Defaults to the Olm
    /// library's own maximum; larger values are clamped to it.
    #[serde(default)]
    pub max_one_time_keys: Option<usize>,
    /// Tracing log level. Default: "info"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_store_path() -> String {
    DEFAULT_STORE_PATH.to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            store_path: default_store_path(),
            max_one_time_keys: None,
            log_level: default_log_level(),
        }
    }
}

impl DeviceConfig {
    /// Load configuration from a TOML file with environment variable overrides.
    ///
    /// Reads `olmdev.toml` from CWD (or the path in the `CONFIG_PATH` env var).
    /// A missing file is not an error: defaults plus env overrides are used.
    pub fn load() -> Result<Self, CryptoError> {
        let path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "olmdev.toml".to_string());
        match std::fs::read_to_string(&path) {
            Ok(contents) => Self::from_toml_str(&contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path, "no config file, using defaults");
                let mut config = Self::default();
                config.apply_env_overrides()?;
                Ok(config)
            }
            Err(e) => Err(CryptoError::ConfigError(format!("{path}: {e}"))),
        }
    }

    /// Load configuration from a TOML string, then apply env var overrides.
    pub fn from_toml_str(toml_str: &str) -> Result<Self, CryptoError> {
        let mut config: DeviceConfig =
            toml::from_str(toml_str).map_err(|e| CryptoError::ConfigError(e.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to the config.
    ///
    /// Returns an error if an env var is set but has an invalid format
    /// (e.g., OLMDEV_MAX_ONE_TIME_KEYS=abc).
    pub fn apply_env_overrides(&mut self) -> Result<(), CryptoError> {
        if let Ok(val) = std::env::var("OLMDEV_STORE_PATH") {
            self.store_path = val;
        }
        if let Ok(val) = std::env::var("OLMDEV_MAX_ONE_TIME_KEYS") {
            let max = val.parse().map_err(|_| {
                CryptoError::ConfigError(format!("invalid OLMDEV_MAX_ONE_TIME_KEYS value: {val}"))
            })?;
            self.max_one_time_keys = Some(max);
        }
        if let Ok(val) = std::env::var("OLMDEV_LOG_LEVEL") {
            self.log_level = val;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), CryptoError> {
        if self.store_path.is_empty() {
            return Err(CryptoError::ConfigError("store_path must not be empty".into()));
        }
        if self.max_one_time_keys == Some(0) {
            return Err(CryptoError::ConfigError(
                "max_one_time_keys must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn config_loads_from_valid_toml_string() {
        let toml = r#"
            store_path = "/var/lib/olmdev/keys.db"
            max_one_time_keys = 20
            log_level = "debug"
        "#;
        let config = DeviceConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.store_path, "/var/lib/olmdev/keys.db");
        assert_eq!(config.max_one_time_keys, Some(20));
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn config_applies_env_var_overrides() {
        let toml = r#"
            store_path = "original.db"
        "#;
        std::env::set_var("OLMDEV_STORE_PATH", "overridden.db");
        std::env::set_var("OLMDEV_MAX_ONE_TIME_KEYS", "7");
        let config = DeviceConfig::from_toml_str(toml).unwrap();
        std::env::remove_var("OLMDEV_STORE_PATH");
        std::env::remove_var("OLMDEV_MAX_ONE_TIME_KEYS");
        assert_eq!(config.store_path, "overridden.db");
        assert_eq!(config.max_one_time_keys, Some(7));
    }

    #[test]
    #[serial]
    fn config_has_correct_defaults_for_omitted_fields() {
        let config = DeviceConfig::from_toml_str("").unwrap();
        assert_eq!(config.store_path, "olm_device.db");
        assert_eq!(config.max_one_time_keys, None);
        assert_eq!(config.log_level, "info");
        assert_eq!(config, DeviceConfig::default());
    }

    #[test]
    #[serial]
    fn config_fails_on_malformed_toml() {
        let result = DeviceConfig::from_toml_str("this is not valid = [[[toml");
        assert!(matches!(result, Err(CryptoError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn config_rejects_invalid_env_override() {
        std::env::set_var("OLMDEV_MAX_ONE_TIME_KEYS", "lots");
        let result = DeviceConfig::from_toml_str("");
        std::env::remove_var("OLMDEV_MAX_ONE_TIME_KEYS");
        assert!(matches!(result, Err(CryptoError::ConfigError(_))));
    }

    #[test]
    #[serial]
    fn config_rejects_zero_one_time_key_cap() {
        let result = DeviceConfig::from_toml_str("max_one_time_keys = 0");
        assert!(matches!(result, Err(CryptoError::ConfigError(_))));
    }
}
