//! Configuration file parsing and structures.
//!
//! nefitd uses TOML for declarative configuration. Settings that change at
//! runtime (credentials, thresholds, intervals) are written to a separate
//! state file which overrides the configuration on the next start.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::filter::LevelFilter;

use crate::integrations::nefit_easy::DeviceSettings;
use crate::integrations::nefit_easy::NefitEasyConfig;

/// Top-level configuration structure
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub system: SystemConfig,

    /// HTTP API; disabled when absent
    #[serde(default)]
    pub api: Option<ApiConfig>,

    #[serde(default)]
    pub integrations: IntegrationsConfig,
}

#[derive(Debug, Default, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub level: LogLevel,

    /// Per-target levels, e.g. `"nefitd::api" = "debug"`
    #[serde(default)]
    pub overrides: HashMap<String, LogLevel>,
}

/// System-wide configuration
#[derive(Debug, Default, Deserialize)]
pub struct SystemConfig {
    /// Poll every device at a short fixed interval
    #[serde(default)]
    pub debug: bool,

    /// Where runtime settings changes are persisted
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

fn default_listen() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8565
}

/// Native HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_listen")]
    pub listen: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

/// Integration configuration container
#[derive(Debug, Default, Deserialize)]
pub struct IntegrationsConfig {
    #[serde(default)]
    pub nefit_easy: Option<NefitEasyConfig>,
}

impl Config {
    /// Load and validate configuration from a TOML file.
    ///
    /// If a state file is configured and exists, its device settings replace
    /// the configured ones.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().to_path_buf(), e))?;

        let mut config: Config = toml::from_str(&contents)?;
        if let Some(state_file) = &config.system.state_file {
            if state_file.exists() {
                let stored = load_device_state(state_file)?;
                config.apply_device_state(stored);
            }
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(api) = &self.api {
            if api.port == 0 {
                return Err(ConfigError::Invalid("api.port must not be 0".to_string()));
            }
        }
        if let Some(nefit_easy) = &self.integrations.nefit_easy {
            nefit_easy.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }

    /// Replace settings of configured devices with stored ones.
    ///
    /// Stored entries for devices no longer in the configuration are ignored.
    pub fn apply_device_state(&mut self, stored: BTreeMap<String, DeviceSettings>) {
        let Some(nefit_easy) = self.integrations.nefit_easy.as_mut() else {
            return;
        };
        for (id, settings) in stored {
            if let Some(device) = nefit_easy.devices.get_mut(&id) {
                *device = settings;
            }
        }
    }

    /// Build the log filter. `RUST_LOG` takes precedence when set.
    pub fn env_filter(&self) -> Result<EnvFilter, ConfigError> {
        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
            return Ok(EnvFilter::from_default_env());
        }

        let mut filter = EnvFilter::builder()
            .with_default_directive(LevelFilter::from(self.logging.level).into())
            .parse_lossy("");
        for (target, level) in &self.logging.overrides {
            let directive = format!("{}={}", target, LevelFilter::from(*level))
                .parse::<Directive>()
                .map_err(|e| {
                    ConfigError::Invalid(format!("logging.overrides.{}: {}", target, e))
                })?;
            filter = filter.add_directive(directive);
        }
        Ok(filter)
    }
}

/// Read persisted device settings.
pub fn load_device_state(path: &Path) -> Result<BTreeMap<String, DeviceSettings>, ConfigError> {
    let contents =
        std::fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
    Ok(toml::from_str(&contents)?)
}

/// Serialize device settings for the state file.
pub fn render_device_state(devices: &BTreeMap<String, DeviceSettings>) -> Result<String, ConfigError> {
    toml::to_string(devices).map_err(ConfigError::Serialize)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[source] toml::ser::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const DEVICE: &str = r#"
        [integrations.nefit_easy.devices.living_room]
        serial_number = "123456789"
        access_key = "abcdefghijklmnop"
        password = "secret"
        paired_with_app_version = "0.1.0"
    "#;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(!config.system.debug);
        assert!(config.api.is_none());
        assert!(config.integrations.nefit_easy.is_none());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = format!(
            r#"
            [logging]
            level = "debug"
            [logging.overrides]
            "nefitd::api" = "trace"

            [system]
            debug = true

            [api]
            port = 9000

            [integrations.nefit_easy]
            bridge_url = "http://bridge:3000"
            {}
            "#,
            DEVICE
        );

        let config: Config = toml::from_str(&toml).unwrap();
        assert_eq!(config.logging.level, LogLevel::Debug);
        assert_eq!(config.logging.overrides["nefitd::api"], LogLevel::Trace);
        assert!(config.system.debug);

        let api = config.api.as_ref().unwrap();
        assert_eq!(api.listen, "127.0.0.1");
        assert_eq!(api.port, 9000);

        let nefit_easy = config.integrations.nefit_easy.as_ref().unwrap();
        assert_eq!(nefit_easy.bridge_url, "http://bridge:3000");
        assert_eq!(nefit_easy.devices["living_room"].pressure_too_low, 1.2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_validates() {
        let file = write_config(
            r#"
            [integrations.nefit_easy.devices.living_room]
            serial_number = "123456789"
            access_key = "abcdefghijklmnop"
            password = "secret"
            pressure_too_low = 3.0
            "#,
        );

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("living_room")));
    }

    #[test]
    fn test_from_file_missing() {
        let err = Config::from_file("/nonexistent/nefitd.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(..)));
    }

    #[test]
    fn test_state_file_overrides_devices() {
        let dir = tempfile::tempdir().unwrap();
        let state_file = dir.path().join("state.toml");

        let mut stored = BTreeMap::new();
        let mut settings: DeviceSettings = toml::from_str(
            r#"
            serial_number = "123456789"
            access_key = "abcdefghijklmnop"
            password = "rotated"
            sync_interval = 120
            "#,
        )
        .unwrap();
        settings.paired_with_app_version = Some("0.1.0".to_string());
        stored.insert("living_room".to_string(), settings.clone());
        stored.insert("removed".to_string(), settings);
        std::fs::write(&state_file, render_device_state(&stored).unwrap()).unwrap();

        let file = write_config(&format!(
            "[system]\nstate_file = {:?}\n{}",
            state_file.display().to_string(),
            DEVICE
        ));
        let config = Config::from_file(file.path()).unwrap();

        let devices = &config.integrations.nefit_easy.as_ref().unwrap().devices;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices["living_room"].credentials.password, "rotated");
        assert_eq!(devices["living_room"].sync_interval, 120);
    }

    #[test]
    fn test_env_filter_with_overrides() {
        let mut config = Config::default();
        config.logging.level = LogLevel::Warn;
        config
            .logging
            .overrides
            .insert("nefitd::integrations".to_string(), LogLevel::Debug);

        assert!(config.env_filter().is_ok());
    }
}
