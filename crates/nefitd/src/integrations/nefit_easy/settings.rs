use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use super::alarm::PressureThresholds;

fn default_pressure_too_low() -> f64 {
    1.2
}

fn default_pressure_too_high() -> f64 {
    2.8
}

fn default_sync_interval() -> u64 {
    30
}

/// Connection settings for the Nefit Easy backend.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub serial_number: String,
    pub access_key: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("serial_number", &self.serial_number)
            .field("access_key", &"<redacted>")
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Persisted per-device settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    #[serde(flatten)]
    pub credentials: Credentials,

    /// Pressure (bar) below which the pressure alarm activates
    #[serde(default = "default_pressure_too_low")]
    pub pressure_too_low: f64,

    /// Pressure (bar) above which the pressure alarm activates
    #[serde(default = "default_pressure_too_high")]
    pub pressure_too_high: f64,

    /// Poll interval in seconds
    #[serde(default = "default_sync_interval")]
    pub sync_interval: u64,

    /// Integration version the device was paired under. Devices without it
    /// must be paired again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paired_with_app_version: Option<String>,
}

/// A partial settings update. Missing or empty fields keep the stored value.
#[derive(Clone, Default, Deserialize)]
pub struct SettingsPatch {
    pub serial_number: Option<String>,
    pub access_key: Option<String>,
    pub password: Option<String>,
    pub pressure_too_low: Option<f64>,
    pub pressure_too_high: Option<f64>,
    pub sync_interval: Option<u64>,
}

impl fmt::Debug for SettingsPatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |v: &Option<String>| v.as_ref().map(|_| "<redacted>");
        f.debug_struct("SettingsPatch")
            .field("serial_number", &self.serial_number)
            .field("access_key", &redact(&self.access_key))
            .field("password", &redact(&self.password))
            .field("pressure_too_low", &self.pressure_too_low)
            .field("pressure_too_high", &self.pressure_too_high)
            .field("sync_interval", &self.sync_interval)
            .finish()
    }
}

/// Keys whose change requires the credentials to be validated again.
pub const CREDENTIAL_KEYS: [&str; 3] = ["serial_number", "access_key", "password"];

impl DeviceSettings {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            pressure_too_low: default_pressure_too_low(),
            pressure_too_high: default_pressure_too_high(),
            sync_interval: default_sync_interval(),
            paired_with_app_version: None,
        }
    }

    pub fn thresholds(&self) -> PressureThresholds {
        PressureThresholds {
            low: self.pressure_too_low,
            high: self.pressure_too_high,
        }
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval)
    }

    pub fn validate(&self) -> Result<(), String> {
        let credentials = &self.credentials;
        if credentials.serial_number.is_empty()
            || credentials.access_key.is_empty()
            || credentials.password.is_empty()
        {
            return Err("serial number, access key and password are required".to_string());
        }
        if self.pressure_too_low >= self.pressure_too_high {
            return Err(format!(
                "pressure_too_low ({}) must be below pressure_too_high ({})",
                self.pressure_too_low, self.pressure_too_high
            ));
        }
        if self.sync_interval == 0 {
            return Err("sync_interval must be at least 1 second".to_string());
        }
        Ok(())
    }

    /// Merge a patch into these settings.
    ///
    /// Returns the merged settings together with the keys whose value
    /// actually changed.
    pub fn apply(&self, patch: &SettingsPatch) -> (DeviceSettings, Vec<&'static str>) {
        let mut merged = self.clone();
        let mut changed = Vec::new();

        let text_fields = [
            (
                "serial_number",
                &patch.serial_number,
                &mut merged.credentials.serial_number,
            ),
            ("access_key", &patch.access_key, &mut merged.credentials.access_key),
            ("password", &patch.password, &mut merged.credentials.password),
        ];
        for (key, new, current) in text_fields {
            if let Some(new) = new.as_deref().filter(|s| !s.is_empty()) {
                if new != current.as_str() {
                    *current = new.to_string();
                    changed.push(key);
                }
            }
        }

        if let Some(low) = patch.pressure_too_low {
            if low != merged.pressure_too_low {
                merged.pressure_too_low = low;
                changed.push("pressure_too_low");
            }
        }
        if let Some(high) = patch.pressure_too_high {
            if high != merged.pressure_too_high {
                merged.pressure_too_high = high;
                changed.push("pressure_too_high");
            }
        }
        if let Some(interval) = patch.sync_interval.filter(|i| *i > 0) {
            if interval != merged.sync_interval {
                merged.sync_interval = interval;
                changed.push("sync_interval");
            }
        }

        (merged, changed)
    }

    /// Copy of these settings safe to expose outside the daemon.
    pub fn redacted(&self) -> DeviceSettings {
        let mut settings = self.clone();
        settings.credentials.access_key = "********".to_string();
        settings.credentials.password = "********".to_string();
        settings
    }
}

pub fn credentials_changed(changed_keys: &[&str]) -> bool {
    changed_keys.iter().any(|key| CREDENTIAL_KEYS.contains(key))
}
