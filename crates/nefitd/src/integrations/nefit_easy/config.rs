use std::collections::BTreeMap;
use std::collections::HashSet;

use serde::Deserialize;

use super::settings::DeviceSettings;

fn default_bridge_url() -> String {
    "http://127.0.0.1:3000".to_string()
}

/// Configuration for the Nefit Easy integration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Base URL of the backend bridge
    #[serde(default = "default_bridge_url")]
    pub bridge_url: String,

    /// Paired devices, keyed by device id
    #[serde(default)]
    pub devices: BTreeMap<String, DeviceSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bridge_url: default_bridge_url(),
            devices: BTreeMap::new(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.bridge_url.is_empty() {
            return Err("nefit_easy.bridge_url must not be empty".to_string());
        }

        let mut serials = HashSet::new();
        for (id, device) in &self.devices {
            device
                .validate()
                .map_err(|e| format!("nefit_easy.devices.{}: {}", id, e))?;
            if !serials.insert(device.credentials.serial_number.as_str()) {
                return Err(format!(
                    "nefit_easy.devices.{}: serial number {} is used by another device",
                    id, device.credentials.serial_number
                ));
            }
        }
        Ok(())
    }

    /// Serial numbers of all devices except `except`.
    pub fn registered_serials<'a>(&'a self, except: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.devices
            .iter()
            .filter(move |(id, _)| id.as_str() != except)
            .map(|(_, d)| d.credentials.serial_number.as_str())
    }
}
