use std::collections::BTreeMap;

use serde::Serialize;

use crate::integrations::nefit_easy::AvailabilityState;
use crate::integrations::nefit_easy::Capability;
use crate::integrations::nefit_easy::CapabilityValue;
use crate::integrations::nefit_easy::DeviceSettings;

/// State of one device as last reported by its integration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeviceState {
    /// Integration that owns the device
    pub integration: String,

    pub availability: AvailabilityState,

    /// Last published value of every capability reported so far
    pub capabilities: BTreeMap<Capability, CapabilityValue>,

    /// Current settings with secrets redacted
    pub settings: DeviceSettings,
}

impl DeviceState {
    pub fn new(integration: String, settings: DeviceSettings) -> Self {
        Self {
            integration,
            availability: AvailabilityState::Connecting,
            capabilities: BTreeMap::new(),
            settings,
        }
    }
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub devices: BTreeMap<String, DeviceState>,
}
