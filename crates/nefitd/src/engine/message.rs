//! Type-safe message system for nefitd
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use tokio::sync::oneshot;

use crate::integrations::nefit_easy::AvailabilityState;
use crate::integrations::nefit_easy::Capability;
use crate::integrations::nefit_easy::CapabilityValue;
use crate::integrations::nefit_easy::DeviceSettings;
use crate::integrations::nefit_easy::Error as DeviceError;
use crate::integrations::nefit_easy::SettingsPatch;
use crate::integrations::nefit_easy::WriteOutcome;

pub type WriteReply = oneshot::Sender<Result<WriteOutcome, DeviceError>>;
pub type SettingsReply = oneshot::Sender<Result<DeviceSettings, DeviceError>>;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// A device was set up. Always precedes any other message about it.
    DeviceRegistered {
        device_id: String,
        integration_name: String,
        /// Secrets are redacted
        settings: DeviceSettings,
    },

    /// A device was torn down
    DeviceRemoved { device_id: String },

    /// A capability took a new value
    CapabilityChanged {
        device_id: String,
        capability: Capability,
        value: CapabilityValue,
    },

    /// A device became (un)reachable
    AvailabilityChanged {
        device_id: String,
        state: AvailabilityState,
    },

    /// System pressure left the configured range
    PressureAlarmActivated { device_id: String, pressure: f64 },

    /// Device settings changed and should be persisted
    SettingsChanged {
        device_id: String,
        settings: DeviceSettings,
    },
}

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    /// Change a writable capability
    SetCapability {
        device_id: String,
        capability: Capability,
        value: CapabilityValue,
        reply: WriteReply,
    },

    /// Apply a partial settings update
    UpdateSettings {
        device_id: String,
        patch: SettingsPatch,
        reply: SettingsReply,
    },

    /// Tear a device down
    RemoveDevice { device_id: String },
}
