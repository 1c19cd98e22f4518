use serde::Serialize;

use crate::integrations::nefit_easy::AvailabilityState;
use crate::integrations::nefit_easy::Capability;
use crate::integrations::nefit_easy::CapabilityValue;

/// Automation-level events.
///
/// Distinct from `FromIntegrationMessage` (transport-level). The engine converts
/// `FromIntegrationMessage` into `Event` at the boundary and broadcasts them to
/// subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    CapabilityChanged {
        device_id: String,
        capability: Capability,
        value: CapabilityValue,
    },
    AvailabilityChanged {
        device_id: String,
        state: AvailabilityState,
    },
    PressureAlarmActivated {
        device_id: String,
        pressure: f64,
    },
}
