use async_trait::async_trait;
use tracing::warn;

use super::availability::AvailabilityState;
use super::capability::Capability;
use super::capability::CapabilityValue;
use super::settings::DeviceSettings;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct PortError(pub String);

/// Everything a device needs from the platform hosting it.
#[async_trait]
pub trait PlatformPort: Send + Sync {
    /// Publish a new capability value.
    async fn publish_capability(
        &self,
        capability: Capability,
        value: &CapabilityValue,
    ) -> Result<(), PortError>;

    async fn publish_availability(&self, state: &AvailabilityState);

    /// Fire the "pressure alarm activated" trigger.
    async fn trigger_pressure_alarm(&self, pressure: f64);

    async fn persist_settings(&self, settings: &DeviceSettings) -> Result<(), PortError>;
}

/// Port that reports to the engine over the integration channel.
pub struct EnginePort {
    device_id: String,
    to_engine: FromIntegrationSender,
}

impl EnginePort {
    pub fn new(device_id: String, to_engine: FromIntegrationSender) -> Self {
        Self {
            device_id,
            to_engine,
        }
    }

    async fn send(&self, msg: FromIntegrationMessage) -> Result<(), PortError> {
        self.to_engine
            .send(msg)
            .await
            .map_err(|e| PortError(format!("engine channel closed: {}", e)))
    }
}

#[async_trait]
impl PlatformPort for EnginePort {
    async fn publish_capability(
        &self,
        capability: Capability,
        value: &CapabilityValue,
    ) -> Result<(), PortError> {
        self.send(FromIntegrationMessage::CapabilityChanged {
            device_id: self.device_id.clone(),
            capability,
            value: value.clone(),
        })
        .await
    }

    async fn publish_availability(&self, state: &AvailabilityState) {
        let msg = FromIntegrationMessage::AvailabilityChanged {
            device_id: self.device_id.clone(),
            state: state.clone(),
        };
        if let Err(e) = self.send(msg).await {
            warn!("[{}] Failed to send AvailabilityChanged message: {}", self.device_id, e);
        }
    }

    async fn trigger_pressure_alarm(&self, pressure: f64) {
        let msg = FromIntegrationMessage::PressureAlarmActivated {
            device_id: self.device_id.clone(),
            pressure,
        };
        if let Err(e) = self.send(msg).await {
            warn!("[{}] Failed to send PressureAlarmActivated message: {}", self.device_id, e);
        }
    }

    async fn persist_settings(&self, settings: &DeviceSettings) -> Result<(), PortError> {
        self.send(FromIntegrationMessage::SettingsChanged {
            device_id: self.device_id.clone(),
            settings: settings.clone(),
        })
        .await
    }
}
