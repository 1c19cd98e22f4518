//! Test helpers: an in-memory integration and a running engine around it.

use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::Engine;
use super::FromIntegrationMessage;
use super::FromIntegrationSender;
use super::Integration;
use super::State;
use super::ToIntegrationMessage;
use crate::integrations::nefit_easy::AvailabilityState;
use crate::integrations::nefit_easy::Capability;
use crate::integrations::nefit_easy::CapabilityValue;
use crate::integrations::nefit_easy::Credentials;
use crate::integrations::nefit_easy::DeviceSettings;
use crate::integrations::nefit_easy::Error as DeviceError;
use crate::integrations::nefit_easy::WriteOutcome;

pub fn settings() -> DeviceSettings {
    let mut settings = DeviceSettings::new(Credentials {
        serial_number: "123456789".to_string(),
        access_key: "abcdefghijklmnop".to_string(),
        password: "secret".to_string(),
    });
    settings.paired_with_app_version = Some("0.1.0".to_string());
    settings
}

/// Records what it is asked to do; shared with the test through `Arc`s.
#[derive(Clone, Default)]
pub struct FakeIntegration {
    pub writes: Arc<Mutex<Vec<(Capability, CapabilityValue)>>>,
    pub shut_down: Arc<Mutex<bool>>,
    tx: Option<FromIntegrationSender>,
}

impl FakeIntegration {
    async fn send(&self, msg: FromIntegrationMessage) {
        if let Some(tx) = &self.tx {
            tx.send(msg).await.unwrap();
        }
    }
}

#[async_trait]
impl Integration for FakeIntegration {
    fn name(&self) -> &str {
        "fake"
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        self.tx = Some(tx);
        self.send(FromIntegrationMessage::DeviceRegistered {
            device_id: "dev1".to_string(),
            integration_name: "fake".to_string(),
            settings: settings().redacted(),
        })
        .await;
        self.send(FromIntegrationMessage::CapabilityChanged {
            device_id: "dev1".to_string(),
            capability: Capability::TargetTemperature,
            value: CapabilityValue::Number(20.0),
        })
        .await;
        self.send(FromIntegrationMessage::AvailabilityChanged {
            device_id: "dev1".to_string(),
            state: AvailabilityState::Available,
        })
        .await;
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::SetCapability {
                capability,
                value,
                reply,
                ..
            } => {
                let result = if capability.is_writable() {
                    self.writes.lock().unwrap().push((capability, value));
                    Ok(WriteOutcome::Applied)
                } else {
                    Err(DeviceError::NotWritable(capability))
                };
                let _ = reply.send(result);
            }
            ToIntegrationMessage::UpdateSettings { patch, reply, .. } => {
                let (merged, _) = settings().apply(&patch);
                let _ = reply.send(Ok(merged.redacted()));
            }
            ToIntegrationMessage::RemoveDevice { device_id } => {
                self.send(FromIntegrationMessage::DeviceRemoved { device_id })
                    .await;
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        *self.shut_down.lock().unwrap() = true;
        Ok(())
    }
}

/// Wait until the engine state satisfies `f`.
pub async fn wait_for(engine: &Engine, f: impl Fn(&State) -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !f(&engine.state_snapshot()) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
}

/// Start `engine` with a [`FakeIntegration`] and wait for its device.
pub async fn running_engine(mut engine: Engine) -> (Arc<Engine>, FakeIntegration) {
    let fake = FakeIntegration::default();
    engine.register_integration("fake".to_string(), Box::new(fake.clone()));

    let engine = Arc::new(engine);
    let runner = engine.clone();
    tokio::spawn(async move { runner.run().await });

    wait_for(&engine, |s| {
        s.devices
            .get("dev1")
            .is_some_and(|d| d.availability.is_available())
    })
    .await;
    (engine, fake)
}
