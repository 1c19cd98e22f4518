use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use tracing::warn;

use super::Config;
use super::client::ClientFactory;
use super::device::NefitEasyDevice;
use super::error::Error;
use super::port::EnginePort;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

pub const INTEGRATION_NAME: &str = "nefit_easy";

/// Nefit Easy integration for nefitd
///
/// Owns one [`NefitEasyDevice`] per configured appliance and routes engine
/// commands to them. Commands run in their own tasks so a debounced write
/// never holds up the command loop.
pub struct NefitEasyIntegration<F: ClientFactory> {
    factory: Arc<F>,
    config: Config,
    debug: bool,
    devices: BTreeMap<String, Arc<NefitEasyDevice<F>>>,
    to_engine: Option<FromIntegrationSender>,
}

impl<F: ClientFactory> NefitEasyIntegration<F> {
    pub fn new(factory: Arc<F>, config: &Config, debug: bool) -> Self {
        Self {
            factory,
            config: config.clone(),
            debug,
            devices: BTreeMap::new(),
            to_engine: None,
        }
    }

    async fn notify(&self, msg: FromIntegrationMessage) -> Result<(), Box<dyn StdError + Send>> {
        match &self.to_engine {
            Some(tx) => tx
                .send(msg)
                .await
                .map_err(|e| -> Box<dyn StdError + Send> { Box::new(e) }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<F: ClientFactory> Integration for NefitEasyIntegration<F> {
    fn name(&self) -> &str {
        INTEGRATION_NAME
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn StdError + Send>> {
        info!("Setting up Nefit Easy integration ({} devices)", self.config.devices.len());
        self.to_engine = Some(tx.clone());

        for (id, settings) in &self.config.devices {
            // Registration goes out before the device reports anything
            self.notify(FromIntegrationMessage::DeviceRegistered {
                device_id: id.clone(),
                integration_name: INTEGRATION_NAME.to_string(),
                settings: settings.redacted(),
            })
            .await?;

            let port = Arc::new(EnginePort::new(id.clone(), tx.clone()));
            let device = NefitEasyDevice::new(
                id.clone(),
                settings.clone(),
                self.factory.clone(),
                port,
                self.debug,
            );
            self.devices.insert(id.clone(), device.clone());

            tokio::spawn(async move {
                if let Err(e) = device.init().await {
                    warn!("[{}] Initialization failed: {}", device.id(), e);
                }
            });
        }

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn StdError + Send>> {
        match msg {
            ToIntegrationMessage::SetCapability {
                device_id,
                capability,
                value,
                reply,
            } => {
                let Some(device) = self.devices.get(&device_id).cloned() else {
                    let _ = reply.send(Err(Error::UnknownDevice(device_id)));
                    return Ok(());
                };
                tokio::spawn(async move {
                    let result = device.request_write(capability, value).await;
                    // The requester may have gone away
                    let _ = reply.send(result);
                });
            }
            ToIntegrationMessage::UpdateSettings {
                device_id,
                patch,
                reply,
            } => {
                let Some(device) = self.devices.get(&device_id).cloned() else {
                    let _ = reply.send(Err(Error::UnknownDevice(device_id)));
                    return Ok(());
                };
                tokio::spawn(async move {
                    let result = device.update_settings(&patch).await;
                    let _ = reply.send(result.map(|s| s.redacted()));
                });
            }
            ToIntegrationMessage::RemoveDevice { device_id } => {
                if let Some(device) = self.devices.remove(&device_id) {
                    device.remove().await;
                    self.notify(FromIntegrationMessage::DeviceRemoved { device_id })
                        .await?;
                } else {
                    warn!("Asked to remove unknown device {}", device_id);
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn StdError + Send>> {
        info!("Shutting down Nefit Easy integration");
        for device in std::mem::take(&mut self.devices).into_values() {
            device.remove().await;
        }
        Ok(())
    }
}
