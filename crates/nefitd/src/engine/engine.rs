use std::collections::BTreeMap;
use std::collections::HashMap;
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::DeviceState;
use super::state::State;
use crate::config::render_device_state;
use crate::engine::IntegrationContext;
use crate::integrations::nefit_easy::Capability;
use crate::integrations::nefit_easy::CapabilityValue;
use crate::integrations::nefit_easy::DeviceSettings;
use crate::integrations::nefit_easy::Error as DeviceError;
use crate::integrations::nefit_easy::SettingsPatch;
use crate::integrations::nefit_easy::WriteOutcome;

/// Errors returned to callers of engine commands.
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("integration '{0}' is not running")]
    IntegrationUnavailable(String),

    #[error("integration dropped the request")]
    Dropped,

    #[error(transparent)]
    Device(#[from] DeviceError),
}

/// nefitd engine
///
/// This structure handles the flow of events, sending commands to the
/// integration that owns a device, and maintaining a view of every device
/// with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of device_id -> integration name for routing messages
    device_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,

    /// Automation-level events for subscribers
    events: broadcast::Sender<Event>,

    /// Full (unredacted) settings of every device that reported a change
    persisted: std::sync::Mutex<BTreeMap<String, DeviceSettings>>,

    /// Where persisted settings are written
    state_file: Option<PathBuf>,
}

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Events a slow subscriber may fall behind by before it starts missing some
const EVENT_CHANNEL_SIZE: usize = 256;

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            device_integration_map: std::sync::Mutex::new(HashMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            integration_handles: std::sync::Mutex::new(Vec::new()),
            events,
            persisted: std::sync::Mutex::new(BTreeMap::new()),
            state_file: None,
        }
    }

    /// Persist settings changes to `path`.
    pub fn with_state_file(mut self, path: PathBuf) -> Self {
        self.state_file = Some(path);
        self
    }

    /// Register integrations from configuration
    ///
    /// This is a convenience method that checks the config and registers
    /// any enabled integrations.
    pub fn register_integrations_from_config(&mut self, cfg: &crate::config::Config) {
        let ctx = IntegrationContext { config: cfg };
        for constr in super::integration::REGISTRY {
            let integration = match constr(&ctx) {
                Ok(Some(i)) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
                Ok(None) => continue,
            };
            let name = integration.name().to_string();
            self.register_integration(name, integration);
        }
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&mut self, name: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        self.integration_channels
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.clone(), to_integration_tx);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
        });

        self.integration_handles
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on device_id.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), CommandError> {
        let device_id = match &msg {
            ToIntegrationMessage::SetCapability { device_id, .. }
            | ToIntegrationMessage::UpdateSettings { device_id, .. }
            | ToIntegrationMessage::RemoveDevice { device_id } => device_id.clone(),
        };

        let integration_name = self
            .device_integration_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&device_id)
            .cloned()
            .ok_or_else(|| CommandError::UnknownDevice(device_id))?;

        let channels = self
            .integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let tx = channels
            .get(&integration_name)
            .ok_or_else(|| CommandError::IntegrationUnavailable(integration_name.clone()))?;

        tx.send(msg)
            .map_err(|_| CommandError::IntegrationUnavailable(integration_name))
    }

    /// Request a new value for a device capability.
    ///
    /// Resolves once the (debounced) write has been executed.
    pub async fn set_capability(
        &self,
        device_id: String,
        capability: Capability,
        value: CapabilityValue,
    ) -> Result<WriteOutcome, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(ToIntegrationMessage::SetCapability {
            device_id,
            capability,
            value,
            reply,
        })?;
        rx.await
            .map_err(|_| CommandError::Dropped)?
            .map_err(CommandError::from)
    }

    /// Apply a partial settings update to a device.
    ///
    /// Returns the settings now in effect, with secrets redacted.
    pub async fn update_settings(
        &self,
        device_id: String,
        patch: SettingsPatch,
    ) -> Result<DeviceSettings, CommandError> {
        let (reply, rx) = oneshot::channel();
        self.send_command(ToIntegrationMessage::UpdateSettings {
            device_id,
            patch,
            reply,
        })?;
        rx.await
            .map_err(|_| CommandError::Dropped)?
            .map_err(CommandError::from)
    }

    pub fn remove_device(&self, device_id: String) -> Result<(), CommandError> {
        self.send_command(ToIntegrationMessage::RemoveDevice { device_id })
    }

    /// Subscribe to automation-level events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        // Main event loop - only receives FromIntegration messages
        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            if let Err(e) = self.handle_event(msg).await {
                warn!("Error handling event: {}", e);
            }
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Stop all integrations and wait for them to shut down.
    pub async fn shutdown(&self) {
        // Dropping the command channels ends each integration's loop
        self.integration_channels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();

        let handles = std::mem::take(
            &mut *self
                .integration_handles
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("Integration task failed: {}", e);
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    #[cfg(test)]
    pub(crate) fn sender(&self) -> FromIntegrationSender {
        self.message_tx.clone()
    }

    /// Apply `f` to a device's state. Returns false if the device is unknown.
    fn update_device(&self, device_id: &str, f: impl FnOnce(&mut DeviceState)) -> bool {
        let mut state = State::clone(&self.state.load());
        let Some(device) = state.devices.get_mut(device_id) else {
            warn!("Update for unregistered device {}", device_id);
            return false;
        };
        f(device);
        self.state.store(Arc::new(state));
        true
    }

    fn publish(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn persist(&self, device_id: String, settings: DeviceSettings) -> Result<(), Box<dyn Error + Send>> {
        let rendered = {
            let mut persisted = self.persisted.lock().unwrap_or_else(PoisonError::into_inner);
            persisted.insert(device_id, settings);
            render_device_state(&persisted)
        };
        let Some(path) = &self.state_file else {
            return Ok(());
        };

        let rendered = rendered.map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
        tokio::fs::write(path, rendered)
            .await
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
        debug!("Persisted device settings to {}", path.display());
        Ok(())
    }

    /// Handle an event from an integration
    async fn handle_event(&self, msg: FromIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            FromIntegrationMessage::DeviceRegistered {
                device_id,
                integration_name,
                settings,
            } => {
                info!("Device registered: {} (from {})", device_id, integration_name);

                self.device_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(device_id.clone(), integration_name.clone());

                let mut state = State::clone(&self.state.load());
                state
                    .devices
                    .insert(device_id, DeviceState::new(integration_name, settings));
                self.state.store(Arc::new(state));
            }
            FromIntegrationMessage::DeviceRemoved { device_id } => {
                info!("Device removed: {}", device_id);

                let mut state = State::clone(&self.state.load());
                state.devices.remove(&device_id);
                self.state.store(Arc::new(state));

                self.device_integration_map
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&device_id);
            }
            FromIntegrationMessage::CapabilityChanged {
                device_id,
                capability,
                value,
            } => {
                debug!("Capability changed: {}.{} -> {}", device_id, capability, value);

                let updated = self.update_device(&device_id, |d| {
                    d.capabilities.insert(capability, value.clone());
                });
                if updated {
                    self.publish(Event::CapabilityChanged {
                        device_id,
                        capability,
                        value,
                    });
                }
            }
            FromIntegrationMessage::AvailabilityChanged { device_id, state } => {
                info!("Availability changed: {} -> {:?}", device_id, state);

                let updated = self.update_device(&device_id, |d| d.availability = state.clone());
                if updated {
                    self.publish(Event::AvailabilityChanged { device_id, state });
                }
            }
            FromIntegrationMessage::PressureAlarmActivated {
                device_id,
                pressure,
            } => {
                warn!("Pressure alarm activated: {} at {} bar", device_id, pressure);
                self.publish(Event::PressureAlarmActivated {
                    device_id,
                    pressure,
                });
            }
            FromIntegrationMessage::SettingsChanged {
                device_id,
                settings,
            } => {
                info!("Settings changed: {}", device_id);

                let redacted = settings.redacted();
                self.update_device(&device_id, |d| d.settings = redacted);
                self.persist(device_id, settings).await?;
            }
        }
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
