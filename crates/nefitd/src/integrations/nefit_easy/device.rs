use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::info;
use tracing::warn;

use super::availability::AvailabilityState;
use super::availability::AvailabilityStateMachine;
use super::availability::REASON_FORCE_REPAIR;
use super::capability::Capability;
use super::capability::CapabilityValue;
use super::client::ClientFactory;
use super::client::ClientSlot;
use super::client::RemoteClient;
use super::credentials::CredentialValidator;
use super::error::Error;
use super::error::Result;
use super::pairing::APP_VERSION;
use super::port::PlatformPort;
use super::reconcile::StatusReconciler;
use super::scheduler::SyncScheduler;
use super::scheduler::SyncTarget;
use super::settings::DeviceSettings;
use super::settings::SettingsPatch;
use super::settings::credentials_changed;
use super::store::CapabilityStore;
use super::write::CapabilityWriteController;
use super::write::WriteOutcome;

/// One paired Nefit Easy appliance.
///
/// Owns the active client and wires the poll cycle, the write pipeline and
/// credential changes together.
pub struct NefitEasyDevice<F: ClientFactory> {
    id: String,
    factory: Arc<F>,
    port: Arc<dyn PlatformPort>,
    settings: ArcSwap<DeviceSettings>,
    client: Arc<ClientSlot<F::Client>>,
    store: Arc<CapabilityStore>,
    availability: Arc<AvailabilityStateMachine>,
    reconciler: StatusReconciler,
    writes: Arc<CapabilityWriteController<F::Client>>,
    credentials: CredentialValidator<F>,
    scheduler: SyncScheduler,
    removed: AtomicBool,

    /// Serializes settings updates
    settings_lock: Mutex<()>,
}

impl<F: ClientFactory> NefitEasyDevice<F> {
    pub fn new(
        id: String,
        settings: DeviceSettings,
        factory: Arc<F>,
        port: Arc<dyn PlatformPort>,
        debug: bool,
    ) -> Arc<Self> {
        let client = Arc::new(ClientSlot::empty());
        let store = Arc::new(CapabilityStore::new(id.clone(), port.clone()));
        let availability = Arc::new(AvailabilityStateMachine::new(id.clone(), port.clone()));

        Arc::new(Self {
            reconciler: StatusReconciler::new(id.clone(), store.clone(), port.clone()),
            writes: Arc::new(CapabilityWriteController::new(
                id.clone(),
                client.clone(),
                store.clone(),
            )),
            credentials: CredentialValidator::new(
                id.clone(),
                factory.clone(),
                client.clone(),
                availability.clone(),
            ),
            scheduler: SyncScheduler::new(id.clone(), debug, availability.clone()),
            id,
            factory,
            port,
            settings: ArcSwap::from_pointee(settings),
            client,
            store,
            availability,
            removed: AtomicBool::new(false),
            settings_lock: Mutex::new(()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn settings(&self) -> Arc<DeviceSettings> {
        self.settings.load_full()
    }

    pub fn availability(&self) -> AvailabilityState {
        self.availability.current()
    }

    pub fn capability(&self, capability: Capability) -> Option<CapabilityValue> {
        self.store.get(capability)
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::Acquire)
    }

    /// Connect to the backend and start polling.
    ///
    /// A connection failure leaves the device unavailable until its
    /// credentials are changed.
    pub async fn init(self: &Arc<Self>) -> Result<()> {
        let _guard = self.settings_lock.lock().await;
        if self.is_removed() {
            return Err(Error::Removed);
        }
        info!("[{}] Initializing", self.id);
        self.availability.connecting().await;

        let settings = self.settings();
        let client = match self.factory.connect(&settings.credentials).await {
            Ok(client) => client,
            Err(e) => {
                let e = Error::Connection(e);
                warn!("[{}] {}", self.id, e);
                self.availability.unavailable(e.to_string()).await;
                return Err(e);
            }
        };
        if let Some(previous) = self.client.replace(client) {
            previous.end().await;
        }

        if settings.paired_with_app_version.is_none() {
            warn!("[{}] Paired with an older version, not syncing", self.id);
            self.availability.unavailable(REASON_FORCE_REPAIR).await;
            return Ok(());
        }

        self.scheduler.start(self);
        Ok(())
    }

    /// Change a writable capability on the appliance.
    pub async fn request_write(
        self: &Arc<Self>,
        capability: Capability,
        value: CapabilityValue,
    ) -> Result<WriteOutcome> {
        if self.is_removed() {
            return Err(Error::Removed);
        }
        if self.settings.load().paired_with_app_version.is_none() {
            return Err(Error::RepairRequired);
        }
        self.writes.request(capability, value).await
    }

    /// Merge `patch` into the stored settings.
    ///
    /// Changed credentials are validated against the backend first. The new
    /// client only becomes active once the settings are persisted; if either
    /// step fails nothing is changed. Returns the settings now in effect.
    pub async fn update_settings(self: &Arc<Self>, patch: &SettingsPatch) -> Result<DeviceSettings> {
        let _guard = self.settings_lock.lock().await;
        if self.is_removed() {
            return Err(Error::Removed);
        }

        let current = self.settings();
        let (mut merged, changed) = current.apply(patch);
        if changed.is_empty() {
            return Ok(DeviceSettings::clone(&current));
        }
        merged.validate().map_err(Error::InvalidSettings)?;
        info!("[{}] Settings changed: {}", self.id, changed.join(", "));

        let client = if credentials_changed(&changed) {
            let client = self.credentials.validate(&merged.credentials).await?;
            // Entering working credentials counts as pairing again
            merged.paired_with_app_version = Some(APP_VERSION.to_string());
            Some(client)
        } else {
            None
        };

        if self.is_removed() {
            if let Some(client) = client {
                client.end().await;
            }
            return Err(Error::Removed);
        }
        if let Err(e) = self.port.persist_settings(&merged).await {
            if let Some(client) = client {
                client.end().await;
            }
            return Err(Error::Persist(e.to_string()));
        }
        self.settings.store(Arc::new(merged.clone()));

        if let Some(client) = client {
            self.credentials.activate(client).await?;
            if self.scheduler.start(self) {
                info!("[{}] Sync resumed", self.id);
            }
        }
        Ok(merged)
    }

    /// Tear the device down: stop polling, halt availability, release the
    /// client. Idempotent.
    ///
    /// Waits for an in-flight init or settings update, which sees the removal
    /// and backs out before installing a client.
    pub async fn remove(&self) {
        if self.removed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("[{}] Removing", self.id);
        self.scheduler.stop();
        let _guard = self.settings_lock.lock().await;
        self.availability.halt().await;
        if let Some(client) = self.client.take() {
            client.end().await;
        }
    }
}

#[async_trait]
impl<F: ClientFactory> SyncTarget for NefitEasyDevice<F> {
    fn scheduler(&self) -> &SyncScheduler {
        &self.scheduler
    }

    fn sync_interval(&self) -> Duration {
        self.settings.load().sync_interval()
    }

    async fn reconcile(&self) -> Result<()> {
        let client = self.client.get().ok_or(Error::NotConnected)?;
        let thresholds = self.settings.load().thresholds();
        self.reconciler
            .reconcile(client.as_ref(), &thresholds)
            .await
            .map_err(Error::Sync)
    }
}
