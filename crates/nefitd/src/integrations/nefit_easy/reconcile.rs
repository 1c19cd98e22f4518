use std::sync::Arc;

use tracing::debug;
use tracing::info;

use super::alarm;
use super::alarm::PressureThresholds;
use super::capability::Capability;
use super::client::ClientError;
use super::client::Pressure;
use super::client::RemoteClient;
use super::client::Status;
use super::client::SwitchStatus;
use super::port::PlatformPort;
use super::store::CapabilityStore;

/// Readings at or above this are considered bogus.
pub const PRESSURE_SANITY_CEILING: f64 = 25.0;

/// Projects backend snapshots onto the capability store.
pub struct StatusReconciler {
    device_id: String,
    store: Arc<CapabilityStore>,
    port: Arc<dyn PlatformPort>,
}

impl StatusReconciler {
    pub fn new(device_id: String, store: Arc<CapabilityStore>, port: Arc<dyn PlatformPort>) -> Self {
        Self {
            device_id,
            store,
            port,
        }
    }

    /// Fetch all snapshots and apply them.
    ///
    /// Fails only if one of the fetches fails. Individual store writes that
    /// fail are logged and do not abort the others.
    pub async fn reconcile<C: RemoteClient + ?Sized>(
        &self,
        client: &C,
        thresholds: &PressureThresholds,
    ) -> Result<(), ClientError> {
        let (status, pressure, holiday_mode, shower_timer) = tokio::try_join!(
            client.status(),
            client.pressure(),
            client.holiday_mode(),
            client.shower_timer(),
        )?;

        self.apply_status(&status).await;

        if let Some(holiday_mode) = holiday_mode {
            self.apply_switch(Capability::HolidayMode, &holiday_mode).await;
        }
        if let Some(shower_timer) = shower_timer {
            self.apply_switch(Capability::ShowerTimer, &shower_timer).await;
        }

        if let Some(pressure) = pressure {
            self.apply_pressure(&pressure, thresholds).await;
        }

        Ok(())
    }

    async fn apply_status(&self, status: &Status) {
        debug!("[{}] ...updating status", self.device_id);
        let store = &self.store;

        store
            .apply(Capability::ClockProgramme, status.clock_programme())
            .await;
        store
            .apply(Capability::FireplaceMode, status.fireplace_mode_on())
            .await;
        store
            .apply(Capability::OperatingMode, status.boiler_indicator.clone())
            .await;
        store
            .apply(Capability::CentralHeating, status.central_heating())
            .await;
        if let Some(temp) = status.in_house_temp {
            store.apply(Capability::IndoorTemperature, temp).await;
        }
        if let Some(temp) = status.outdoor_temp {
            store.apply(Capability::OutdoorTemperature, temp).await;
        }
        store
            .apply(Capability::TargetTemperature, status.target_temperature())
            .await;
    }

    async fn apply_switch(&self, capability: Capability, status: &SwitchStatus) {
        self.store.apply(capability, status.is_on()).await;
    }

    async fn apply_pressure(&self, pressure: &Pressure, thresholds: &PressureThresholds) {
        if pressure.unit != "bar"
            || pressure.pressure.is_nan()
            || pressure.pressure >= PRESSURE_SANITY_CEILING
        {
            debug!(
                "[{}] Discarding pressure reading {} {}",
                self.device_id, pressure.pressure, pressure.unit
            );
            return;
        }

        debug!("[{}] ...updating pressure: {:?}", self.device_id, pressure);
        let value = pressure.pressure;
        let previously_active = self
            .store
            .get_bool(Capability::AlarmPressure)
            .unwrap_or(false);
        let evaluation = alarm::evaluate(value, thresholds, previously_active);

        if let Some(activated) = evaluation.activated {
            info!(
                "[{}] ...activating pressure alarm (lower limit = {}, upper limit = {})",
                self.device_id, thresholds.low, thresholds.high
            );
            self.port.trigger_pressure_alarm(activated.pressure).await;
        }

        self.store.apply(Capability::Pressure, value).await;
        self.store
            .apply(Capability::AlarmPressure, evaluation.active)
            .await;
    }
}
