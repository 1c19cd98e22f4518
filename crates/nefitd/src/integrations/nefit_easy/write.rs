use std::sync::Arc;

use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::capability::Capability;
use super::capability::CapabilityValue;
use super::capability::format_value;
use super::client::ClientSlot;
use super::client::RemoteClient;
use super::client::UserMode;
use super::client::WriteStatus;
use super::debounce::DEBOUNCE_WINDOW;
use super::debounce::Debouncer;
use super::error::Error;
use super::error::Result;
use super::store::CapabilityStore;

/// What happened to a capability write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The backend accepted the write
    Applied,

    /// The backend already had the requested value; nothing was written
    Unchanged,

    /// The backend answered with a status other than "ok"; local state is
    /// left as it was
    Rejected(String),
}

impl WriteOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Rejected(_))
    }
}

pub type WriteResult = Result<WriteOutcome>;

/// Handles capability change requests from the platform.
///
/// Requests are debounced per capability. Before writing, the current
/// backend value is read back and the write is skipped if it already
/// matches.
pub struct CapabilityWriteController<C> {
    device_id: String,
    client: Arc<ClientSlot<C>>,
    store: Arc<CapabilityStore>,
    debouncer: Debouncer<WriteResult>,
}

impl<C: RemoteClient> CapabilityWriteController<C> {
    pub fn new(device_id: String, client: Arc<ClientSlot<C>>, store: Arc<CapabilityStore>) -> Self {
        Self {
            device_id,
            client,
            store,
            debouncer: Debouncer::new(DEBOUNCE_WINDOW),
        }
    }

    /// Request a new value for a writable capability.
    ///
    /// Resolves once the debounced write for this capability has executed.
    /// Requests coalesced into the same write all receive its result.
    pub async fn request(self: &Arc<Self>, capability: Capability, value: CapabilityValue) -> WriteResult {
        if !capability.is_writable() {
            return Err(Error::NotWritable(capability));
        }
        let value = value.formatted();
        if value.kind() != capability.kind() {
            return Err(Error::InvalidValue { capability, value });
        }

        let (rx, opened) = self.debouncer.submit(capability, value);
        if opened {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                if let Some(settled) = this.debouncer.settle(capability).await {
                    if settled.coalesced() > 1 {
                        debug!(
                            "[{}] Coalesced {} requests for {}",
                            this.device_id,
                            settled.coalesced(),
                            capability
                        );
                    }
                    let result = this.execute(capability, settled.value.clone()).await;
                    settled.resolve(result);
                }
            });
        }

        rx.await.unwrap_or(Err(Error::Removed))
    }

    pub async fn set_target_temperature(self: &Arc<Self>, value: f64) -> WriteResult {
        self.request(Capability::TargetTemperature, value.into()).await
    }

    pub async fn set_clock_programme(self: &Arc<Self>, on: bool) -> WriteResult {
        self.request(Capability::ClockProgramme, on.into()).await
    }

    pub async fn set_fireplace_mode(self: &Arc<Self>, on: bool) -> WriteResult {
        self.request(Capability::FireplaceMode, on.into()).await
    }

    pub async fn set_holiday_mode(self: &Arc<Self>, on: bool) -> WriteResult {
        self.request(Capability::HolidayMode, on.into()).await
    }

    pub async fn set_shower_timer(self: &Arc<Self>, on: bool) -> WriteResult {
        self.request(Capability::ShowerTimer, on.into()).await
    }

    pub async fn set_shower_time(self: &Arc<Self>, minutes: u32) -> WriteResult {
        self.request(Capability::ShowerTime, f64::from(minutes).into())
            .await
    }

    async fn execute(&self, capability: Capability, value: CapabilityValue) -> WriteResult {
        let invalid = || Error::InvalidValue {
            capability,
            value: value.clone(),
        };

        match capability {
            Capability::TargetTemperature => {
                let temp = value.as_number().ok_or_else(invalid)?;
                self.write_target_temperature(temp).await
            }
            Capability::ClockProgramme => {
                let on = value.as_bool().ok_or_else(invalid)?;
                self.write_clock_programme(on).await
            }
            Capability::FireplaceMode => {
                let on = value.as_bool().ok_or_else(invalid)?;
                self.write_fireplace_mode(on).await
            }
            Capability::HolidayMode => {
                let on = value.as_bool().ok_or_else(invalid)?;
                self.write_holiday_mode(on).await
            }
            Capability::ShowerTimer => {
                let on = value.as_bool().ok_or_else(invalid)?;
                self.write_shower_timer(on).await
            }
            Capability::ShowerTime => {
                let minutes = value
                    .as_number()
                    .filter(|m| *m >= 0.0 && *m <= f64::from(u32::MAX))
                    .ok_or_else(invalid)?;
                self.write_shower_time(minutes.round() as u32).await
            }
            other => Err(Error::NotWritable(other)),
        }
    }

    fn client(&self) -> Result<Arc<C>> {
        self.client.get().ok_or(Error::NotConnected)
    }

    async fn write_target_temperature(&self, value: f64) -> WriteResult {
        info!("[{}] Setting target temperature to {}", self.device_id, value);
        let client = self.client()?;

        let status = client.status().await?;
        let current = format_value(status.target_temperature());
        if current == value {
            return self.unchanged(Capability::TargetTemperature, value.into()).await;
        }

        let result = client.set_temperature(value).await?;
        self.confirm(Capability::TargetTemperature, value.into(), result)
            .await
    }

    async fn write_clock_programme(&self, on: bool) -> WriteResult {
        let mode = if on { UserMode::Clock } else { UserMode::Manual };
        info!("[{}] Setting programme mode to {}", self.device_id, mode);
        let client = self.client()?;

        let status = client.status().await?;
        if status.clock_programme() == on {
            return self.unchanged(Capability::ClockProgramme, on.into()).await;
        }

        let result = client.set_user_mode(mode).await?;
        self.confirm(Capability::ClockProgramme, on.into(), result)
            .await
    }

    async fn write_fireplace_mode(&self, on: bool) -> WriteResult {
        info!("[{}] Setting fireplace mode to {}", self.device_id, on_off(on));
        let client = self.client()?;

        let status = client.status().await?;
        if status.fireplace_mode_on() == on {
            return self.unchanged(Capability::FireplaceMode, on.into()).await;
        }

        let result = client.set_fireplace_mode(on).await?;
        self.confirm(Capability::FireplaceMode, on.into(), result)
            .await
    }

    async fn write_holiday_mode(&self, on: bool) -> WriteResult {
        info!("[{}] Setting holiday mode to {}", self.device_id, on_off(on));
        let client = self.client()?;

        let current = client.holiday_mode().await?;
        if current.is_some_and(|s| s.is_on() == on) {
            return self.unchanged(Capability::HolidayMode, on.into()).await;
        }

        let result = client.set_holiday_mode(on).await?;
        self.confirm(Capability::HolidayMode, on.into(), result)
            .await
    }

    async fn write_shower_timer(&self, on: bool) -> WriteResult {
        info!("[{}] Setting shower timer to {}", self.device_id, on_off(on));
        let client = self.client()?;

        let current = client.shower_timer().await?;
        if current.is_some_and(|s| s.is_on() == on) {
            return self.unchanged(Capability::ShowerTimer, on.into()).await;
        }

        let result = client.set_shower_timer(on).await?;
        self.confirm(Capability::ShowerTimer, on.into(), result)
            .await
    }

    /// Write-only: the backend offers no read-back for the duration.
    async fn write_shower_time(&self, minutes: u32) -> WriteResult {
        info!("[{}] Setting shower time to {} minutes", self.device_id, minutes);
        let client = self.client()?;

        let result = client.set_shower_time(minutes).await?;
        self.confirm(Capability::ShowerTime, f64::from(minutes).into(), result)
            .await
    }

    /// The backend already has `value`; bring the local capability in line.
    async fn unchanged(&self, capability: Capability, value: CapabilityValue) -> WriteResult {
        debug!(
            "[{}] (value matches current, not updating {})",
            self.device_id, capability
        );
        self.store.apply(capability, value).await;
        Ok(WriteOutcome::Unchanged)
    }

    async fn confirm(
        &self,
        capability: Capability,
        value: CapabilityValue,
        result: WriteStatus,
    ) -> WriteResult {
        info!("[{}] ...status: {}", self.device_id, result.status);
        if result.is_ok() {
            self.store.apply(capability, value).await;
            Ok(WriteOutcome::Applied)
        } else {
            warn!(
                "[{}] Backend did not apply {} (status: {})",
                self.device_id, capability, result.status
            );
            Ok(WriteOutcome::Rejected(result.status))
        }
    }
}

fn on_off(on: bool) -> &'static str {
    if on { "on" } else { "off" }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::super::client::ClientError;
    use super::super::client::SwitchStatus;
    use super::super::client::mock::MockRemoteClient;
    use super::super::port::recording::RecordingPort;
    use super::*;

    struct Fixture {
        client: MockRemoteClient,
        store: Arc<CapabilityStore>,
        controller: Arc<CapabilityWriteController<MockRemoteClient>>,
    }

    fn fixture() -> Fixture {
        let client = MockRemoteClient::new();
        let slot = Arc::new(ClientSlot::empty());
        slot.replace(client.clone());
        let port = Arc::new(RecordingPort::new());
        let store = Arc::new(CapabilityStore::new("test".to_string(), port));
        let controller = Arc::new(CapabilityWriteController::new(
            "test".to_string(),
            slot,
            store.clone(),
        ));
        Fixture {
            client,
            store,
            controller,
        }
    }

    fn manual_mode(client: &MockRemoteClient, setpoint: f64) {
        client.with(|s| {
            if let Ok(status) = s.status.as_mut() {
                status.user_mode = "manual".to_string();
                status.temp_manual_setpoint = setpoint;
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_matching_target_temperature_skips_write() {
        let f = fixture();
        manual_mode(&f.client, 20.5);

        let outcome = f.controller.set_target_temperature(20.5).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert!(outcome.is_success());
        assert_eq!(f.client.count("set_temperature"), 0);
        assert_eq!(f.client.count("status"), 1);
        assert_eq!(
            f.store.get(Capability::TargetTemperature),
            Some(CapabilityValue::Number(20.5))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_comparison_uses_rounded_values() {
        let f = fixture();
        manual_mode(&f.client, 20.54);

        let outcome = f.controller.set_target_temperature(20.46).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(f.client.count("set_temperature"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_target_temperature_written_when_different() {
        let f = fixture();

        let outcome = f.controller.set_target_temperature(21.0).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(f.client.calls(), vec!["status", "set_temperature(21)"]);
        assert_eq!(
            f.store.get(Capability::TargetTemperature),
            Some(CapabilityValue::Number(21.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_requests_coalesce_to_last_value() {
        let f = fixture();

        let c = &f.controller;
        let (r1, r2, r3) = tokio::join!(
            c.set_target_temperature(19.0),
            async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                c.set_target_temperature(19.5).await
            },
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                c.set_target_temperature(22.0).await
            },
        );

        assert_eq!(f.client.count("set_temperature"), 1);
        assert_eq!(f.client.count("set_temperature(22)"), 1);
        assert_eq!(f.client.count("status"), 1);
        for r in [r1, r2, r3] {
            assert_eq!(r.unwrap(), WriteOutcome::Applied);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_capabilities_are_independent() {
        let f = fixture();

        let c = &f.controller;
        let (a, b) = tokio::join!(c.set_holiday_mode(true), c.set_shower_timer(true));

        assert_eq!(a.unwrap(), WriteOutcome::Applied);
        assert_eq!(b.unwrap(), WriteOutcome::Applied);
        assert_eq!(f.client.count("set_holiday_mode(true)"), 1);
        assert_eq!(f.client.count("set_shower_timer(true)"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_write_leaves_capability_unchanged() {
        let f = fixture();
        f.store.apply(Capability::ClockProgramme, true).await;
        f.client.with(|s| {
            s.write_status = WriteStatus {
                status: "error".to_string(),
            }
        });

        let outcome = f.controller.set_clock_programme(false).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Rejected("error".to_string()));
        assert!(!outcome.is_success());
        assert_eq!(f.client.count("set_user_mode(manual)"), 1);
        assert_eq!(f.store.get_bool(Capability::ClockProgramme), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_holiday_mode_reads_its_own_domain() {
        let f = fixture();
        f.client.with(|s| {
            s.holiday_mode = Some(SwitchStatus {
                value: "on".to_string(),
            })
        });

        let outcome = f.controller.set_holiday_mode(true).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(f.client.calls(), vec!["holiday_mode"]);
        assert_eq!(f.store.get_bool(Capability::HolidayMode), Some(true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fireplace_mode_matching_is_reconciled() {
        let f = fixture();

        let outcome = f.controller.set_fireplace_mode(false).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(f.store.get_bool(Capability::FireplaceMode), Some(false));
        assert_eq!(f.client.count("set_fireplace_mode"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fireplace_mode_reads_as_off() {
        let f = fixture();
        f.client.with(|s| {
            if let Ok(status) = s.status.as_mut() {
                status.fireplace_mode = None;
            }
        });

        let outcome = f.controller.set_fireplace_mode(false).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Unchanged);
        assert_eq!(f.client.count("set_fireplace_mode"), 0);

        let outcome = f.controller.set_fireplace_mode(true).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(f.client.count("set_fireplace_mode"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shower_time_is_write_only() {
        let f = fixture();

        let outcome = f.controller.set_shower_time(15).await.unwrap();

        assert_eq!(outcome, WriteOutcome::Applied);
        assert_eq!(f.client.calls(), vec!["set_shower_time(15)"]);
        assert_eq!(
            f.store.get(Capability::ShowerTime),
            Some(CapabilityValue::Number(15.0))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_read_failure_propagates() {
        let f = fixture();
        f.client
            .with(|s| s.status = Err(ClientError::Transport("refused".to_string())));

        let err = f.controller.set_target_temperature(21.0).await.unwrap_err();

        assert!(matches!(err, Error::Client(ClientError::Transport(_))));
        assert_eq!(f.client.count("set_temperature"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejects_read_only_and_mistyped_requests() {
        let f = fixture();

        let err = f
            .controller
            .request(Capability::Pressure, 1.5.into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotWritable(Capability::Pressure)));

        let err = f
            .controller
            .request(Capability::HolidayMode, 1.0.into())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
        assert!(f.client.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_client_reports_not_connected() {
        let port = Arc::new(RecordingPort::new());
        let store = Arc::new(CapabilityStore::new("test".to_string(), port));
        let controller: Arc<CapabilityWriteController<MockRemoteClient>> = Arc::new(
            CapabilityWriteController::new("test".to_string(), Arc::new(ClientSlot::empty()), store),
        );

        let err = controller.set_holiday_mode(true).await.unwrap_err();
        assert!(matches!(err, Error::NotConnected));
    }
}
