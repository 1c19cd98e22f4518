use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use serde::Serialize;
use tracing::info;

use super::port::PlatformPort;

pub const REASON_FORCE_REPAIR: &str = "device was paired with an incompatible version, please re-pair";
pub const REASON_REMOVED: &str = "device removed";

/// Reachability of a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum AvailabilityState {
    Connecting,
    Available,
    Unavailable(String),
}

impl AvailabilityState {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }
}

struct Inner {
    state: AvailabilityState,
    halted: bool,
}

/// Owns the availability of one device and reports every transition to the
/// platform. Once halted (device removed) it ignores further transitions.
pub struct AvailabilityStateMachine {
    device_id: String,
    port: Arc<dyn PlatformPort>,
    inner: Mutex<Inner>,
}

impl AvailabilityStateMachine {
    pub fn new(device_id: String, port: Arc<dyn PlatformPort>) -> Self {
        Self {
            device_id,
            port,
            inner: Mutex::new(Inner {
                state: AvailabilityState::Connecting,
                halted: false,
            }),
        }
    }

    pub fn current(&self) -> AvailabilityState {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .state
            .clone()
    }

    pub fn is_halted(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .halted
    }

    /// Report the initial connecting state (always published).
    pub async fn connecting(&self) {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.halted {
                return;
            }
            inner.state = AvailabilityState::Connecting;
        }
        self.port
            .publish_availability(&AvailabilityState::Connecting)
            .await;
    }

    pub async fn available(&self) -> bool {
        self.transition(AvailabilityState::Available).await
    }

    pub async fn unavailable(&self, reason: impl Into<String>) -> bool {
        self.transition(AvailabilityState::Unavailable(reason.into()))
            .await
    }

    /// Force the device unavailable and stop accepting transitions.
    pub async fn halt(&self) {
        let state = AvailabilityState::Unavailable(REASON_REMOVED.to_string());
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.halted {
                return;
            }
            inner.halted = true;
            inner.state = state.clone();
        }
        info!("[{}] Availability halted", self.device_id);
        self.port.publish_availability(&state).await;
    }

    /// Returns whether the state changed.
    async fn transition(&self, next: AvailabilityState) -> bool {
        {
            let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            if inner.halted || inner.state == next {
                return false;
            }
            inner.state = next.clone();
        }

        match &next {
            AvailabilityState::Unavailable(reason) => {
                info!("[{}] Device unavailable: {}", self.device_id, reason)
            }
            state => info!("[{}] Device {:?}", self.device_id, state),
        }
        self.port.publish_availability(&next).await;
        true
    }
}
