use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use tracing::debug;
use tracing::warn;

use super::capability::Capability;
use super::capability::CapabilityValue;
use super::error::Error;
use super::port::PlatformPort;

/// Last-known capability values of one device.
///
/// A value is only cached once the platform accepted it, so the cache never
/// runs ahead of what the platform shows.
pub struct CapabilityStore {
    device_id: String,
    port: Arc<dyn PlatformPort>,
    values: Mutex<HashMap<Capability, CapabilityValue>>,
}

impl CapabilityStore {
    pub fn new(device_id: String, port: Arc<dyn PlatformPort>) -> Self {
        Self {
            device_id,
            port,
            values: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, capability: Capability) -> Option<CapabilityValue> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&capability)
            .cloned()
    }

    pub fn get_bool(&self, capability: Capability) -> Option<bool> {
        self.get(capability).and_then(|v| v.as_bool())
    }

    /// Store a value, publishing it to the platform if it differs from the
    /// cached one.
    ///
    /// Returns whether the value changed.
    pub async fn set(&self, capability: Capability, value: CapabilityValue) -> Result<bool, Error> {
        let value = value.formatted();
        if value.kind() != capability.kind() {
            return Err(Error::InvalidValue { capability, value });
        }

        if self.get(capability).as_ref() == Some(&value) {
            return Ok(false);
        }

        self.port
            .publish_capability(capability, &value)
            .await
            .map_err(|e| Error::Storage {
                capability,
                message: e.to_string(),
            })?;

        debug!("[{}] {} = {}", self.device_id, capability, value);
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(capability, value);
        Ok(true)
    }

    /// Like [`set`](Self::set), but failures are logged instead of returned.
    pub async fn apply(&self, capability: Capability, value: impl Into<CapabilityValue>) -> bool {
        match self.set(capability, value.into()).await {
            Ok(changed) => changed,
            Err(e) => {
                warn!("[{}] {}", self.device_id, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::port::recording::RecordingPort;
    use super::*;

    fn store() -> (CapabilityStore, Arc<RecordingPort>) {
        let port = Arc::new(RecordingPort::new());
        (CapabilityStore::new("test".to_string(), port.clone()), port)
    }

    #[tokio::test]
    async fn test_set_publishes_changes_only() {
        let (store, port) = store();

        assert!(store.set(Capability::HolidayMode, true.into()).await.unwrap());
        assert!(!store.set(Capability::HolidayMode, true.into()).await.unwrap());
        assert!(store.set(Capability::HolidayMode, false.into()).await.unwrap());

        assert_eq!(
            port.published(Capability::HolidayMode),
            vec![CapabilityValue::Boolean(true), CapabilityValue::Boolean(false)]
        );
    }

    #[tokio::test]
    async fn test_numbers_compared_after_rounding() {
        let (store, port) = store();

        assert!(store.set(Capability::IndoorTemperature, 21.26.into()).await.unwrap());
        assert!(!store.set(Capability::IndoorTemperature, 21.34.into()).await.unwrap());

        assert_eq!(store.get(Capability::IndoorTemperature), Some(CapabilityValue::Number(21.3)));
        assert_eq!(port.published(Capability::IndoorTemperature).len(), 1);
    }

    #[tokio::test]
    async fn test_rejects_wrong_kind() {
        let (store, _) = store();
        let err = store.set(Capability::TargetTemperature, true.into()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidValue { .. }));
    }

    #[tokio::test]
    async fn test_failed_publish_is_not_cached() {
        let (store, port) = store();
        port.fail(Capability::Pressure);

        let err = store.set(Capability::Pressure, 1.5.into()).await.unwrap_err();
        assert!(matches!(err, Error::Storage { capability: Capability::Pressure, .. }));
        assert_eq!(store.get(Capability::Pressure), None);

        // apply() swallows the error
        assert!(!store.apply(Capability::Pressure, 1.5).await);
    }
}
