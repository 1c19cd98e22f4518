use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use super::settings::Credentials;

/// General appliance status as reported by the backend.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Status {
    /// "clock" or "manual"
    #[serde(rename = "user mode")]
    pub user_mode: String,

    /// Setpoint of the active clock programme
    #[serde(rename = "temp setpoint")]
    pub temp_setpoint: f64,

    /// Setpoint used in manual mode
    #[serde(rename = "temp manual setpoint")]
    pub temp_manual_setpoint: f64,

    /// What the boiler is doing, e.g. "central heating", "hot water", "off"
    #[serde(rename = "boiler indicator")]
    pub boiler_indicator: String,

    #[serde(rename = "in house temp", default)]
    pub in_house_temp: Option<f64>,

    #[serde(rename = "outdoor temp", default)]
    pub outdoor_temp: Option<f64>,

    #[serde(rename = "fireplace mode", default)]
    pub fireplace_mode: Option<bool>,
}

impl Status {
    pub fn is_manual(&self) -> bool {
        self.user_mode == "manual"
    }

    /// The setpoint that is currently in effect.
    pub fn target_temperature(&self) -> f64 {
        if self.is_manual() {
            self.temp_manual_setpoint
        } else {
            self.temp_setpoint
        }
    }

    pub fn clock_programme(&self) -> bool {
        self.user_mode == "clock"
    }

    /// Fireplace mode, off when the backend leaves it out.
    pub fn fireplace_mode_on(&self) -> bool {
        self.fireplace_mode.unwrap_or(false)
    }

    pub fn central_heating(&self) -> bool {
        self.boiler_indicator == "central heating"
    }
}

/// System pressure reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pressure {
    pub pressure: f64,
    pub unit: String,
}

/// On/off status of holiday mode or the shower timer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchStatus {
    pub value: String,
}

impl SwitchStatus {
    pub fn is_on(&self) -> bool {
        self.value == "on"
    }
}

/// Result envelope returned by every setter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteStatus {
    pub status: String,
}

impl WriteStatus {
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserMode {
    Clock,
    Manual,
}

impl fmt::Display for UserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Clock => write!(f, "clock"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(String),

    /// The response could not be decoded. The backend encrypts responses
    /// with the password, so this usually means the password is wrong.
    #[error("unable to decode backend response: {0}")]
    Decode(String),

    #[error("backend returned HTTP {0}")]
    Status(u16),

    #[error("client connection closed")]
    Closed,
}

impl ClientError {
    pub fn is_decode(&self) -> bool {
        matches!(self, Self::Decode(_))
    }
}

/// Connection to the Nefit Easy backend for a single appliance.
///
/// Snapshots that the backend does not report are returned as `None`.
#[async_trait]
pub trait RemoteClient: Send + Sync + 'static {
    async fn status(&self) -> Result<Status, ClientError>;

    async fn pressure(&self) -> Result<Option<Pressure>, ClientError>;

    async fn holiday_mode(&self) -> Result<Option<SwitchStatus>, ClientError>;

    async fn shower_timer(&self) -> Result<Option<SwitchStatus>, ClientError>;

    async fn set_temperature(&self, value: f64) -> Result<WriteStatus, ClientError>;

    async fn set_user_mode(&self, mode: UserMode) -> Result<WriteStatus, ClientError>;

    async fn set_fireplace_mode(&self, on: bool) -> Result<WriteStatus, ClientError>;

    async fn set_holiday_mode(&self, on: bool) -> Result<WriteStatus, ClientError>;

    async fn set_shower_timer(&self, on: bool) -> Result<WriteStatus, ClientError>;

    async fn set_shower_time(&self, minutes: u32) -> Result<WriteStatus, ClientError>;

    /// Release the connection. Further calls fail with [`ClientError::Closed`].
    async fn end(&self);
}

/// Builds connected clients from credentials.
#[async_trait]
pub trait ClientFactory: Send + Sync + 'static {
    type Client: RemoteClient;

    async fn connect(&self, credentials: &Credentials) -> Result<Self::Client, ClientError>;
}

/// The active client of a device. Replaced atomically when credentials change.
pub struct ClientSlot<C> {
    current: ArcSwapOption<C>,
}

impl<C> ClientSlot<C> {
    pub fn empty() -> Self {
        Self {
            current: ArcSwapOption::empty(),
        }
    }

    pub fn get(&self) -> Option<Arc<C>> {
        self.current.load_full()
    }

    /// Install a new client, returning the previous one so it can be ended.
    pub fn replace(&self, client: C) -> Option<Arc<C>> {
        self.current.swap(Some(Arc::new(client)))
    }

    pub fn take(&self) -> Option<Arc<C>> {
        self.current.swap(None)
    }
}

#[cfg(test)]
pub mod mock {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    use super::*;

    #[derive(Debug)]
    pub struct MockState {
        pub status: Result<Status, ClientError>,
        pub pressure: Option<Pressure>,
        pub holiday_mode: Option<SwitchStatus>,
        pub shower_timer: Option<SwitchStatus>,
        pub write_status: WriteStatus,
        pub fetch_delay: Option<Duration>,
        pub calls: Vec<String>,
        pub ended: bool,
    }

    impl Default for MockState {
        fn default() -> Self {
            Self {
                status: Ok(Status {
                    user_mode: "clock".to_string(),
                    temp_setpoint: 20.0,
                    temp_manual_setpoint: 19.0,
                    boiler_indicator: "central heating".to_string(),
                    in_house_temp: Some(19.84),
                    outdoor_temp: Some(7.3),
                    fireplace_mode: Some(false),
                }),
                pressure: Some(Pressure {
                    pressure: 1.8,
                    unit: "bar".to_string(),
                }),
                holiday_mode: Some(SwitchStatus {
                    value: "off".to_string(),
                }),
                shower_timer: Some(SwitchStatus {
                    value: "off".to_string(),
                }),
                write_status: WriteStatus::ok(),
                fetch_delay: None,
                calls: Vec::new(),
                ended: false,
            }
        }
    }

    /// Mock client for testing. Clones share state, so a test can keep a
    /// handle after the device took ownership of a clone.
    #[derive(Debug, Clone, Default)]
    pub struct MockRemoteClient {
        state: Arc<Mutex<MockState>>,
    }

    impl MockRemoteClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
            f(&mut self.state.lock().unwrap())
        }

        pub fn calls(&self) -> Vec<String> {
            self.with(|s| s.calls.clone())
        }

        pub fn count(&self, prefix: &str) -> usize {
            self.calls().iter().filter(|c| c.starts_with(prefix)).count()
        }

        pub fn ended(&self) -> bool {
            self.with(|s| s.ended)
        }

        fn record(&self, call: String) -> Result<(), ClientError> {
            self.with(|s| {
                s.calls.push(call);
                if s.ended {
                    Err(ClientError::Closed)
                } else {
                    Ok(())
                }
            })
        }

        async fn fetch<T>(
            &self,
            call: &str,
            f: impl FnOnce(&MockState) -> Result<T, ClientError>,
        ) -> Result<T, ClientError> {
            self.record(call.to_string())?;
            if let Some(delay) = self.with(|s| s.fetch_delay) {
                tokio::time::sleep(delay).await;
            }
            self.with(|s| f(&*s))
        }

        fn write(&self, call: String) -> Result<WriteStatus, ClientError> {
            self.record(call)?;
            Ok(self.with(|s| s.write_status.clone()))
        }
    }

    #[async_trait]
    impl RemoteClient for MockRemoteClient {
        async fn status(&self) -> Result<Status, ClientError> {
            self.fetch("status", |s| s.status.clone()).await
        }

        async fn pressure(&self) -> Result<Option<Pressure>, ClientError> {
            self.fetch("pressure", |s| Ok(s.pressure.clone())).await
        }

        async fn holiday_mode(&self) -> Result<Option<SwitchStatus>, ClientError> {
            self.fetch("holiday_mode", |s| Ok(s.holiday_mode.clone())).await
        }

        async fn shower_timer(&self) -> Result<Option<SwitchStatus>, ClientError> {
            self.fetch("shower_timer", |s| Ok(s.shower_timer.clone())).await
        }

        async fn set_temperature(&self, value: f64) -> Result<WriteStatus, ClientError> {
            self.write(format!("set_temperature({})", value))
        }

        async fn set_user_mode(&self, mode: UserMode) -> Result<WriteStatus, ClientError> {
            self.write(format!("set_user_mode({})", mode))
        }

        async fn set_fireplace_mode(&self, on: bool) -> Result<WriteStatus, ClientError> {
            self.write(format!("set_fireplace_mode({})", on))
        }

        async fn set_holiday_mode(&self, on: bool) -> Result<WriteStatus, ClientError> {
            self.write(format!("set_holiday_mode({})", on))
        }

        async fn set_shower_timer(&self, on: bool) -> Result<WriteStatus, ClientError> {
            self.write(format!("set_shower_timer({})", on))
        }

        async fn set_shower_time(&self, minutes: u32) -> Result<WriteStatus, ClientError> {
            self.write(format!("set_shower_time({})", minutes))
        }

        async fn end(&self) {
            self.with(|s| s.ended = true);
        }
    }

    /// Factory handing out queued clients (or errors), then `default`.
    #[derive(Debug, Default)]
    pub struct MockClientFactory {
        pub default: MockRemoteClient,
        pub queue: Mutex<VecDeque<Result<MockRemoteClient, ClientError>>>,
        pub connects: Mutex<Vec<String>>,
    }

    impl MockClientFactory {
        pub fn new(default: MockRemoteClient) -> Self {
            Self {
                default,
                ..Default::default()
            }
        }

        pub fn push(&self, next: Result<MockRemoteClient, ClientError>) {
            self.queue.lock().unwrap().push_back(next);
        }

        pub fn connect_count(&self) -> usize {
            self.connects.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ClientFactory for MockClientFactory {
        type Client = MockRemoteClient;

        async fn connect(&self, credentials: &Credentials) -> Result<MockRemoteClient, ClientError> {
            self.connects
                .lock()
                .unwrap()
                .push(credentials.serial_number.clone());
            match self.queue.lock().unwrap().pop_front() {
                Some(next) => next,
                None => Ok(self.default.clone()),
            }
        }
    }
}
