use super::capability::Capability;
use super::capability::CapabilityValue;
use super::client::ClientError;

pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by a Nefit Easy device.
///
/// `Clone` so that every caller coalesced into one debounced write receives
/// the same outcome.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The initial client could not be constructed or connected.
    #[error("unable to connect to backend: {0}")]
    Connection(#[source] ClientError),

    /// A reconciliation fetch failed.
    #[error("sync failed: {0}")]
    Sync(#[source] ClientError),

    /// The backend response could not be decoded with the supplied credentials.
    #[error("invalid credentials (check serial number, access key and password)")]
    Credentials,

    #[error(transparent)]
    Client(#[from] ClientError),

    /// Writing a capability value to the platform failed.
    #[error("unable to set capability '{capability}': {message}")]
    Storage {
        capability: Capability,
        message: String,
    },

    #[error("device is not connected")]
    NotConnected,

    #[error("capability '{0}' is not writable")]
    NotWritable(Capability),

    #[error("invalid value for capability '{capability}': {value}")]
    InvalidValue {
        capability: Capability,
        value: CapabilityValue,
    },

    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    #[error("unable to persist settings: {0}")]
    Persist(String),

    /// The device was paired with an incompatible version and only accepts
    /// new credentials.
    #[error("device must be paired again")]
    RepairRequired,

    #[error("device has been removed")]
    Removed,

    #[error("unknown device '{0}'")]
    UnknownDevice(String),

    #[error("device '{0}' is already registered")]
    Duplicate(String),
}
