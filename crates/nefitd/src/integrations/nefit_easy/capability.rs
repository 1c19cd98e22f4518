use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Capabilities exposed for a Nefit Easy thermostat.
///
/// The serialized form is the capability identifier used by the platform
/// (e.g. "target_temperature").
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
pub enum Capability {
    #[serde(rename = "measure_temperature")]
    #[strum(serialize = "measure_temperature")]
    IndoorTemperature,

    #[serde(rename = "measure_temperature.outdoor")]
    #[strum(serialize = "measure_temperature.outdoor")]
    OutdoorTemperature,

    #[serde(rename = "target_temperature")]
    #[strum(serialize = "target_temperature")]
    TargetTemperature,

    #[serde(rename = "system_pressure")]
    #[strum(serialize = "system_pressure")]
    Pressure,

    #[serde(rename = "clock_programme")]
    #[strum(serialize = "clock_programme")]
    ClockProgramme,

    #[serde(rename = "operating_mode")]
    #[strum(serialize = "operating_mode")]
    OperatingMode,

    #[serde(rename = "central_heating")]
    #[strum(serialize = "central_heating")]
    CentralHeating,

    #[serde(rename = "alarm_pressure")]
    #[strum(serialize = "alarm_pressure")]
    AlarmPressure,

    #[serde(rename = "fireplace_mode")]
    #[strum(serialize = "fireplace_mode")]
    FireplaceMode,

    #[serde(rename = "holiday_mode")]
    #[strum(serialize = "holiday_mode")]
    HolidayMode,

    #[serde(rename = "shower_timer")]
    #[strum(serialize = "shower_timer")]
    ShowerTimer,

    #[serde(rename = "shower_time")]
    #[strum(serialize = "shower_time")]
    ShowerTime,
}

/// The type of value a capability carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Boolean,
    Number,
    Enum,
}

impl Capability {
    pub fn kind(self) -> ValueKind {
        match self {
            Self::IndoorTemperature
            | Self::OutdoorTemperature
            | Self::TargetTemperature
            | Self::Pressure
            | Self::ShowerTime => ValueKind::Number,
            Self::OperatingMode => ValueKind::Enum,
            Self::ClockProgramme
            | Self::CentralHeating
            | Self::AlarmPressure
            | Self::FireplaceMode
            | Self::HolidayMode
            | Self::ShowerTimer => ValueKind::Boolean,
        }
    }

    /// Whether the platform may request changes to this capability.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            Self::TargetTemperature
                | Self::ClockProgramme
                | Self::FireplaceMode
                | Self::HolidayMode
                | Self::ShowerTimer
                | Self::ShowerTime
        )
    }
}

/// A capability value: boolean, number or enumerated string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CapabilityValue {
    Boolean(bool),
    Number(f64),
    Enum(String),
}

impl CapabilityValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Boolean(_) => ValueKind::Boolean,
            Self::Number(_) => ValueKind::Number,
            Self::Enum(_) => ValueKind::Enum,
        }
    }

    /// Numbers rounded to one decimal place; other values as-is.
    ///
    /// Every value is formatted before it is compared or stored.
    pub fn formatted(self) -> Self {
        match self {
            Self::Number(n) => Self::Number(format_value(n)),
            other => other,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }
}

impl fmt::Display for CapabilityValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Number(n) => write!(f, "{}", n),
            Self::Enum(s) => write!(f, "{}", s),
        }
    }
}

impl From<bool> for CapabilityValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

impl From<f64> for CapabilityValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<String> for CapabilityValue {
    fn from(value: String) -> Self {
        Self::Enum(value)
    }
}

/// Round to one decimal place (21.26 -> 21.3, 21.24 -> 21.2).
pub fn format_value(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
