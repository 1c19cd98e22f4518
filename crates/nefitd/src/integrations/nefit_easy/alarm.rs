//! Pressure alarm edge detection.
//!
//! The alarm is active whenever the system pressure is outside the
//! configured thresholds. An activation is reported only on the
//! inactive -> active edge; a pressure that stays out of range keeps the
//! alarm active without reporting it again until it has cleared first.

/// Per-device pressure limits, in bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureThresholds {
    pub low: f64,
    pub high: f64,
}

/// The alarm has just become active at this pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmActivated {
    pub pressure: f64,
}

/// Result of [`evaluate`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AlarmEvaluation {
    /// New alarm state to store
    pub active: bool,

    /// Set only when the alarm went from inactive to active
    pub activated: Option<AlarmActivated>,
}

/// Compute the new alarm state from a pressure reading and the previously
/// stored alarm state.
pub fn evaluate(
    pressure: f64,
    thresholds: &PressureThresholds,
    previously_active: bool,
) -> AlarmEvaluation {
    let active = pressure < thresholds.low || pressure > thresholds.high;
    let activated = (active && !previously_active).then_some(AlarmActivated { pressure });
    AlarmEvaluation { active, activated }
}
