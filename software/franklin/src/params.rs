//! Canonical tunable parameter state.
//!
//! The [`ParameterStore`] is the single writer of gains and targets. It is
//! owned outright by the control context; every other context sees read-only
//! snapshots that lag by at most one control cycle. Mutation happens only by
//! applying queued [`ConfigUpdate`]s, and each cycle applies its whole
//! backlog before taking the snapshot used for that cycle's regulation.

use serde::{Deserialize, Serialize};

use franklin_shared::UpdateTarget;

/// Bias subtracted from raw gyro-offset wire values. Keeps the on-wire byte
/// positive for unsigned client sliders while allowing negative offsets.
const GYRO_OFFSET_BIAS: f64 = 128.0;

/// Divisor applied to biased gyro-offset wire values to get degrees.
const GYRO_OFFSET_SCALE: f64 = 10.0;

/// PID gains as signed scaled integers, exactly as carried on the wire.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PidGains {
    pub proportional: i16,
    pub integral: i16,
    pub derivative: i16,
}

/// Drive targets, enable flag, and calibration offset.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq)]
pub struct ControlTargets {
    /// Pitch setpoint for the balance regulator [deg]
    pub angular_velocity_target: i16,
    /// Open-loop translation drive, in wire units
    pub linear_velocity_target: i16,
    /// Motors dispatch zero output while false; the regulator keeps
    /// running underneath
    pub motors_enabled: bool,
    /// Calibration angle [deg]
    pub gyro_offset: f64,
}

/// One queued parameter mutation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub target: UpdateTarget,
    pub value: i16,
}

/// Canonical copy of the tunable state.
#[derive(Debug, Default)]
pub struct ParameterStore {
    gains: PidGains,
    targets: ControlTargets,
}

impl ParameterStore {
    /// Fresh store: zero gains, zero targets, motors disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one queued update, mutating exactly one field. Unknown targets
    /// are rejected with no state change.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<(), String> {
        match update.target {
            UpdateTarget::PidProportional => self.gains.proportional = update.value,
            UpdateTarget::PidIntegral => self.gains.integral = update.value,
            UpdateTarget::PidDerivative => self.gains.derivative = update.value,
            UpdateTarget::LinearVelocityTarget => {
                self.targets.linear_velocity_target = update.value
            }
            UpdateTarget::AngularVelocityTarget => {
                self.targets.angular_velocity_target = update.value
            }
            UpdateTarget::MotorsEnabled => self.targets.motors_enabled = update.value == 1,
            UpdateTarget::GyroOffset => {
                self.targets.gyro_offset =
                    (f64::from(update.value) - GYRO_OFFSET_BIAS) / GYRO_OFFSET_SCALE
            }
            UpdateTarget::Unknown(other) => {
                return Err(format!("Unrecognized update target {other}"));
            }
        }

        Ok(())
    }

    /// Point-in-time copy of the full tunable state for this cycle.
    pub fn snapshot(&self) -> (PidGains, ControlTargets) {
        (self.gains, self.targets)
    }
}
