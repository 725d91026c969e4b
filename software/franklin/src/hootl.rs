//! Hardware-out-of-the-loop stand-ins for the IMU and the stepper drivers.
//!
//! These let the full control stack run with no hardware attached: a
//! scripted or simulated IMU feeds the control context, and a recording
//! step driver captures what the actuation context would have done to the
//! GPIO pins.

use std::sync::{Arc, Mutex};

use crate::imu::{ImuReader, RawImuSample};
use crate::motor::{Motor, StepDriver};

/// IMU stand-in that replays a canned sample sequence, holding the final
/// sample once the script runs out.
pub struct ScriptedImu {
    samples: Vec<RawImuSample>,
    index: usize,
}

impl ScriptedImu {
    pub fn new(samples: Vec<RawImuSample>) -> Self {
        Self { samples, index: 0 }
    }
}

impl ImuReader for ScriptedImu {
    fn read_sample(&mut self) -> Result<RawImuSample, String> {
        let sample = self
            .samples
            .get(self.index)
            .or_else(|| self.samples.last())
            .copied()
            .ok_or_else(|| "Scripted IMU has no samples".to_string())?;
        self.index += 1;
        Ok(sample)
    }
}

/// IMU stand-in that rocks the robot sinusoidally about its pitch axis,
/// generating geometrically consistent accelerometer and gyro readings.
pub struct RockingImu {
    amplitude_deg: f64,
    period_s: f64,
    dt_s: f64,
    t_s: f64,
}

impl RockingImu {
    pub fn new(amplitude_deg: f64, period_s: f64, dt_s: f64) -> Self {
        Self {
            amplitude_deg,
            period_s,
            dt_s,
            t_s: 0.0,
        }
    }
}

impl ImuReader for RockingImu {
    fn read_sample(&mut self) -> Result<RawImuSample, String> {
        let omega_rad_s = 2.0 * std::f64::consts::PI / self.period_s;
        let theta_deg = self.amplitude_deg * (omega_rad_s * self.t_s).sin();
        let theta_rate_dps = self.amplitude_deg * omega_rad_s * (omega_rad_s * self.t_s).cos();
        self.t_s += self.dt_s;

        Ok(RawImuSample {
            accel_x: theta_deg.to_radians().sin(),
            accel_y: 0.0,
            accel_z: theta_deg.to_radians().cos(),
            omega_x: 0.0,
            omega_y: theta_rate_dps,
            omega_z: 0.0,
        })
    }
}

/// One recorded step pulse with the direction level latched at pulse time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepEvent {
    pub motor: Motor,
    pub forward: bool,
}

/// Captured GPIO activity from a [`RecordingStepDriver`].
#[derive(Debug, Default)]
pub struct DriveLog {
    /// Step pulses in emission order
    pub events: Vec<StepEvent>,
    /// Most recent direction level per motor
    pub direction: [bool; 2],
}

/// Step driver that records pulses instead of toggling pins.
///
/// The log handle stays with the caller while the driver itself moves into
/// the actuation thread.
pub struct RecordingStepDriver {
    log: Arc<Mutex<DriveLog>>,
}

impl RecordingStepDriver {
    /// Build a driver and the shared handle to its log.
    pub fn new() -> (Self, Arc<Mutex<DriveLog>>) {
        let log = Arc::new(Mutex::new(DriveLog::default()));
        (Self { log: Arc::clone(&log) }, log)
    }
}

impl StepDriver for RecordingStepDriver {
    fn set_direction(&mut self, motor: Motor, forward: bool) {
        if let Ok(mut log) = self.log.lock() {
            log.direction[motor_index(motor)] = forward;
        }
    }

    fn step(&mut self, motor: Motor) {
        if let Ok(mut log) = self.log.lock() {
            let forward = log.direction[motor_index(motor)];
            log.events.push(StepEvent { motor, forward });
        }
    }
}

fn motor_index(motor: Motor) -> usize {
    match motor {
        Motor::One => 0,
        Motor::Two => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_imu_holds_its_final_sample() {
        let mut imu = ScriptedImu::new(vec![
            RawImuSample {
                accel_x: 0.1,
                ..Default::default()
            },
            RawImuSample {
                accel_x: 0.2,
                ..Default::default()
            },
        ]);

        assert_eq!(imu.read_sample().unwrap().accel_x, 0.1);
        assert_eq!(imu.read_sample().unwrap().accel_x, 0.2);
        assert_eq!(imu.read_sample().unwrap().accel_x, 0.2);
    }

    #[test]
    fn empty_script_is_an_error() {
        let mut imu = ScriptedImu::new(Vec::new());
        assert!(imu.read_sample().is_err());
    }

    #[test]
    fn rocking_imu_is_geometrically_consistent() {
        let mut imu = RockingImu::new(5.0, 1.0, 0.01);
        for _ in 0..100 {
            let sample = imu.read_sample().unwrap();
            let norm = (sample.accel_x.powi(2) + sample.accel_z.powi(2)).sqrt();
            assert!((norm - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn recording_driver_latches_direction_per_motor() {
        let (mut driver, log) = RecordingStepDriver::new();

        driver.set_direction(Motor::One, true);
        driver.set_direction(Motor::Two, false);
        driver.step(Motor::One);
        driver.step(Motor::Two);

        let log = log.lock().unwrap();
        assert_eq!(
            log.events,
            vec![
                StepEvent {
                    motor: Motor::One,
                    forward: true
                },
                StepEvent {
                    motor: Motor::Two,
                    forward: false
                },
            ]
        );
    }
}
