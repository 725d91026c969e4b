//! Pitch estimation blending accelerometer geometry with gyro-rate prediction.

use serde::{Deserialize, Serialize};

use crate::imu::RawImuSample;

/// Weight on the kinematic prediction in the complementary blend.
/// Fixed at build time; tuning it requires re-deriving the PID gains.
pub const BLEND_WEIGHT: f64 = 0.8;

/// Filter state carried between cycles.
#[derive(Clone, Copy, Debug)]
struct FilterState {
    theta_y: f64,
    omega_y: f64,
    timestamp_us: i64,
}

/// Estimator configuration.
#[derive(Serialize, Deserialize, Clone, Copy, Debug)]
pub struct EstimatorConfig {
    /// Weight on the kinematic prediction term
    pub blend_weight: f64,
    /// Fixed mount-angle correction subtracted from the accelerometer
    /// angle [deg]
    pub mount_offset_deg: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            blend_weight: BLEND_WEIGHT,
            mount_offset_deg: 0.0,
        }
    }
}

/// Complementary pitch estimator.
///
/// Each cycle the accelerometer-only tilt angle is blended with a kinematic
/// prediction integrated from the previous fused angle and the gyro rate.
/// State is owned exclusively by the control context; there is no
/// concurrent access.
#[derive(Debug)]
pub struct TiltEstimator {
    config: EstimatorConfig,
    prev: Option<FilterState>,
}

impl TiltEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config, prev: None }
    }

    /// Fuse one sample into a pitch estimate [deg], normalized to
    /// [-180, 180).
    ///
    /// `gyro_offset_deg` is the live calibration angle from the parameter
    /// snapshot; it shifts the accelerometer reference so the balance point
    /// can be trimmed at runtime.
    pub fn estimate(&mut self, sample: &RawImuSample, now_us: i64, gyro_offset_deg: f64) -> f64 {
        let accel_angle = wrap_degrees(
            sample.accel_x.atan2(sample.accel_z).to_degrees()
                - self.config.mount_offset_deg
                - gyro_offset_deg,
        );

        // Prediction requires a previous sample and an advancing clock;
        // on the first sample, or if two samples carry the same timestamp,
        // the accelerometer angle stands alone.
        let theta_y = match self.prev {
            Some(prev) if now_us > prev.timestamp_us => {
                let dt = (now_us - prev.timestamp_us) as f64 / 1e6;
                let angular_acceleration = (sample.omega_y - prev.omega_y) / dt;
                let predicted =
                    prev.theta_y + sample.omega_y * dt + 0.5 * angular_acceleration * dt * dt;
                wrap_degrees(
                    (1.0 - self.config.blend_weight) * accel_angle
                        + self.config.blend_weight * predicted,
                )
            }
            _ => accel_angle,
        };

        self.prev = Some(FilterState {
            theta_y,
            omega_y: sample.omega_y,
            timestamp_us: now_us,
        });

        theta_y
    }
}

impl Default for TiltEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}

/// Normalize an angle into [-180, 180).
pub fn wrap_degrees(angle: f64) -> f64 {
    let mut wrapped = angle % 360.0;
    if wrapped >= 180.0 {
        wrapped -= 360.0;
    } else if wrapped < -180.0 {
        wrapped += 360.0;
    }
    wrapped
}
