//! Balance PID with saturation anti-windup.

use crate::params::PidGains;

/// Inverse scale on the proportional gain as carried over the wire.
pub const PROPORTIONAL_SCALE: f64 = 200.0;

/// Inverse scale on the integral gain.
pub const INTEGRAL_SCALE: f64 = 50.0;

/// Inverse scale on the derivative gain. Negative: the wire value is
/// positive in the tuning GUI while the term opposes the error rate.
pub const DERIVATIVE_SCALE: f64 = -200.0;

/// Clamp on the integral accumulator magnitude.
pub const MAX_INTEGRAL: f64 = 100.0;

/// Clamp on the commanded angular velocity [deg/s].
pub const MAX_ANGULAR_VELOCITY: f64 = 50.0;

/// PID regulator state persisting across control cycles.
///
/// The accumulator keeps integrating while the motors are disabled so that
/// re-enabling resumes from wherever it was left rather than restarting
/// discontinuously.
#[derive(Debug, Default)]
pub struct BalancePid {
    integral: f64,
    previous_error: f64,
}

impl BalancePid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current accumulator value, for telemetry.
    pub fn integral(&self) -> f64 {
        self.integral
    }

    /// Run one PID update, returning a bounded angular-velocity
    /// command [deg/s].
    ///
    /// `dt_s` must be positive.
    pub fn compute(&mut self, error: f64, dt_s: f64, gains: &PidGains) -> f64 {
        let proportional = error;

        // dt divides rather than multiplies here; the integral and
        // derivative scale constants are tuned against this form.
        self.integral += error / dt_s;
        self.integral = self.integral.min(MAX_INTEGRAL).max(-MAX_INTEGRAL);

        let derivative = (error - self.previous_error) / dt_s;
        self.previous_error = error;

        let output = f64::from(gains.proportional) / PROPORTIONAL_SCALE * proportional
            + f64::from(gains.integral) / INTEGRAL_SCALE * self.integral
            + f64::from(gains.derivative) / DERIVATIVE_SCALE * derivative;

        // Saturation: zeroing the previous error suppresses the derivative
        // kick on the cycle after the output rails.
        let clamped = output.min(MAX_ANGULAR_VELOCITY).max(-MAX_ANGULAR_VELOCITY);
        if clamped != output {
            self.previous_error = 0.0;
        }

        clamped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gains(p: i16, i: i16, d: i16) -> PidGains {
        PidGains {
            proportional: p,
            integral: i,
            derivative: d,
        }
    }

    #[test]
    fn output_never_exceeds_the_velocity_limit() {
        let mut pid = BalancePid::new();
        let g = gains(10_000, 5_000, -5_000);

        for error in [-1e6, -45.0, -0.1, 0.0, 0.1, 45.0, 1e6] {
            let out = pid.compute(error, 0.01, &g);
            assert!(
                out.abs() <= MAX_ANGULAR_VELOCITY,
                "output {out} exceeds limit for error {error}"
            );
        }
    }

    #[test]
    fn integral_accumulator_is_clamped() {
        let mut pid = BalancePid::new();
        let g = gains(0, 1, 0);

        for _ in 0..1000 {
            pid.compute(30.0, 0.01, &g);
            assert!(pid.integral().abs() <= MAX_INTEGRAL);
        }
        assert_eq!(pid.integral(), MAX_INTEGRAL);

        for _ in 0..2000 {
            pid.compute(-30.0, 0.01, &g);
            assert!(pid.integral().abs() <= MAX_INTEGRAL);
        }
        assert_eq!(pid.integral(), -MAX_INTEGRAL);
    }

    #[test]
    fn saturation_resets_the_previous_error() {
        let mut pid = BalancePid::new();
        let g = gains(10_000, 0, 0);

        // Rail the output
        let out = pid.compute(40.0, 0.01, &g);
        assert_eq!(out, MAX_ANGULAR_VELOCITY);

        // Next cycle the derivative must be computed against a zeroed
        // previous error: with a pure-D controller and a repeated error,
        // an un-reset previous error would yield zero derivative, while
        // the reset yields error / dt.
        let g_d = gains(0, 0, -200);
        let out = pid.compute(0.01, 0.01, &g_d);
        let expected = f64::from(g_d.derivative) / DERIVATIVE_SCALE * (0.01 / 0.01);
        assert!((out - expected).abs() < 1e-9, "out = {out}, expected {expected}");
    }

    #[test]
    fn unsaturated_output_keeps_the_previous_error() {
        let mut pid = BalancePid::new();
        let g = gains(0, 0, -200);

        pid.compute(1.0, 1.0, &g);
        // derivative = (1 - 1) / 1 = 0 when the previous error survived
        let out = pid.compute(1.0, 1.0, &g);
        assert_eq!(out, 0.0);
    }

    #[test]
    fn integral_uses_dt_as_divisor() {
        let mut pid = BalancePid::new();
        let g = gains(0, 50, 0);

        // One update with error 0.2 over dt 0.1 s: accumulator = 2.0,
        // output = (50 / 50) * 2.0
        let out = pid.compute(0.2, 0.1, &g);
        assert!((pid.integral() - 2.0).abs() < 1e-12);
        assert!((out - 2.0).abs() < 1e-12);
    }
}
