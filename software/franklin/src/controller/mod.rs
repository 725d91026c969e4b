//! Fixed-cadence control loop tying the estimator, regulator, and parameter
//! store to the actuation and comms workers.

pub mod context;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::comms::CommsWorkerHandle;
use crate::estimator::TiltEstimator;
use crate::fabric::{Fabric, MotorTarget, TelemetrySnapshot};
use crate::imu::ImuReader;
use crate::motor::{MotorScheduler, MotorWorkerHandle, StepDriver};
use crate::params::ParameterStore;
use crate::pid::BalancePid;
use context::ControllerCtx;

/// Divisor turning the linear-velocity wire target into deg/s of wheel
/// speed.
pub const LINEAR_SPEED_SCALE: f64 = 5.0;

/// Per-cycle body of the control context, factored out of the loop so it
/// can be driven directly in tests.
///
/// Owns the estimator, the regulator, and the canonical parameter store
/// outright; nothing else may mutate them.
pub struct ControlCycle {
    estimator: TiltEstimator,
    pid: BalancePid,
    store: ParameterStore,
}

impl ControlCycle {
    pub fn new() -> Self {
        Self {
            estimator: TiltEstimator::default(),
            pid: BalancePid::new(),
            store: ParameterStore::new(),
        }
    }

    /// Run one control cycle: apply queued updates, snapshot, sample,
    /// estimate, regulate, dispatch, publish. Returns the dispatched
    /// command.
    pub fn run_cycle(
        &mut self,
        imu: &mut dyn ImuReader,
        fabric: &Fabric,
        now_us: i64,
        dt_s: f64,
        publish_deadline: Instant,
    ) -> Result<f64, String> {
        // Apply the whole config backlog before taking this cycle's
        // snapshot; no update lands while the snapshot is in use.
        for update in fabric.config_rx.try_iter() {
            if let Err(e) = self.store.apply(update) {
                error!("{e}");
            }
        }
        let (gains, targets) = self.store.snapshot();

        let sample = imu.read_sample()?;
        let angle = self.estimator.estimate(&sample, now_us, targets.gyro_offset);

        // The angular target doubles as the pitch setpoint
        let error = f64::from(targets.angular_velocity_target) - angle;
        let regulated = self.pid.compute(error, dt_s, &gains);

        // Open-loop translation drive rides on top of the balance output;
        // both wheels get the same command. While disabled, the dispatched
        // output is zeroed but the regulator keeps accumulating underneath
        // so re-enabling resumes without a restart transient.
        let command = if targets.motors_enabled {
            regulated + f64::from(targets.linear_velocity_target) / LINEAR_SPEED_SCALE
        } else {
            0.0
        };

        fabric.send_motor_target(MotorTarget {
            motor_1_omega: command,
            motor_2_omega: command,
        });

        let published = fabric.telemetry.store_until(
            TelemetrySnapshot {
                gains,
                targets,
                fused_angle: angle,
                integral_sum: self.pid.integral(),
                motor_output: command,
            },
            publish_deadline,
        );
        if !published {
            warn!("Telemetry cell busy past deadline; clients keep the stale snapshot");
        }

        Ok(command)
    }

    /// Accumulator value, for tests and metrics.
    pub fn integral_sum(&self) -> f64 {
        self.pid.integral()
    }
}

impl Default for ControlCycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Cycle-timing metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControllerMetrics {
    /// Margin between the cycle body finishing and its deadline [ns]
    pub cycle_time_margin_ns: f64,
    /// Number of cycles that overran their period
    pub overrun_count: u64,
}

/// The control context. Runs the fixed-cadence loop and owns the worker
/// threads for actuation and comms.
pub struct Controller {
    pub ctx: ControllerCtx,
    cycle: ControlCycle,
    imu: Box<dyn ImuReader>,
    driver: Option<Box<dyn StepDriver>>,
    fabric: Fabric,
    stop: Arc<AtomicBool>,
    metrics: ControllerMetrics,
}

impl Controller {
    pub fn new(ctx: ControllerCtx, imu: Box<dyn ImuReader>, driver: Box<dyn StepDriver>) -> Self {
        Self {
            ctx,
            cycle: ControlCycle::new(),
            imu,
            driver: Some(driver),
            fabric: Fabric::new(),
            stop: Arc::new(AtomicBool::new(false)),
            metrics: ControllerMetrics::default(),
        }
    }

    /// Channel endpoints and telemetry cell, for tests and sideloading.
    pub fn fabric(&self) -> &Fabric {
        &self.fabric
    }

    /// Shared flag that ends `run` when set.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub fn metrics(&self) -> ControllerMetrics {
        self.metrics
    }

    /// Run the control loop at its fixed cadence until the stop flag is
    /// raised. Spawns the actuation and comms workers, and winds them down
    /// on exit.
    pub fn run(&mut self) -> Result<(), String> {
        if self.ctx.dt_ns == 0 {
            return Err(format!(
                "dt_ns value of {} provided. dt_ns must be > 0",
                self.ctx.dt_ns
            ));
        }

        pin_control_thread();

        let driver = self
            .driver
            .take()
            .ok_or_else(|| "Controller has already run; step driver was not returned".to_string())?;
        let scheduler =
            MotorScheduler::new(driver, self.fabric.motor_rx.clone(), self.ctx.steps_per_rev);
        let motor_worker = MotorWorkerHandle::spawn(scheduler)?;
        let comms_worker = CommsWorkerHandle::spawn(self.ctx.server_port, self.fabric.clone())?;

        let cycle_duration = Duration::from_nanos(u64::from(self.ctx.dt_ns));
        let dt_s = f64::from(self.ctx.dt_ns) / 1e9;

        info!("Entering control loop at {:.1} Hz", 1.0 / dt_s);
        let start_of_operating = Instant::now();
        let mut target_time = cycle_duration;

        while !self.stop.load(Ordering::Relaxed) {
            let now_us = start_of_operating.elapsed().as_micros() as i64;
            let publish_deadline = Instant::now() + self.ctx.lock_wait;

            // Sensor loss is non-fatal; the next cycle retries and the
            // actuation side keeps its last rate meanwhile
            if let Err(e) = self.cycle.run_cycle(
                self.imu.as_mut(),
                &self.fabric,
                now_us,
                dt_s,
                publish_deadline,
            ) {
                error!("Control cycle error: {e}");
            }

            // Record timing margin, then sleep out the rest of the period
            let elapsed = start_of_operating.elapsed();
            self.metrics.cycle_time_margin_ns =
                (target_time.as_secs_f64() - elapsed.as_secs_f64()) * 1e9;
            match target_time.checked_sub(elapsed) {
                Some(remaining) => std::thread::sleep(remaining),
                None => {
                    self.metrics.overrun_count += 1;
                    warn!(
                        "Control cycle overran its period by {:.0} ns",
                        -self.metrics.cycle_time_margin_ns
                    );
                }
            }
            target_time += cycle_duration;
        }

        info!("Control loop stopped; shutting down workers");
        comms_worker.stop();
        motor_worker.stop();
        let scheduler = motor_worker.join()?;
        self.driver = Some(scheduler.into_driver());
        comms_worker.join()?;

        Ok(())
    }
}

/// Pin the control thread to the first core when the platform allows it.
/// The first core is more likely to be a high-performance core on a
/// heterogeneous computing device.
#[cfg(feature = "affinity")]
fn pin_control_thread() {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core) = core_ids.first() {
        core_affinity::set_for_current(*core);
    }
}

#[cfg(not(feature = "affinity"))]
fn pin_control_thread() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hootl::{RecordingStepDriver, RockingImu, ScriptedImu};
    use crate::imu::RawImuSample;
    use crate::params::ConfigUpdate;
    use franklin_shared::UpdateTarget;

    fn tilted_sample(theta_deg: f64) -> RawImuSample {
        RawImuSample {
            accel_x: theta_deg.to_radians().sin(),
            accel_z: theta_deg.to_radians().cos(),
            ..Default::default()
        }
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_millis(100)
    }

    #[test]
    fn updates_apply_before_the_cycle_snapshot() {
        let fabric = Fabric::new();
        let mut cycle = ControlCycle::new();
        let mut imu = ScriptedImu::new(vec![tilted_sample(2.0)]);

        fabric.send_config_update(ConfigUpdate {
            target: UpdateTarget::PidProportional,
            value: 5,
        });
        fabric.send_config_update(ConfigUpdate {
            target: UpdateTarget::MotorsEnabled,
            value: 1,
        });

        cycle
            .run_cycle(&mut imu, &fabric, 0, 0.01, deadline())
            .unwrap();

        // The published snapshot reflects this cycle's applied updates
        let snapshot = fabric.telemetry.load();
        assert_eq!(snapshot.gains.proportional, 5);
        assert!(snapshot.targets.motors_enabled);

        // A motor target was dispatched
        assert!(fabric.motor_rx.try_recv().is_ok());
    }

    #[test]
    fn disabled_motors_dispatch_zero_while_the_regulator_accumulates() {
        let fabric = Fabric::new();
        let mut cycle = ControlCycle::new();
        let mut imu = ScriptedImu::new(vec![tilted_sample(10.0)]);

        fabric.send_config_update(ConfigUpdate {
            target: UpdateTarget::PidIntegral,
            value: 50,
        });

        let command = cycle
            .run_cycle(&mut imu, &fabric, 0, 0.01, deadline())
            .unwrap();

        assert_eq!(command, 0.0);
        let dispatched = fabric.motor_rx.try_recv().unwrap();
        assert_eq!(dispatched.motor_1_omega, 0.0);
        assert_eq!(dispatched.motor_2_omega, 0.0);

        // The accumulator moved even though the dispatch was zeroed
        assert!(cycle.integral_sum().abs() > 0.0);
        assert_eq!(fabric.telemetry.load().motor_output, 0.0);
    }

    #[test]
    fn enabled_motors_receive_the_regulated_command() {
        let fabric = Fabric::new();
        let mut cycle = ControlCycle::new();
        let mut imu = ScriptedImu::new(vec![tilted_sample(5.0), tilted_sample(5.0)]);

        for (target, value) in [
            (UpdateTarget::PidProportional, 200),
            (UpdateTarget::MotorsEnabled, 1),
        ] {
            fabric.send_config_update(ConfigUpdate { target, value });
        }

        let command = cycle
            .run_cycle(&mut imu, &fabric, 0, 0.01, deadline())
            .unwrap();

        // Positive tilt, setpoint zero: the command opposes the lean
        assert!(command < 0.0);
        let dispatched = fabric.motor_rx.try_recv().unwrap();
        assert_eq!(dispatched.motor_1_omega, command);
        assert_eq!(dispatched.motor_2_omega, command);
    }

    #[test]
    fn translation_drive_rides_on_the_balance_output() {
        let fabric = Fabric::new();
        let mut cycle = ControlCycle::new();
        // Perfectly level: the regulator contributes nothing
        let mut imu = ScriptedImu::new(vec![tilted_sample(0.0)]);

        for (target, value) in [
            (UpdateTarget::MotorsEnabled, 1),
            (UpdateTarget::LinearVelocityTarget, 50),
        ] {
            fabric.send_config_update(ConfigUpdate { target, value });
        }

        let command = cycle
            .run_cycle(&mut imu, &fabric, 0, 0.01, deadline())
            .unwrap();
        assert_eq!(command, 50.0 / LINEAR_SPEED_SCALE);
    }

    #[test]
    fn sensor_failure_is_surfaced_and_nothing_is_dispatched() {
        struct DeadImu;
        impl ImuReader for DeadImu {
            fn read_sample(&mut self) -> Result<RawImuSample, String> {
                Err("No response on the sensor bus".to_string())
            }
        }

        let fabric = Fabric::new();
        let mut cycle = ControlCycle::new();

        let result = cycle.run_cycle(&mut DeadImu, &fabric, 0, 0.01, deadline());
        assert!(result.is_err());
        assert!(fabric.motor_rx.try_recv().is_err());
    }

    #[test]
    fn controller_runs_end_to_end_without_hardware() {
        let mut ctx = ControllerCtx::default();
        ctx.dt_ns = 1_000_000; // 1 kHz to pack cycles into a short test
        ctx.server_port = 0;

        let imu = RockingImu::new(5.0, 1.0, 0.001);
        let (driver, log) = RecordingStepDriver::new();
        let mut controller = Controller::new(ctx, Box::new(imu), Box::new(driver));

        // Enable the motors and set a working gain before the loop starts
        for (target, value) in [
            (UpdateTarget::PidProportional, 400),
            (UpdateTarget::MotorsEnabled, 1),
        ] {
            controller.fabric().send_config_update(ConfigUpdate { target, value });
        }

        let stop = controller.stop_flag();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            stop.store(true, Ordering::Relaxed);
        });

        controller.run().unwrap();
        stopper.join().unwrap();

        // The cycle published telemetry and the actuation side stepped
        let snapshot = controller.fabric().telemetry.load();
        assert_eq!(snapshot.gains.proportional, 400);
        assert!(snapshot.targets.motors_enabled);
        assert!(!log.lock().unwrap().events.is_empty());
    }
}
