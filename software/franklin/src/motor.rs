//! Step-pulse scheduling for the two wheel motors.
//!
//! The scheduler runs a free-running loop on its own thread, bounded only by
//! pulse-timing checks. It must never block on a lock or queue: a missed
//! target check shows up as slightly irregular step timing, while a blocking
//! wait would stall the wheels entirely.

use std::f64::consts::PI;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{Builder, JoinHandle};
use std::time::Instant;

use crossbeam::channel::Receiver;
use tracing::info;

use crate::fabric::MotorTarget;

/// Steps per output-shaft revolution: a 200-step motor at 1/16 microstepping.
pub const STEPS_PER_REV: f64 = 3200.0;

/// Step-pulse assert width [us].
pub const PULSE_WIDTH_US: u64 = 10;

/// Commanded speeds below this magnitude [deg/s] hold position instead
/// of stepping.
pub const MIN_STEP_VELOCITY: f64 = 1.0;

/// Wheel motor identifier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Motor {
    One,
    Two,
}

/// Inter-pulse timing for one motor.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepRate {
    /// Below the stepping threshold: no pulses
    Hold,
    /// Signed inter-pulse period [us]; the sign selects the direction level
    Period(i64),
}

/// Convert a commanded angular velocity [deg/s] into an inter-pulse period.
pub fn step_rate_for(omega_dps: f64, steps_per_rev: f64) -> StepRate {
    if omega_dps.abs() < MIN_STEP_VELOCITY {
        return StepRate::Hold;
    }

    StepRate::Period(((2.0 * PI * 1e6) / (steps_per_rev * omega_dps)) as i64)
}

/// Step/direction GPIO seam for the two stepper drivers.
///
/// Implementations must emit pulses of at least [`PULSE_WIDTH_US`] and be
/// movable into the actuation thread.
pub trait StepDriver: Send {
    /// Latch the direction level for a motor before pulsing.
    fn set_direction(&mut self, motor: Motor, forward: bool);

    /// Emit one step pulse: assert, hold, deassert.
    fn step(&mut self, motor: Motor);
}

#[derive(Clone, Copy, Debug)]
struct StepTiming {
    rate: StepRate,
    last_pulse_us: i64,
}

impl Default for StepTiming {
    fn default() -> Self {
        Self {
            rate: StepRate::Hold,
            last_pulse_us: 0,
        }
    }
}

/// Free-running pulse scheduler for both motors.
///
/// Targets arrive over the motor channel; absent a new target, each motor
/// keeps stepping at its last known rate indefinitely. The two motors are
/// serviced independently: neither ever waits on the other's timing
/// decision.
pub struct MotorScheduler {
    driver: Box<dyn StepDriver>,
    target_rx: Receiver<MotorTarget>,
    steps_per_rev: f64,
    timing: [StepTiming; 2],
}

impl MotorScheduler {
    pub fn new(driver: Box<dyn StepDriver>, target_rx: Receiver<MotorTarget>, steps_per_rev: f64) -> Self {
        Self {
            driver,
            target_rx,
            steps_per_rev,
            timing: [StepTiming::default(); 2],
        }
    }

    /// Check for a newly delivered target without waiting; if one arrived,
    /// recompute both motors' inter-pulse periods.
    pub fn poll_target(&mut self) {
        if let Ok(target) = self.target_rx.try_recv() {
            self.apply_target(target);
        }
    }

    /// Convert a delivered target into per-motor step rates.
    pub fn apply_target(&mut self, target: MotorTarget) {
        self.timing[0].rate = step_rate_for(target.motor_1_omega, self.steps_per_rev);
        self.timing[1].rate = step_rate_for(target.motor_2_omega, self.steps_per_rev);
    }

    /// Service both motors at `now_us`, pulsing any whose period has
    /// elapsed.
    pub fn service(&mut self, now_us: i64) {
        for (i, motor) in [Motor::One, Motor::Two].into_iter().enumerate() {
            let timing = &mut self.timing[i];
            if let StepRate::Period(period) = timing.rate {
                if now_us - timing.last_pulse_us > period.abs() {
                    self.driver.set_direction(motor, period >= 0);
                    self.driver.step(motor);
                    timing.last_pulse_us = now_us;
                }
            }
        }
    }

    /// Hand the driver back after the scheduler is retired.
    pub fn into_driver(self) -> Box<dyn StepDriver> {
        self.driver
    }
}

/// Stop flag and join handle for the running actuation thread.
pub struct MotorWorkerHandle {
    stop: Arc<AtomicBool>,
    thread: JoinHandle<MotorScheduler>,
}

impl MotorWorkerHandle {
    /// Spin up the scheduler loop on its own thread.
    pub fn spawn(mut scheduler: MotorScheduler) -> Result<Self, String> {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let thread = Builder::new()
            .name("motor-scheduler".to_string())
            .spawn(move || {
                pin_actuation_thread();
                info!("Starting step scheduler; targets hold until superseded");

                let start = Instant::now();
                while !flag.load(Ordering::Relaxed) {
                    let now_us = start.elapsed().as_micros() as i64;
                    scheduler.service(now_us);
                    scheduler.poll_target();
                }

                scheduler
            })
            .map_err(|e| format!("Failed to spawn motor scheduler thread: {e}"))?;

        Ok(Self { stop, thread })
    }

    /// Raise the stop flag without waiting for the thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the loop and reclaim the scheduler.
    pub fn join(self) -> Result<MotorScheduler, String> {
        self.stop.store(true, Ordering::Relaxed);
        self.thread
            .join()
            .map_err(|_| "Motor scheduler thread panicked".to_string())
    }
}

/// Pin the actuation thread to the last core and raise its priority,
/// when the platform allows it.
#[cfg(feature = "affinity")]
fn pin_actuation_thread() {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    if let Some(core) = core_ids.last() {
        core_affinity::set_for_current(*core);
    }
    let _ = thread_priority::set_current_thread_priority(thread_priority::ThreadPriority::Max);
}

#[cfg(not(feature = "affinity"))]
fn pin_actuation_thread() {}
