//! Run the full control stack with no hardware attached.
//!
//! Demonstrated here:
//!   * A simulated IMU rocking the robot about its pitch axis
//!   * A recording step driver standing in for the GPIO pins
//!   * Sideloading config updates straight into the coordination fabric
//!   * Reading back the published telemetry snapshot

use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use franklin::controller::context::ControllerCtx;
use franklin::hootl::{RecordingStepDriver, RockingImu};
use franklin::logging::init_logging;
use franklin::params::ConfigUpdate;
use franklin::Controller;
use franklin_shared::UpdateTarget;

fn main() {
    // Start building up controller settings
    let mut ctx = ControllerCtx::default();
    ctx.op_name = "hootl_example".to_string();

    init_logging(&ctx.op_dir, &ctx.op_name).expect("Failed to set up logging");

    // Set control rate and let the tuning server pick an ephemeral port
    let rate_hz = 100.0;
    ctx.dt_ns = (1e9_f64 / rate_hz).ceil() as u32;
    ctx.server_port = 0;

    // Simulated robot: 5 degrees of rocking over a 1 s period
    let imu = RockingImu::new(5.0, 1.0, 1.0 / rate_hz);
    let (driver, drive_log) = RecordingStepDriver::new();

    let mut controller = Controller::new(ctx, Box::new(imu), Box::new(driver));

    // Enable the motors and set working gains before the loop starts
    for (target, value) in [
        (UpdateTarget::PidProportional, 400),
        (UpdateTarget::PidIntegral, 40),
        (UpdateTarget::PidDerivative, -100),
        (UpdateTarget::MotorsEnabled, 1),
    ] {
        controller
            .fabric()
            .send_config_update(ConfigUpdate { target, value });
    }

    // End the run after a couple of seconds
    let stop = controller.stop_flag();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_secs(2));
        stop.store(true, Ordering::Relaxed);
    });

    controller.run().expect("Control loop failed");
    stopper.join().unwrap();

    // Report what the robot would have done
    let snapshot = controller.fabric().telemetry.load();
    let pulses = drive_log.lock().unwrap().events.len();
    info!(
        "Final telemetry: angle {:.2} deg, integral {:.2}, output {:.2} deg/s",
        snapshot.fused_angle, snapshot.integral_sum, snapshot.motor_output
    );
    info!("Actuation emitted {pulses} step pulses across both motors");
}
