//! Tune a running control stack over the wire protocol.
//!
//! Spins up a hardware-out-of-the-loop controller on the default tuning
//! port, then connects as a client: uploads gains, enables the motors, and
//! polls status while the robot balances its simulated rocking motion.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tracing::info;

use franklin::controller::context::ControllerCtx;
use franklin::hootl::{RecordingStepDriver, RockingImu};
use franklin::logging::init_logging;
use franklin::Controller;
use franklin_shared::{
    FRAME_HEADER_LEN, Frame, Operation, StatusReport, UpdateTarget, VariableUpdate,
};

/// Minimal tuning client over a blocking TCP stream.
struct TuningClient {
    stream: TcpStream,
}

impl TuningClient {
    fn connect(addr: &str) -> Result<Self, String> {
        let stream = TcpStream::connect(addr)
            .map_err(|e| format!("Failed to connect to tuning server at {addr}: {e}"))?;
        stream
            .set_read_timeout(Some(Duration::from_secs(2)))
            .map_err(|e| format!("Failed to set read timeout: {e}"))?;
        Ok(Self { stream })
    }

    /// Upload one variable update.
    fn send_update(&mut self, target: UpdateTarget, value: i16) -> Result<(), String> {
        let update = VariableUpdate::new(target, value);
        let frame = Frame::new(Operation::VariableUpdate, update.write_payload().to_vec());
        self.stream
            .write_all(&frame.to_bytes())
            .map_err(|e| format!("Failed to send update: {e}"))
    }

    /// Poll for a status report.
    fn poll_status(&mut self) -> Result<StatusReport, String> {
        let frame = Frame::new(Operation::StatusPoll, Vec::new());
        self.stream
            .write_all(&frame.to_bytes())
            .map_err(|e| format!("Failed to send status poll: {e}"))?;

        let mut header = [0_u8; FRAME_HEADER_LEN];
        self.stream
            .read_exact(&mut header)
            .map_err(|e| format!("Failed to read status header: {e}"))?;
        let (_, length) = Frame::parse_header(&header)?;

        let mut payload = vec![0_u8; length];
        self.stream
            .read_exact(&mut payload)
            .map_err(|e| format!("Failed to read status payload: {e}"))?;

        StatusReport::read_payload(&payload)
    }
}

fn main() {
    let mut ctx = ControllerCtx::default();
    ctx.op_name = "tune_example".to_string();

    init_logging(&ctx.op_dir, &ctx.op_name).expect("Failed to set up logging");

    let rate_hz = 100.0;
    ctx.dt_ns = (1e9_f64 / rate_hz).ceil() as u32;
    let addr = format!("127.0.0.1:{}", ctx.server_port);

    // Robot side, on its own thread
    let imu = RockingImu::new(5.0, 1.0, 1.0 / rate_hz);
    let (driver, _drive_log) = RecordingStepDriver::new();
    let mut controller = Controller::new(ctx, Box::new(imu), Box::new(driver));
    let stop = controller.stop_flag();
    let robot = std::thread::spawn(move || controller.run());

    // Give the tuning server a moment to come up, then connect
    std::thread::sleep(Duration::from_millis(300));
    let mut client = TuningClient::connect(&addr).expect("Failed to connect");

    for (target, value) in [
        (UpdateTarget::PidProportional, 400),
        (UpdateTarget::PidIntegral, 40),
        (UpdateTarget::PidDerivative, -100),
        (UpdateTarget::MotorsEnabled, 1),
    ] {
        client.send_update(target, value).expect("Update failed");
    }

    // Watch the robot settle for a second
    for _ in 0..5 {
        std::thread::sleep(Duration::from_millis(200));
        let status = client.poll_status().expect("Status poll failed");
        info!(
            "Status: p {} i {} d {} enabled {} | angle {:.2} deg, integral {:.1}, output {:.2} deg/s",
            status.pid_proportional,
            status.pid_integral,
            status.pid_derivative,
            status.motors_enabled,
            status.gyro_angle,
            status.integral_sum,
            status.motor_target,
        );
    }

    stop.store(true, Ordering::Relaxed);
    robot.join().unwrap().expect("Control loop failed");
}
