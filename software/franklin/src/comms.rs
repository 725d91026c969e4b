//! TCP worker serving the tuning protocol.
//!
//! One client at a time: frames are resolved off the stream, dispatched by
//! opcode, and the connection is dropped (and re-accepted) on loss of sync
//! or disconnect. The worker talks to the control context only through the
//! config-update queue and the telemetry snapshot cell; it never touches
//! canonical parameter state.

use std::io::{ErrorKind, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use tracing::{error, info};

use franklin_shared::{FRAME_HEADER_LEN, Frame, Operation, StatusReport, VariableUpdate};

use crate::fabric::{Fabric, TelemetrySnapshot};
use crate::params::ConfigUpdate;

/// Poll interval while waiting for a client to connect.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Read timeout granularity; bounds how long shutdown can lag.
const READ_POLL: Duration = Duration::from_millis(100);

/// Tuning protocol server.
pub struct CommsWorker {
    listener: TcpListener,
    fabric: Fabric,
    stop: Arc<AtomicBool>,
}

impl CommsWorker {
    /// Bind the tuning server. Port 0 binds an ephemeral port, which
    /// `local_addr` reports.
    pub fn bind(port: u16, fabric: Fabric, stop: Arc<AtomicBool>) -> Result<Self, String> {
        let listener = TcpListener::bind(("0.0.0.0", port))
            .map_err(|e| format!("Unable to bind tuning server on port {port}: {e}"))?;
        listener
            .set_nonblocking(true)
            .map_err(|e| format!("Unable to set tuning listener to nonblocking mode: {e}"))?;

        Ok(Self {
            listener,
            fabric,
            stop,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, String> {
        self.listener
            .local_addr()
            .map_err(|e| format!("Unable to read tuning server address: {e}"))
    }

    /// Accept and serve one client at a time until the stop flag is raised.
    /// Connection loss is reported and followed by a re-accept; it never
    /// affects the control or actuation contexts.
    pub fn run(self) {
        match self.local_addr() {
            Ok(addr) => info!("Tuning server listening on {addr}"),
            Err(e) => error!("{e}"),
        }

        while !self.stop.load(Ordering::Relaxed) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    info!("Accepted tuning client at {addr}");
                    if let Err(e) = self.serve_client(stream) {
                        error!("{e}");
                    }
                    info!("Tuning client closed");
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    error!("Failed to accept tuning client: {e}");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }
    }

    /// Resolve and dispatch frames until disconnect, loss of sync, or stop.
    fn serve_client(&self, mut stream: TcpStream) -> Result<(), String> {
        // The accepted stream may inherit the listener's nonblocking mode;
        // reads here poll on a timeout instead so the loop never spins hot.
        stream
            .set_nonblocking(false)
            .map_err(|e| format!("Unable to set client stream to blocking mode: {e}"))?;
        stream
            .set_read_timeout(Some(READ_POLL))
            .map_err(|e| format!("Unable to set client read timeout: {e}"))?;

        let mut header = [0_u8; FRAME_HEADER_LEN];
        loop {
            if !self.read_full(&mut stream, &mut header)? {
                return Ok(());
            }

            // A corrupted header means framing is lost for good on this
            // connection; drop it and let the client reconnect clean.
            let (operation, length) = match Frame::parse_header(&header) {
                Ok(parsed) => parsed,
                Err(e) => {
                    error!("Dropping tuning client: {e}");
                    return Ok(());
                }
            };

            let mut payload = vec![0_u8; length];
            if !self.read_full(&mut stream, &mut payload)? {
                return Ok(());
            }

            self.dispatch(&mut stream, operation, payload)?;
        }
    }

    /// Fill `buf` from the stream. Returns false on clean disconnect or
    /// stop; errors only on unexpected I/O failure.
    fn read_full(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<bool, String> {
        let mut filled = 0;
        while filled < buf.len() {
            match stream.read(&mut buf[filled..]) {
                Ok(0) => return Ok(false),
                Ok(n) => filled += n,
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if self.stop.load(Ordering::Relaxed) {
                        return Ok(false);
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(format!("Failed to read from tuning client: {e}")),
            }
        }
        Ok(true)
    }

    fn dispatch(
        &self,
        stream: &mut TcpStream,
        operation: Operation,
        payload: Vec<u8>,
    ) -> Result<(), String> {
        match operation {
            Operation::Message => {
                info!("Client message: {}", String::from_utf8_lossy(&payload));
            }
            Operation::VariableUpdate => match VariableUpdate::read_payload(&payload) {
                // Target validity is the parameter store's call; unknown
                // targets ride the queue and get rejected there.
                Ok(update) => {
                    self.fabric.send_config_update(ConfigUpdate {
                        target: update.target,
                        value: update.value,
                    });
                }
                Err(e) => error!("Discarding malformed variable update: {e}"),
            },
            Operation::Echo => {
                stream
                    .write_all(&payload)
                    .map_err(|e| format!("Failed to echo payload: {e}"))?;
            }
            Operation::StatusPoll => {
                let snapshot = self.fabric.telemetry.load();
                let report = status_report(&snapshot);
                let frame = Frame::new(Operation::Message, report.write_payload().to_vec());
                stream
                    .write_all(&frame.to_bytes())
                    .map_err(|e| format!("Failed to send status report: {e}"))?;
            }
            Operation::Unknown(code) => {
                error!("Unknown operation {code}; discarding frame");
            }
        }

        Ok(())
    }
}

/// Encode a telemetry snapshot as the wire status report.
pub fn status_report(snapshot: &TelemetrySnapshot) -> StatusReport {
    StatusReport {
        pid_proportional: snapshot.gains.proportional,
        pid_integral: snapshot.gains.integral,
        pid_derivative: snapshot.gains.derivative,
        motors_enabled: snapshot.targets.motors_enabled,
        gyro_offset: snapshot.targets.gyro_offset,
        gyro_angle: snapshot.fused_angle,
        integral_sum: snapshot.integral_sum,
        motor_target: snapshot.motor_output,
    }
}

/// Stop flag and join handle for the running comms thread.
pub struct CommsWorkerHandle {
    stop: Arc<AtomicBool>,
    local_addr: SocketAddr,
    thread: JoinHandle<()>,
}

impl CommsWorkerHandle {
    /// Bind and spin up the tuning server on its own thread.
    pub fn spawn(port: u16, fabric: Fabric) -> Result<Self, String> {
        let stop = Arc::new(AtomicBool::new(false));
        let worker = CommsWorker::bind(port, fabric, Arc::clone(&stop))?;
        let local_addr = worker.local_addr()?;

        let thread = Builder::new()
            .name("tuning-server".to_string())
            .spawn(move || worker.run())
            .map_err(|e| format!("Failed to spawn tuning server thread: {e}"))?;

        Ok(Self {
            stop,
            local_addr,
            thread,
        })
    }

    /// Address the server actually bound, for clients and tests.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Raise the stop flag without waiting for the thread.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    /// Stop the server and wait for the thread to exit.
    pub fn join(self) -> Result<(), String> {
        self.stop.store(true, Ordering::Relaxed);
        self.thread
            .join()
            .map_err(|_| "Tuning server thread panicked".to_string())
    }
}
