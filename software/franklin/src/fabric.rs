//! Bounded queues and cached snapshots linking the three execution contexts.
//!
//! Three channels with deliberately different delivery semantics:
//!
//! * control -> actuation: bounded motor-target queue, non-blocking send,
//!   newest value dropped when full (last-known-good)
//! * comms -> control: bounded config-update queue, drained in full once
//!   per control cycle
//! * control -> comms: latest-value telemetry cell, overwrite semantics
//!
//! Nothing here may ever block the actuation context.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use tracing::warn;

use crate::params::{ConfigUpdate, ControlTargets, PidGains};

/// Message buffer capacity for both bounded queues.
pub const CHANNEL_CAPACITY: usize = 10;

/// Angular-velocity command for the two wheel motors [deg/s].
///
/// Both fields carry the same value in the current single-axis design;
/// the split is kept so differential drive can ride the same channel.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MotorTarget {
    pub motor_1_omega: f64,
    pub motor_2_omega: f64,
}

/// Snapshot published by the control context once per cycle and overwritten
/// in place. Carries the applied gains and targets alongside the motion
/// state so status polls are served from a single consistent copy.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TelemetrySnapshot {
    pub gains: PidGains,
    pub targets: ControlTargets,
    /// Fused tilt angle [deg]
    pub fused_angle: f64,
    /// PID integral accumulator
    pub integral_sum: f64,
    /// Commanded motor output [deg/s]
    pub motor_output: f64,
}

/// Thread-safe cell holding the latest [`TelemetrySnapshot`].
///
/// Readers only ever see the most recent value, possibly stale by up to one
/// control-cycle period; no history is retained.
#[derive(Clone, Default)]
pub struct SnapshotCell {
    inner: Arc<RwLock<Arc<TelemetrySnapshot>>>,
}

impl SnapshotCell {
    /// Replace the stored snapshot, giving up at `deadline` if the lock
    /// stays contended. Returns whether the store landed; on false the
    /// readers keep the previous snapshot.
    pub fn store_until(&self, snapshot: TelemetrySnapshot, deadline: Instant) -> bool {
        let snapshot = Arc::new(snapshot);
        loop {
            if let Ok(mut w) = self.inner.try_write() {
                *w = Arc::clone(&snapshot);
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }

    /// Clone the latest snapshot handle.
    pub fn load(&self) -> Arc<TelemetrySnapshot> {
        self.inner
            .read()
            .map(|r| Arc::clone(&*r))
            .unwrap_or_else(|_| Arc::new(TelemetrySnapshot::default()))
    }
}

/// The full set of channels between control, actuation, and comms.
///
/// Endpoints are cloneable; each worker takes the ends it needs.
#[derive(Clone)]
pub struct Fabric {
    pub motor_tx: Sender<MotorTarget>,
    pub motor_rx: Receiver<MotorTarget>,
    pub config_tx: Sender<ConfigUpdate>,
    pub config_rx: Receiver<ConfigUpdate>,
    pub telemetry: SnapshotCell,
}

impl Fabric {
    pub fn new() -> Self {
        let (motor_tx, motor_rx) = bounded(CHANNEL_CAPACITY);
        let (config_tx, config_rx) = bounded(CHANNEL_CAPACITY);

        Self {
            motor_tx,
            motor_rx,
            config_tx,
            config_rx,
            telemetry: SnapshotCell::default(),
        }
    }

    /// Non-blocking motor-target send. On a full queue the new value is
    /// dropped and the actuation side keeps consuming what was already
    /// queued; only the delivery is lost, never the consumer's last rate.
    pub fn send_motor_target(&self, target: MotorTarget) -> bool {
        match self.motor_tx.try_send(target) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Motor target queue full; dropping update");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Motor target queue disconnected; dropping update");
                false
            }
        }
    }

    /// Non-blocking config-update send, used by the comms context.
    pub fn send_config_update(&self, update: ConfigUpdate) -> bool {
        match self.config_tx.try_send(update) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Config update queue full; dropping update");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                warn!("Config update queue disconnected; dropping update");
                false
            }
        }
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn full_motor_queue_drops_the_newest_value() {
        let fabric = Fabric::new();

        for i in 0..CHANNEL_CAPACITY {
            assert!(fabric.send_motor_target(MotorTarget {
                motor_1_omega: i as f64,
                motor_2_omega: i as f64,
            }));
        }

        // Queue is full: the send is refused without blocking
        assert!(!fabric.send_motor_target(MotorTarget {
            motor_1_omega: 99.0,
            motor_2_omega: 99.0,
        }));

        // The consumer still sees the oldest queued value unchanged
        let first = fabric.motor_rx.try_recv().unwrap();
        assert_eq!(first.motor_1_omega, 0.0);
    }

    #[test]
    fn config_updates_drain_in_arrival_order() {
        let fabric = Fabric::new();
        for value in [1, 2, 3] {
            assert!(fabric.send_config_update(ConfigUpdate {
                target: franklin_shared::UpdateTarget::PidProportional,
                value,
            }));
        }

        let drained: Vec<i16> = fabric.config_rx.try_iter().map(|u| u.value).collect();
        assert_eq!(drained, vec![1, 2, 3]);

        // Empty queue is not an error
        assert!(fabric.config_rx.try_recv().is_err());
    }

    #[test]
    fn telemetry_cell_overwrites() {
        let cell = SnapshotCell::default();
        let deadline = Instant::now() + Duration::from_millis(10);

        assert!(cell.store_until(
            TelemetrySnapshot {
                fused_angle: 1.0,
                ..Default::default()
            },
            deadline,
        ));
        assert!(cell.store_until(
            TelemetrySnapshot {
                fused_angle: 2.0,
                ..Default::default()
            },
            deadline,
        ));

        assert_eq!(cell.load().fused_angle, 2.0);
    }

    #[test]
    fn telemetry_reader_sees_a_consistent_snapshot_across_threads() {
        let cell = SnapshotCell::default();
        let writer_cell = cell.clone();

        let writer = std::thread::spawn(move || {
            for i in 0..1000 {
                let snap = TelemetrySnapshot {
                    fused_angle: i as f64,
                    motor_output: i as f64,
                    ..Default::default()
                };
                writer_cell.store_until(snap, Instant::now() + Duration::from_millis(100));
            }
        });

        for _ in 0..1000 {
            let snap = cell.load();
            assert_eq!(snap.fused_angle, snap.motor_output);
        }

        writer.join().unwrap();
    }
}
