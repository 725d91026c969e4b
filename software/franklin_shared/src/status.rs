//! Status-report payload served in response to a status poll.
//!
//! The report is a fixed 32-byte payload of eight 4-byte entries
//! `[index, value_hi, value_lo, 0x00]`, in a fixed entry order. Fractional
//! quantities are carried as scaled signed 16-bit integers; the scale for
//! each entry is part of the wire contract and is undone by the client.

/// Bytes per status entry.
pub const STATUS_ENTRY_LEN: usize = 4;

/// Number of entries in a status report.
pub const STATUS_ENTRY_COUNT: usize = 8;

/// Total status payload length.
pub const STATUS_PAYLOAD_LEN: usize = STATUS_ENTRY_LEN * STATUS_ENTRY_COUNT;

/// Decoded status report, in engineering units.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StatusReport {
    pub pid_proportional: i16,
    pub pid_integral: i16,
    pub pid_derivative: i16,
    pub motors_enabled: bool,
    /// Calibration angle [deg]; carried on the wire x10
    pub gyro_offset: f64,
    /// Fused tilt angle [deg]; carried on the wire x100
    pub gyro_angle: f64,
    /// PID integral accumulator; carried on the wire x10
    pub integral_sum: f64,
    /// Commanded motor output [deg/s]; carried on the wire x100
    pub motor_target: f64,
}

impl StatusReport {
    /// Serialize to the fixed wire payload, truncating scaled values to i16
    /// the same way the receiver's display expects them.
    pub fn write_payload(&self) -> [u8; STATUS_PAYLOAD_LEN] {
        let entries: [i16; STATUS_ENTRY_COUNT] = [
            self.pid_proportional,
            self.pid_integral,
            self.pid_derivative,
            i16::from(self.motors_enabled),
            (self.gyro_offset * 10.0) as i16,
            (self.gyro_angle * 100.0) as i16,
            (self.integral_sum * 10.0) as i16,
            (self.motor_target * 100.0) as i16,
        ];

        let mut payload = [0_u8; STATUS_PAYLOAD_LEN];
        for (i, value) in entries.iter().enumerate() {
            let bytes = value.to_be_bytes();
            let base = i * STATUS_ENTRY_LEN;
            payload[base] = i as u8;
            payload[base + 1] = bytes[0];
            payload[base + 2] = bytes[1];
            payload[base + 3] = 0;
        }

        payload
    }

    /// Parse a received status payload, undoing the wire scalings.
    pub fn read_payload(payload: &[u8]) -> Result<Self, String> {
        if payload.len() != STATUS_PAYLOAD_LEN {
            return Err(format!(
                "Status payload must be {STATUS_PAYLOAD_LEN} bytes, got {}",
                payload.len()
            ));
        }

        let mut entries = [0_i16; STATUS_ENTRY_COUNT];
        for (i, entry) in payload.chunks_exact(STATUS_ENTRY_LEN).enumerate() {
            if usize::from(entry[0]) != i {
                return Err(format!(
                    "Status entry {i} carries index {}, expected {i}",
                    entry[0]
                ));
            }
            if entry[3] != 0 {
                return Err(format!("Status entry {i} missing zero terminator"));
            }
            entries[i] = i16::from_be_bytes([entry[1], entry[2]]);
        }

        Ok(Self {
            pid_proportional: entries[0],
            pid_integral: entries[1],
            pid_derivative: entries[2],
            motors_enabled: entries[3] == 1,
            gyro_offset: f64::from(entries[4]) / 10.0,
            gyro_angle: f64::from(entries[5]) / 100.0,
            integral_sum: f64::from(entries[6]) / 10.0,
            motor_target: f64::from(entries[7]) / 100.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_follow_the_fixed_order_and_scaling() {
        let report = StatusReport {
            pid_proportional: 5,
            pid_integral: 2,
            pid_derivative: 1,
            motors_enabled: false,
            gyro_offset: 0.0,
            gyro_angle: 3.0,
            integral_sum: 0.4,
            motor_target: 0.0,
        };

        let payload = report.write_payload();
        let values: Vec<i16> = payload
            .chunks_exact(STATUS_ENTRY_LEN)
            .map(|entry| i16::from_be_bytes([entry[1], entry[2]]))
            .collect();

        assert_eq!(values, vec![5, 2, 1, 0, 0, 300, 4, 0]);
    }

    #[test]
    fn negative_angles_survive_the_wire() {
        let report = StatusReport {
            gyro_angle: -12.25,
            motor_target: -3.5,
            ..Default::default()
        };

        let parsed = StatusReport::read_payload(&report.write_payload()).unwrap();
        assert_eq!(parsed.gyro_angle, -12.25);
        assert_eq!(parsed.motor_target, -3.5);
    }

    #[test]
    fn shuffled_indices_are_rejected() {
        let report = StatusReport::default();
        let mut payload = report.write_payload();
        payload[0] = 3;
        assert!(StatusReport::read_payload(&payload).is_err());
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let report = StatusReport::default();
        let payload = report.write_payload();
        assert!(StatusReport::read_payload(&payload[..12]).is_err());
    }
}
