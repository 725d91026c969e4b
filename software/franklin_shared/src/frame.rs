//! On-wire frame layout for the tuning protocol.
//!
//! Every message in either direction is framed the same way:
//!
//! ```text
//! [0x46, 0x46, opcode, length_hi, length_lo, payload...]
//! ```
//!
//! with the payload length carried big-endian in the two length bytes.

use crate::{HEADER_BYTE, Operation, UpdateTarget};

/// Number of bytes in a frame header: two sync bytes, opcode, two length bytes.
pub const FRAME_HEADER_LEN: usize = 5;

/// Largest payload length a peer will accept; longer claims are treated
/// as a corrupted header rather than an allocation request.
pub const MAX_PAYLOAD_LEN: usize = 1024;

/// A single protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub operation: Operation,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(operation: Operation, payload: Vec<u8>) -> Self {
        Self { operation, payload }
    }

    /// Serialize the frame header for this frame's payload length.
    pub fn header(&self) -> [u8; FRAME_HEADER_LEN] {
        let len = self.payload.len() as u16;
        [
            HEADER_BYTE,
            HEADER_BYTE,
            u8::from(self.operation),
            (len >> 8) as u8,
            len as u8,
        ]
    }

    /// Serialize header and payload into one buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&self.header());
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse and validate a frame header, returning the opcode and the
    /// payload length that follows on the wire.
    pub fn parse_header(header: &[u8]) -> Result<(Operation, usize), String> {
        if header.len() != FRAME_HEADER_LEN {
            return Err(format!(
                "Frame header must be {FRAME_HEADER_LEN} bytes, got {}",
                header.len()
            ));
        }

        if header[0] != HEADER_BYTE || header[1] != HEADER_BYTE {
            return Err(format!(
                "Invalid frame sync bytes {:#04x} {:#04x}",
                header[0], header[1]
            ));
        }

        let operation = Operation::from(header[2]);
        let length = (usize::from(header[3]) << 8) | usize::from(header[4]);
        if length > MAX_PAYLOAD_LEN {
            return Err(format!("Claimed payload length {length} exceeds {MAX_PAYLOAD_LEN}"));
        }

        Ok((operation, length))
    }
}

/// Payload of a [`Operation::VariableUpdate`] frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableUpdate {
    pub target: UpdateTarget,
    pub value: i16,
}

impl VariableUpdate {
    pub const PAYLOAD_LEN: usize = 3;

    pub fn new(target: UpdateTarget, value: i16) -> Self {
        Self { target, value }
    }

    /// Serialize to the 3-byte wire payload.
    pub fn write_payload(&self) -> [u8; Self::PAYLOAD_LEN] {
        let value = self.value.to_be_bytes();
        [u8::from(self.target), value[0], value[1]]
    }

    /// Parse from a received payload.
    pub fn read_payload(payload: &[u8]) -> Result<Self, String> {
        if payload.len() != Self::PAYLOAD_LEN {
            return Err(format!(
                "Variable update payload must be {} bytes, got {}",
                Self::PAYLOAD_LEN,
                payload.len()
            ));
        }

        Ok(Self {
            target: UpdateTarget::from(payload[0]),
            value: i16::from_be_bytes([payload[1], payload[2]]),
        })
    }
}
