#![doc = include_str!("../README.md")]

pub mod frame;
pub mod status;

pub use frame::{Frame, VariableUpdate, FRAME_HEADER_LEN, MAX_PAYLOAD_LEN};
pub use status::StatusReport;

/// Value of both sync bytes at the start of every frame (ASCII 'F').
pub const HEADER_BYTE: u8 = 0x46;

/// The TCP port on which the robot expects tuning clients to connect.
pub const SERVER_PORT: u16 = 8046;

/// Derive To/From with an added "Unknown" variant catch-all for converting
/// from numerical values that do not match a valid variant in order to
/// avoid either panicking or cumbersome error handling.
///
/// Yoinked shamelessly (with some modification) from smoltcp.
#[macro_export]
macro_rules! enum_with_unknown {
    (
        $( #[$enum_attr:meta] )*
        pub enum $name:ident($ty:ty) {
            $(
              $( #[$variant_attr:meta] )*
              $variant:ident = $value:expr
            ),+ $(,)?
        }
    ) => {
        #[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy)]
        $( #[$enum_attr] )*
        pub enum $name {
            $(
              $( #[$variant_attr] )*
              $variant
            ),*,
            /// Catch-all for values that do not match a variant
            Unknown($ty)
        }

        impl ::core::convert::From<$ty> for $name {
            fn from(value: $ty) -> Self {
                match value {
                    $( $value => $name::$variant ),*,
                    other => $name::Unknown(other)
                }
            }
        }

        impl ::core::convert::From<$name> for $ty {
            fn from(value: $name) -> Self {
                match value {
                    $( $name::$variant => $value ),*,
                    $name::Unknown(other) => other
                }
            }
        }
    }
}

enum_with_unknown! {
    /// Frame operation codes.
    pub enum Operation(u8) {
        /// Freeform text relayed to the receiver's log; no reply
        Message = 0,
        /// Tunable-parameter update; payload is [target, value_hi, value_lo]
        VariableUpdate = 1,
        /// Payload returned verbatim
        Echo = 2,
        /// Request for a status report; reply is a Message frame
        /// carrying a fixed 32-byte status payload
        StatusPoll = 3,
    }
}

enum_with_unknown! {
    /// Identifiers for the tunable parameters reachable over the wire.
    pub enum UpdateTarget(u8) {
        PidProportional = 0,
        PidIntegral = 1,
        PidDerivative = 2,
        LinearVelocityTarget = 3,
        AngularVelocityTarget = 4,
        /// Nonzero-is-true enable flag for the wheel motors
        MotorsEnabled = 5,
        /// Calibration angle in raw network units; the receiver converts
        /// via (raw - 128) / 10 before storage
        GyroOffset = 6,
    }
}
