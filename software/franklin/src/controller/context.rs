//! Information about the current op that is shared with the controller's
//! worker threads.

use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};

use serde::{Deserialize, Serialize};

use crate::motor::STEPS_PER_REV;

/// Operation context.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[non_exhaustive]
pub struct ControllerCtx {
    /// Control cycle period in nanoseconds
    pub dt_ns: u32,

    /// TCP port for the tuning server
    pub server_port: u16,

    /// Steps per motor revolution, microstepping included
    pub steps_per_rev: f64,

    /// Ceiling on any bounded lock wait in the control context. Past this,
    /// the cycle proceeds on its last cached state instead of stalling.
    pub lock_wait: Duration,

    /// A name for this controller op, used to name the log file
    pub op_name: String,

    /// A directory to place log output
    pub op_dir: PathBuf,
}

impl Default for ControllerCtx {
    fn default() -> Self {
        // Use current time with seconds as op name and use working directory
        // as op dir, replacing characters in the name that would be invalid
        // on Windows.
        let op_name = DateTime::<Utc>::from(SystemTime::now())
            .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
            .replace(":", "");
        Self {
            dt_ns: 10_000_000,
            server_port: franklin_shared::SERVER_PORT,
            steps_per_rev: STEPS_PER_REV,
            lock_wait: Duration::from_millis(200),
            op_name,
            op_dir: std::fs::canonicalize("./").unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctx_serde_round_trip() {
        let ctx = ControllerCtx::default();
        let serialized = serde_json::to_string(&ctx).unwrap();
        let deserialized = serde_json::from_str::<ControllerCtx>(&serialized).unwrap();
        let reserialized = serde_json::to_string(&deserialized).unwrap();
        assert_eq!(serialized, reserialized);
    }
}
