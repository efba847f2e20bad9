//! Laser Enable Line
//!
//! Safety wrapper around the single GPIO that powers the deterrent laser:
//! - Fires only while armed and not cooling down
//! - Forced off after a maximum continuous on-time
//! - Kill switch and fault states that fail closed

mod controller;
mod line;

pub use controller::{LaserController, LaserLimits, LaserState, LaserStats};
pub use line::{LaserLine, MockLaserLine};

use thiserror::Error;

/// Laser error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaserError {
    #[error("Unit is not armed")]
    NotArmed,

    #[error("Laser disabled in configuration")]
    Disabled,

    #[error("Cooling down for another {0} ms")]
    Cooldown(u64),

    #[error("Kill switch engaged")]
    KillSwitch,

    #[error("Laser in error state: {0}")]
    Fault(String),

    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("{0}")]
    Lock(String),
}
