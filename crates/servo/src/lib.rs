//! Pan/Tilt Servo Control
//!
//! Drives the two PWM actuators that aim the laser:
//! - Per-axis clamping (tilt can never point above horizontal)
//! - Interpolated moves within a fixed time budget
//! - Fail-closed fault handling (refuses moves until re-initialized)
//!
//! Hardware access sits behind [`PwmDriver`]; [`MockPwm`] is the host stub.

mod config;
mod controller;
mod pwm;

pub use config::ServoConfig;
pub use controller::{FaultHook, ServoController, ServoPosition, ServoState, ServoStats};
pub use pwm::{Axis, MockPwm, PwmDriver};

use thiserror::Error;

/// Servo error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServoError {
    #[error("Servo controller not initialized")]
    NotInitialized,

    #[error("Servo outputs disabled")]
    Disabled,

    #[error("Servo faulted, re-initialization required")]
    Faulted,

    #[error("Hardware fault: {0}")]
    Hardware(String),

    #[error("Position not reached on {axis:?}: commanded {commanded}us, measured {measured}us")]
    PositionMismatch {
        axis: Axis,
        commanded: u32,
        measured: u32,
    },

    #[error("{0}")]
    Lock(String),
}
