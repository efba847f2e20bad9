//! Status LED
//!
//! Several conditions can be true at once (armed, offline, error, ...).
//! Callers set and clear those reasons; a background loop renders the one
//! pattern the highest-priority reason calls for.

mod controller;
mod output;
mod pattern;

pub use controller::{LedConfig, LedController};
pub use output::{LedOutput, LogLed, RecordingLed};
pub use pattern::{ActiveReasons, LedColor, LedState, Pattern};

use thiserror::Error;

/// LED error types
#[derive(Error, Debug)]
pub enum LedError {
    #[error("LED output error: {0}")]
    Output(String),

    #[error("Failed to spawn render thread: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0}")]
    Lock(String),
}
