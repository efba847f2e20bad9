//! Targeting Engine
//!
//! Turns detections into laser aim:
//! - Largest-target selection per detection cycle
//! - Acquire, then track with a horizontal sweep around the target
//! - Release after a grace window without detections
//! - Latched ERROR on servo faults (laser forced off until reset)

mod config;
mod detection;
mod engine;
mod worker;

pub use config::TargetingConfig;
pub use detection::{Detection, DetectionFrame};
pub use engine::{SweepState, TargetingEngine, TargetingState, TargetingStats};
pub use worker::DetectionWorker;

use thiserror::Error;

/// Targeting error types
#[derive(Error, Debug)]
pub enum TargetingError {
    #[error("Servo error: {0}")]
    Servo(#[from] servo::ServoError),

    #[error("Mapping error: {0}")]
    Mapping(#[from] coordinate_mapper::MapperError),

    #[error("Laser error: {0}")]
    Laser(#[from] laser::LaserError),

    #[error("Invalid parameter: {0}")]
    InvalidParam(String),

    #[error("Failed to spawn worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("{0}")]
    Lock(String),
}
