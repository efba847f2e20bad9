//! Camera to Servo Coordinate Mapping
//!
//! Converts a detection centroid in pixels into pan/tilt angles by linear
//! interpolation across the camera field of view, then applies the
//! calibration that corrects for the camera/laser offset.
//!
//! The correction is a fixed angular offset and scale, accurate near the
//! distance the unit was calibrated at. It is not a distance-aware 3-D
//! parallax model.

mod calibration;
mod mapper;

pub use calibration::{CalibrationData, CalibrationPoint, CameraParams, CALIBRATION_PATH};
pub use mapper::{CoordinateMapper, MapperStats, PixelCoord, ServoAngles, MAX_CALIBRATION_POINTS};

use thiserror::Error;

/// Mapper error types
#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Invalid frame dimensions: {width}x{height}")]
    InvalidFrame { width: u32, height: u32 },

    #[error("Calibration needs at least one point")]
    NoCalibrationPoints,

    #[error("Calibration point limit ({0}) reached")]
    TooManyPoints(usize),

    #[error("Calibration file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Calibration format error: {0}")]
    Format(#[from] serde_json::Error),

    #[error("{0}")]
    Lock(String),
}
