//! Calibration data and persistence

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::MapperError;

/// Default calibration file location
pub const CALIBRATION_PATH: &str = "/data/apis/calibration.json";

/// Camera geometry
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraParams {
    pub width: u32,
    pub height: u32,
    /// Horizontal field of view (degrees)
    pub fov_h_deg: f32,
    /// Vertical field of view (degrees)
    pub fov_v_deg: f32,
}

impl Default for CameraParams {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            fov_h_deg: 60.0,
            fov_v_deg: 45.0,
        }
    }
}

/// Persisted calibration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationData {
    pub offset_pan_deg: f32,
    pub offset_tilt_deg: f32,
    pub scale_pan: f32,
    pub scale_tilt: f32,
    /// When the calibration was computed, `None` for defaults
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub camera: CameraParams,
}

impl Default for CalibrationData {
    fn default() -> Self {
        Self {
            offset_pan_deg: 0.0,
            offset_tilt_deg: 0.0,
            scale_pan: 1.0,
            scale_tilt: 1.0,
            timestamp: None,
            camera: CameraParams::default(),
        }
    }
}

/// One marker observation: where the laser physically hit, and where the
/// operator clicked in the camera view
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub pixel_x: f32,
    pub pixel_y: f32,
    pub pan_deg: f32,
    pub tilt_deg: f32,
}

impl CalibrationData {
    pub fn is_calibrated(&self) -> bool {
        self.timestamp.is_some()
    }

    /// Replace non-positive or non-finite scales with unity
    fn sanitized(mut self) -> Self {
        if !(self.scale_pan.is_finite() && self.scale_pan > 0.0) {
            warn!("Invalid pan scale {}, using 1.0", self.scale_pan);
            self.scale_pan = 1.0;
        }
        if !(self.scale_tilt.is_finite() && self.scale_tilt > 0.0) {
            warn!("Invalid tilt scale {}, using 1.0", self.scale_tilt);
            self.scale_tilt = 1.0;
        }
        if !self.offset_pan_deg.is_finite() {
            self.offset_pan_deg = 0.0;
        }
        if !self.offset_tilt_deg.is_finite() {
            self.offset_tilt_deg = 0.0;
        }
        self
    }

    /// Load from disk. Missing or malformed files yield defaults.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(data) => {
                info!(
                    "Loaded calibration: offset=({:.2}, {:.2}) scale=({:.2}, {:.2})",
                    data.offset_pan_deg, data.offset_tilt_deg, data.scale_pan, data.scale_tilt
                );
                data
            }
            Err(MapperError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("No calibration at {}, using defaults (aim will be less accurate)", path.display());
                Self::default()
            }
            Err(e) => {
                warn!("Calibration at {} unusable ({}), using defaults", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self, MapperError> {
        let raw = std::fs::read_to_string(path)?;
        let data: CalibrationData = serde_json::from_str(&raw)?;
        Ok(data.sanitized())
    }

    /// Write atomically (temp file then rename)
    pub fn save(&self, path: &Path) -> Result<(), MapperError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        debug!("Calibration saved to {}", path.display());
        Ok(())
    }
}
