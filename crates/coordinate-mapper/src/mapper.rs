//! Pixel/angle conversion

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationData, CalibrationPoint, CameraParams};
use crate::MapperError;

/// Maximum stored calibration points
pub const MAX_CALIBRATION_POINTS: usize = 4;

/// Pan/tilt angles (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServoAngles {
    pub pan_deg: f32,
    pub tilt_deg: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelCoord {
    pub x: f32,
    pub y: f32,
}

/// Mapper statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct MapperStats {
    pub map_count: u64,
    pub out_of_bounds_count: u64,
}

struct Inner {
    calibration: CalibrationData,
    points: Vec<CalibrationPoint>,
    stats: MapperStats,
}

/// Pixel to servo angle mapper.
///
/// Owns the calibration. It is loaded once at startup and only changes
/// through [`calibrate`](Self::calibrate) / [`compute_calibration`](Self::compute_calibration).
pub struct CoordinateMapper {
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
}

impl CoordinateMapper {
    /// Mapper with default calibration and no persistence
    pub fn new(camera: CameraParams) -> Self {
        Self::with_calibration(
            CalibrationData {
                camera,
                ..Default::default()
            },
            None,
        )
    }

    /// Load calibration from `path`, falling back to defaults
    pub fn load(path: impl AsRef<Path>, camera: CameraParams) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut calibration = CalibrationData::load_or_default(&path);
        if calibration.camera != camera {
            debug!("Camera parameters differ from calibration file, using live values");
            calibration.camera = camera;
        }
        Self::with_calibration(calibration, Some(path))
    }

    fn with_calibration(calibration: CalibrationData, path: Option<PathBuf>) -> Self {
        Self {
            path,
            inner: Mutex::new(Inner {
                calibration,
                points: Vec::with_capacity(MAX_CALIBRATION_POINTS),
                stats: MapperStats::default(),
            }),
        }
    }

    /// Map a pixel in a `frame_width` x `frame_height` frame to calibrated servo angles
    pub fn map_to_servo_angles(
        &self,
        x: f32,
        y: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Result<ServoAngles, MapperError> {
        if frame_width == 0 || frame_height == 0 {
            return Err(MapperError::InvalidFrame {
                width: frame_width,
                height: frame_height,
            });
        }

        let mut inner = self.lock()?;
        if x < 0.0 || y < 0.0 || x >= frame_width as f32 || y >= frame_height as f32 {
            inner.stats.out_of_bounds_count += 1;
            debug!("Pixel ({:.1}, {:.1}) outside {}x{} frame", x, y, frame_width, frame_height);
        }
        inner.stats.map_count += 1;

        let norm_x = x / frame_width as f32 - 0.5;
        let norm_y = y / frame_height as f32 - 0.5;
        Ok(apply(&inner.calibration, raw_angles(&inner.calibration.camera, norm_x, norm_y)))
    }

    /// Map a pixel in the camera's native resolution
    pub fn pixel_to_angle(&self, pixel: PixelCoord) -> Result<ServoAngles, MapperError> {
        let camera = self.camera()?;
        self.map_to_servo_angles(pixel.x, pixel.y, camera.width, camera.height)
    }

    /// Map a normalized `[0, 1]` frame position
    pub fn map_normalized(&self, x: f32, y: f32) -> Result<ServoAngles, MapperError> {
        let camera = self.camera()?;
        self.map_to_servo_angles(
            x * camera.width as f32,
            y * camera.height as f32,
            camera.width,
            camera.height,
        )
    }

    /// Inverse mapping, in the camera's native resolution
    pub fn angle_to_pixel(&self, angles: ServoAngles) -> Result<PixelCoord, MapperError> {
        let inner = self.lock()?;
        let cal = &inner.calibration;
        let raw_pan = (angles.pan_deg - cal.offset_pan_deg) / cal.scale_pan;
        let raw_tilt = (angles.tilt_deg - cal.offset_tilt_deg) / cal.scale_tilt;

        let norm_x = raw_pan / cal.camera.fov_h_deg;
        let norm_y = -raw_tilt / cal.camera.fov_v_deg;
        Ok(PixelCoord {
            x: (norm_x + 0.5) * cal.camera.width as f32,
            y: (norm_y + 0.5) * cal.camera.height as f32,
        })
    }

    /// Record a marker observation for the next [`compute_calibration`](Self::compute_calibration)
    pub fn add_point(&self, point: CalibrationPoint) -> Result<usize, MapperError> {
        let mut inner = self.lock()?;
        if inner.points.len() >= MAX_CALIBRATION_POINTS {
            return Err(MapperError::TooManyPoints(MAX_CALIBRATION_POINTS));
        }
        inner.points.push(point);
        Ok(inner.points.len())
    }

    pub fn clear_points(&self) -> Result<(), MapperError> {
        self.lock()?.points.clear();
        Ok(())
    }

    /// Derive offsets from the recorded points and persist them.
    ///
    /// `offset = measured - predicted` per axis, averaged over points, with
    /// unit scale.
    pub fn compute_calibration(&self) -> Result<CalibrationData, MapperError> {
        let calibration = {
            let mut inner = self.lock()?;
            if inner.points.is_empty() {
                warn!("Need at least 1 calibration point");
                return Err(MapperError::NoCalibrationPoints);
            }

            let camera = inner.calibration.camera;
            let count = inner.points.len() as f32;
            let (sum_pan, sum_tilt) = inner.points.iter().fold((0.0, 0.0), |(pan, tilt), p| {
                let norm_x = p.pixel_x / camera.width as f32 - 0.5;
                let norm_y = p.pixel_y / camera.height as f32 - 0.5;
                let predicted = raw_angles(&camera, norm_x, norm_y);
                (pan + p.pan_deg - predicted.pan_deg, tilt + p.tilt_deg - predicted.tilt_deg)
            });

            inner.calibration = CalibrationData {
                offset_pan_deg: sum_pan / count,
                offset_tilt_deg: sum_tilt / count,
                scale_pan: 1.0,
                scale_tilt: 1.0,
                timestamp: Some(Utc::now()),
                camera,
            };
            inner.points.clear();
            inner.calibration.clone()
        };

        info!(
            "Calibration computed: offset=({:.2}, {:.2})",
            calibration.offset_pan_deg, calibration.offset_tilt_deg
        );
        self.persist(&calibration)?;
        Ok(calibration)
    }

    /// One-shot calibration from a set of marker observations
    pub fn calibrate(&self, points: &[CalibrationPoint]) -> Result<CalibrationData, MapperError> {
        self.clear_points()?;
        for point in points {
            self.add_point(*point)?;
        }
        self.compute_calibration()
    }

    /// Back to zero offset and unit scale, persisted
    pub fn reset_calibration(&self) -> Result<(), MapperError> {
        let calibration = {
            let mut inner = self.lock()?;
            inner.calibration = CalibrationData {
                camera: inner.calibration.camera,
                ..Default::default()
            };
            inner.points.clear();
            inner.calibration.clone()
        };
        info!("Calibration reset to defaults");
        self.persist(&calibration)
    }

    pub fn calibration(&self) -> Result<CalibrationData, MapperError> {
        Ok(self.lock()?.calibration.clone())
    }

    pub fn camera(&self) -> Result<CameraParams, MapperError> {
        Ok(self.lock()?.calibration.camera)
    }

    pub fn stats(&self) -> Result<MapperStats, MapperError> {
        Ok(self.lock()?.stats.clone())
    }

    fn persist(&self, calibration: &CalibrationData) -> Result<(), MapperError> {
        match &self.path {
            Some(path) => calibration.save(path),
            None => Ok(()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, MapperError> {
        self.inner
            .lock()
            .map_err(|e| MapperError::Lock(format!("Lock error: {}", e)))
    }
}

/// Uncalibrated angles for a position normalized to `[-0.5, 0.5]`.
/// Right is positive pan, image-down is negative tilt.
fn raw_angles(camera: &CameraParams, norm_x: f32, norm_y: f32) -> ServoAngles {
    ServoAngles {
        pan_deg: norm_x * camera.fov_h_deg,
        tilt_deg: -norm_y * camera.fov_v_deg,
    }
}

fn apply(calibration: &CalibrationData, raw: ServoAngles) -> ServoAngles {
    ServoAngles {
        pan_deg: raw.pan_deg * calibration.scale_pan + calibration.offset_pan_deg,
        tilt_deg: raw.tilt_deg * calibration.scale_tilt + calibration.offset_tilt_deg,
    }
}
