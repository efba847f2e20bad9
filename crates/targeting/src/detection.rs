//! Detections from the vision pipeline

use std::time::Instant;

/// One detected object, bounding box in pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
    pub timestamp: Instant,
}

impl Detection {
    pub fn new(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence,
            timestamp: Instant::now(),
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    /// Center of the bounding box
    pub fn centroid(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// All detections from one processed camera frame
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFrame {
    pub detections: Vec<Detection>,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl DetectionFrame {
    pub fn new(detections: Vec<Detection>, frame_width: u32, frame_height: u32) -> Self {
        Self {
            detections,
            frame_width,
            frame_height,
        }
    }
}
