//! Servo limits and timing

use serde::{Deserialize, Serialize};

use crate::pwm::Axis;

/// Servo configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServoConfig {
    /// Leftmost pan angle (degrees)
    pub pan_min_deg: f32,
    /// Rightmost pan angle (degrees)
    pub pan_max_deg: f32,
    /// Lowest tilt angle (degrees, negative is down)
    pub tilt_min_deg: f32,
    /// Highest tilt angle (degrees). Must not exceed 0.
    pub tilt_max_deg: f32,
    /// Pulse width at the minimum angle (microseconds)
    pub pulse_min_us: u32,
    /// Pulse width at the maximum angle (microseconds)
    pub pulse_max_us: u32,
    /// PWM frequency (Hz)
    pub pwm_frequency_hz: u32,
    /// Time budget for one interpolated move (milliseconds)
    pub move_time_ms: u64,
    /// Interpolation step period (milliseconds)
    pub step_interval_ms: u64,
    /// Half-width of the init self-test sweep (degrees)
    pub self_test_range_deg: f32,
    /// Allowed feedback error before a move counts as missed (microseconds)
    pub feedback_tolerance_us: u32,
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self {
            pan_min_deg: -45.0,
            pan_max_deg: 45.0,
            tilt_min_deg: -30.0,
            tilt_max_deg: 0.0,
            pulse_min_us: 500,
            pulse_max_us: 2500,
            pwm_frequency_hz: 50,
            move_time_ms: 45,
            step_interval_ms: 5,
            self_test_range_deg: 5.0,
            feedback_tolerance_us: 10,
        }
    }
}

impl ServoConfig {
    /// Jump straight to the target with no interpolation delay (bench rigs)
    pub fn immediate() -> Self {
        Self {
            move_time_ms: 0,
            step_interval_ms: 0,
            ..Default::default()
        }
    }

    pub fn limits(&self, axis: Axis) -> (f32, f32) {
        match axis {
            Axis::Pan => (self.pan_min_deg, self.pan_max_deg),
            // Never allow a configured ceiling above horizontal
            Axis::Tilt => (self.tilt_min_deg, self.tilt_max_deg.min(0.0)),
        }
    }

    /// Clamp an angle into the axis range
    pub fn clamp(&self, axis: Axis, angle_deg: f32) -> f32 {
        let (min, max) = self.limits(axis);
        if angle_deg.is_nan() {
            return (min + max) / 2.0;
        }
        angle_deg.max(min).min(max)
    }

    /// Center of both axes
    pub fn home(&self) -> (f32, f32) {
        let (pan_min, pan_max) = self.limits(Axis::Pan);
        let (tilt_min, tilt_max) = self.limits(Axis::Tilt);
        ((pan_min + pan_max) / 2.0, (tilt_min + tilt_max) / 2.0)
    }

    /// Linear angle to pulse-width mapping over the axis range
    pub fn angle_to_pulse(&self, axis: Axis, angle_deg: f32) -> u32 {
        let (min, max) = self.limits(axis);
        let normalized = (self.clamp(axis, angle_deg) - min) / (max - min);
        let span = (self.pulse_max_us - self.pulse_min_us) as f32;
        self.pulse_min_us + (normalized * span).round() as u32
    }

    /// Inverse of [`angle_to_pulse`](Self::angle_to_pulse)
    pub fn pulse_to_angle(&self, axis: Axis, pulse_us: u32) -> f32 {
        let (min, max) = self.limits(axis);
        let pulse = pulse_us.clamp(self.pulse_min_us, self.pulse_max_us);
        let normalized =
            (pulse - self.pulse_min_us) as f32 / (self.pulse_max_us - self.pulse_min_us) as f32;
        min + normalized * (max - min)
    }

    /// Number of interpolation steps per move, at least one
    pub fn steps_per_move(&self) -> u64 {
        if self.step_interval_ms == 0 {
            return 1;
        }
        (self.move_time_ms / self.step_interval_ms).max(1)
    }
}
