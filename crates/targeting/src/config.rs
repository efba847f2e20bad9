//! Targeting configuration

use serde::{Deserialize, Serialize};

/// Targeting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetingConfig {
    /// Sweep half-width around the target (degrees, 0 to 45)
    pub sweep_amplitude_deg: f32,
    /// Sweep rate (Hz, 0.5 to 5)
    pub sweep_frequency_hz: f32,
    /// Grace window before a silent target counts as lost (milliseconds)
    pub lost_timeout_ms: u64,
    /// Smallest bounding box that can be a target (square pixels)
    pub min_target_area_px: f32,
    /// Tracking tick period (milliseconds)
    pub tick_ms: u64,
    /// Fastest the sweep center follows a moved target (degrees per second)
    pub recenter_rate_deg_s: f32,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            sweep_amplitude_deg: 10.0,
            sweep_frequency_hz: 2.0,
            lost_timeout_ms: 500,
            min_target_area_px: 100.0,
            tick_ms: 20,
            recenter_rate_deg_s: 90.0,
        }
    }
}

pub const SWEEP_AMPLITUDE_RANGE: (f32, f32) = (0.0, 45.0);
pub const SWEEP_FREQUENCY_RANGE: (f32, f32) = (0.5, 5.0);
