//! Priority table and pattern rendering

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Status reasons, lowest priority first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LedState {
    Off,
    Boot,
    Disarmed,
    Armed,
    Offline,
    Detection,
    Error,
}

/// RGB color
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LedColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl LedColor {
    pub const OFF: LedColor = LedColor::rgb(0, 0, 0);
    pub const RED: LedColor = LedColor::rgb(255, 0, 0);
    pub const GREEN: LedColor = LedColor::rgb(0, 255, 0);
    pub const BLUE: LedColor = LedColor::rgb(0, 0, 255);
    pub const YELLOW: LedColor = LedColor::rgb(255, 255, 0);
    pub const ORANGE: LedColor = LedColor::rgb(255, 128, 0);
    pub const WHITE: LedColor = LedColor::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    pub fn is_off(&self) -> bool {
        *self == Self::OFF
    }
}

/// How a reason is shown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pattern {
    Off,
    Solid(LedColor),
    /// Color for `on_ms` of every `period_ms`, dark otherwise
    Blink { color: LedColor, period_ms: u64, on_ms: u64 },
    /// Triangle fade in and out over `period_ms`
    Breathe { color: LedColor, period_ms: u64 },
    /// Short blip of `color` every `period_ms` over the base pattern
    Overlay { color: LedColor, period_ms: u64, on_ms: u64 },
}

impl Pattern {
    pub fn for_state(state: LedState) -> Pattern {
        match state {
            LedState::Off => Pattern::Off,
            LedState::Boot => Pattern::Breathe {
                color: LedColor::BLUE,
                period_ms: 2000,
            },
            LedState::Disarmed => Pattern::Solid(LedColor::YELLOW),
            LedState::Armed => Pattern::Solid(LedColor::GREEN),
            LedState::Offline => Pattern::Overlay {
                color: LedColor::ORANGE,
                period_ms: 4000,
                on_ms: 100,
            },
            LedState::Detection => Pattern::Solid(LedColor::WHITE),
            LedState::Error => Pattern::Blink {
                color: LedColor::RED,
                period_ms: 1000,
                on_ms: 500,
            },
        }
    }

    /// Color at `elapsed_ms` into the pattern. Overlays render their base as dark.
    pub fn color_at(&self, elapsed_ms: u64) -> LedColor {
        match *self {
            Pattern::Off => LedColor::OFF,
            Pattern::Solid(color) => color,
            Pattern::Blink {
                color,
                period_ms,
                on_ms,
            }
            | Pattern::Overlay {
                color,
                period_ms,
                on_ms,
            } => {
                if elapsed_ms % period_ms.max(1) < on_ms {
                    color
                } else {
                    LedColor::OFF
                }
            }
            Pattern::Breathe { color, period_ms } => {
                let period = period_ms.max(2);
                let half = period / 2;
                let pos = elapsed_ms % period;
                let level = if pos < half { pos } else { period - pos };
                let scale = |c: u8| ((c as u64 * level) / half).min(255) as u8;
                LedColor::rgb(scale(color.r), scale(color.g), scale(color.b))
            }
        }
    }
}

/// The set of currently-true status reasons.
///
/// DETECTION carries its own expiry so it clears without a `clear` call.
#[derive(Debug, Clone, Default)]
pub struct ActiveReasons {
    states: BTreeSet<LedState>,
    detection_until: Option<Instant>,
}

impl ActiveReasons {
    pub fn set(&mut self, state: LedState) {
        if state != LedState::Off {
            self.states.insert(state);
        }
    }

    pub fn clear(&mut self, state: LedState) {
        self.states.remove(&state);
        if state == LedState::Detection {
            self.detection_until = None;
        }
    }

    /// Timed DETECTION reason
    pub fn flash_detection(&mut self, now: Instant, duration: Duration) {
        self.states.insert(LedState::Detection);
        self.detection_until = Some(now + duration);
    }

    /// Drop the detection reason once its flash ran out
    pub fn expire(&mut self, now: Instant) {
        if let Some(until) = self.detection_until {
            if now >= until {
                self.states.remove(&LedState::Detection);
                self.detection_until = None;
            }
        }
    }

    pub fn contains(&self, state: LedState) -> bool {
        self.states.contains(&state)
    }

    /// Highest-priority reason set, OFF if none
    pub fn highest(&self) -> LedState {
        self.states.iter().next_back().copied().unwrap_or(LedState::Off)
    }

    /// Highest reason that is not an overlay
    fn base(&self) -> LedState {
        self.states
            .iter()
            .rev()
            .copied()
            .find(|s| *s != LedState::Offline)
            .unwrap_or(LedState::Off)
    }

    /// Color to show `elapsed_ms` after the renderer started
    pub fn render(&self, elapsed_ms: u64) -> LedColor {
        let base = self.base();
        let base_color = Pattern::for_state(base).color_at(elapsed_ms);

        // Offline only modulates the steady states beneath it
        if self.contains(LedState::Offline) && base < LedState::Offline {
            let overlay = Pattern::for_state(LedState::Offline);
            let blip = overlay.color_at(elapsed_ms);
            if !blip.is_off() {
                return blip;
            }
        }
        base_color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(LedState::Error > LedState::Detection);
        assert!(LedState::Detection > LedState::Offline);
        assert!(LedState::Offline > LedState::Armed);
        assert!(LedState::Armed > LedState::Disarmed);
        assert!(LedState::Disarmed > LedState::Boot);
    }

    #[test]
    fn test_error_masks_armed() {
        let mut reasons = ActiveReasons::default();
        reasons.set(LedState::Armed);
        reasons.set(LedState::Error);

        assert_eq!(reasons.highest(), LedState::Error);
        assert_eq!(reasons.render(100), LedColor::RED);
        assert_eq!(reasons.render(600), LedColor::OFF);

        reasons.clear(LedState::Error);
        assert_eq!(reasons.highest(), LedState::Armed);
        assert_eq!(reasons.render(100), LedColor::GREEN);
        assert_eq!(reasons.render(600), LedColor::GREEN);
    }

    #[test]
    fn test_offline_overlays_base() {
        let mut reasons = ActiveReasons::default();
        reasons.set(LedState::Disarmed);
        reasons.set(LedState::Offline);

        assert_eq!(reasons.highest(), LedState::Offline);
        assert_eq!(reasons.render(50), LedColor::ORANGE);
        assert_eq!(reasons.render(2000), LedColor::YELLOW);
        assert_eq!(reasons.render(4050), LedColor::ORANGE);

        // Error is not modulated
        reasons.set(LedState::Error);
        assert_eq!(reasons.render(50), LedColor::RED);
        assert_eq!(reasons.render(4600), LedColor::OFF);
    }

    #[test]
    fn test_detection_expires() {
        let mut reasons = ActiveReasons::default();
        reasons.set(LedState::Armed);
        let t0 = Instant::now();
        reasons.flash_detection(t0, Duration::from_millis(200));
        assert_eq!(reasons.render(0), LedColor::WHITE);

        reasons.expire(t0 + Duration::from_millis(199));
        assert!(reasons.contains(LedState::Detection));
        reasons.expire(t0 + Duration::from_millis(200));
        assert!(!reasons.contains(LedState::Detection));
        assert_eq!(reasons.render(0), LedColor::GREEN);
    }

    #[test]
    fn test_boot_breathes() {
        let mut reasons = ActiveReasons::default();
        reasons.set(LedState::Boot);
        assert_eq!(reasons.render(0), LedColor::OFF);
        assert_eq!(reasons.render(1000), LedColor::BLUE);
        assert_eq!(reasons.render(500).b, 127);
        assert_eq!(reasons.render(1500).b, 127);
    }

    #[test]
    fn test_nothing_set_is_off() {
        let reasons = ActiveReasons::default();
        assert_eq!(reasons.highest(), LedState::Off);
        assert_eq!(reasons.render(123), LedColor::OFF);
    }
}
