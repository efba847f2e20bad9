//! PWM hardware seam

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ServoError;

/// Servo axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    Pan,
    Tilt,
}

impl Axis {
    fn index(self) -> usize {
        match self {
            Axis::Pan => 0,
            Axis::Tilt => 1,
        }
    }
}

/// Platform PWM output for the two servo channels.
///
/// Implementations exist per board (Pi hardware PWM, ESP32 LEDC); the
/// controller never branches on platform.
pub trait PwmDriver: Send {
    /// Command a pulse width on one channel
    fn set_pulse_us(&mut self, axis: Axis, pulse_us: u32) -> Result<(), ServoError>;

    /// Stop driving both channels
    fn disable(&mut self) -> Result<(), ServoError>;

    /// Whether the output stage is present and responding
    fn is_connected(&self) -> bool {
        true
    }

    /// Position feedback, if the hardware has any
    fn feedback_pulse_us(&self, _axis: Axis) -> Option<u32> {
        None
    }
}

#[derive(Debug, Default)]
struct MockState {
    pulses: Vec<(Axis, u32)>,
    last: [Option<u32>; 2],
    disconnected: bool,
    fail_writes: bool,
    stuck: Option<(Axis, u32)>,
    disabled: bool,
}

/// In-memory PWM stub.
///
/// Clones share state, so a test keeps one handle while the controller
/// owns another.
#[derive(Debug, Clone, Default)]
pub struct MockPwm {
    state: Arc<Mutex<MockState>>,
}

impl MockPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pulse written, in order
    pub fn pulses(&self) -> Vec<(Axis, u32)> {
        self.state.lock().map(|s| s.pulses.clone()).unwrap_or_default()
    }

    pub fn last_pulse(&self, axis: Axis) -> Option<u32> {
        self.state.lock().ok().and_then(|s| s.last[axis.index()])
    }

    pub fn is_disabled(&self) -> bool {
        self.state.lock().map(|s| s.disabled).unwrap_or(false)
    }

    /// Make subsequent writes fail
    pub fn inject_fault(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_writes = true;
        }
    }

    /// Report the output stage as unplugged
    pub fn disconnect(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.disconnected = true;
        }
    }

    /// Report a fixed feedback pulse on one axis regardless of commands
    pub fn stick_axis(&self, axis: Axis, pulse_us: u32) {
        if let Ok(mut s) = self.state.lock() {
            s.stuck = Some((axis, pulse_us));
        }
    }

    pub fn clear_faults(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.fail_writes = false;
            s.disconnected = false;
            s.stuck = None;
        }
    }
}

impl PwmDriver for MockPwm {
    fn set_pulse_us(&mut self, axis: Axis, pulse_us: u32) -> Result<(), ServoError> {
        let mut s = self
            .state
            .lock()
            .map_err(|e| ServoError::Lock(format!("Lock error: {}", e)))?;
        if s.fail_writes || s.disconnected {
            return Err(ServoError::Hardware(format!("{:?} channel write failed", axis)));
        }
        s.pulses.push((axis, pulse_us));
        s.last[axis.index()] = Some(pulse_us);
        s.disabled = false;
        Ok(())
    }

    fn disable(&mut self) -> Result<(), ServoError> {
        let mut s = self
            .state
            .lock()
            .map_err(|e| ServoError::Lock(format!("Lock error: {}", e)))?;
        s.disabled = true;
        debug!("Mock PWM disabled");
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state.lock().map(|s| !s.disconnected).unwrap_or(false)
    }

    fn feedback_pulse_us(&self, axis: Axis) -> Option<u32> {
        let s = self.state.lock().ok()?;
        match s.stuck {
            Some((stuck_axis, pulse)) if stuck_axis == axis => Some(pulse),
            _ => s.last[axis.index()],
        }
    }
}
