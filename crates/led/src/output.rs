//! LED hardware seam

use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::pattern::{LedColor, LedState};
use crate::LedError;

/// Platform LED driver (RGB GPIO, PWM-dimmed RGB, single LED)
pub trait LedOutput: Send {
    fn set_color(&mut self, color: LedColor) -> Result<(), LedError>;

    /// Notified when the highest-priority reason changes
    fn state_changed(&mut self, _state: LedState) {}
}

#[derive(Debug, Default)]
struct Recorded {
    colors: Vec<LedColor>,
    states: Vec<LedState>,
}

/// Stub that records what would have been shown; clones share the record
#[derive(Debug, Clone, Default)]
pub struct RecordingLed {
    record: Arc<Mutex<Recorded>>,
}

impl RecordingLed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn colors(&self) -> Vec<LedColor> {
        self.record.lock().map(|r| r.colors.clone()).unwrap_or_default()
    }

    pub fn last_color(&self) -> Option<LedColor> {
        self.record.lock().ok().and_then(|r| r.colors.last().copied())
    }

    /// Highest-priority state after every change, in order
    pub fn transitions(&self) -> Vec<LedState> {
        self.record.lock().map(|r| r.states.clone()).unwrap_or_default()
    }
}

impl LedOutput for RecordingLed {
    fn set_color(&mut self, color: LedColor) -> Result<(), LedError> {
        let mut record = self
            .record
            .lock()
            .map_err(|e| LedError::Lock(format!("Lock error: {}", e)))?;
        // Only changes are interesting
        if record.colors.last() != Some(&color) {
            record.colors.push(color);
        }
        Ok(())
    }

    fn state_changed(&mut self, state: LedState) {
        if let Ok(mut record) = self.record.lock() {
            record.states.push(state);
        }
    }
}

/// Output for hosts without an LED: logs state changes
#[derive(Debug, Default)]
pub struct LogLed {
    last: Option<LedColor>,
}

impl LedOutput for LogLed {
    fn set_color(&mut self, color: LedColor) -> Result<(), LedError> {
        if self.last != Some(color) {
            debug!("LED color ({}, {}, {})", color.r, color.g, color.b);
            self.last = Some(color);
        }
        Ok(())
    }

    fn state_changed(&mut self, state: LedState) {
        info!("LED state: {:?}", state);
    }
}
