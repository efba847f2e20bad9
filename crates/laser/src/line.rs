//! GPIO seam for the laser MOSFET gate

use std::sync::{Arc, Mutex};

use crate::LaserError;

/// Output line driving the laser
pub trait LaserLine: Send {
    fn set(&mut self, on: bool) -> Result<(), LaserError>;
}

#[derive(Debug, Default)]
struct LineState {
    on: bool,
    transitions: Vec<bool>,
    fail: bool,
}

/// Recording stub; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockLaserLine {
    state: Arc<Mutex<LineState>>,
}

impl MockLaserLine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_on(&self) -> bool {
        self.state.lock().map(|s| s.on).unwrap_or(false)
    }

    /// Every level written, in order
    pub fn transitions(&self) -> Vec<bool> {
        self.state.lock().map(|s| s.transitions.clone()).unwrap_or_default()
    }

    /// Make the next writes that turn the line on fail
    pub fn inject_fault(&self) {
        if let Ok(mut s) = self.state.lock() {
            s.fail = true;
        }
    }
}

impl LaserLine for MockLaserLine {
    fn set(&mut self, on: bool) -> Result<(), LaserError> {
        let mut s = self
            .state
            .lock()
            .map_err(|e| LaserError::Lock(format!("Lock error: {}", e)))?;
        // Turning off always works so the fail-closed path stays testable
        if on && s.fail {
            return Err(LaserError::Gpio("write failed".to_string()));
        }
        s.on = on;
        s.transitions.push(on);
        Ok(())
    }
}
