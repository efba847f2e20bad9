//! Laser controller

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::line::LaserLine;
use crate::LaserError;

/// Laser timing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaserLimits {
    /// Config kill for the whole laser subsystem
    pub enabled: bool,
    /// Maximum continuous on-time (milliseconds)
    pub max_on_time_ms: u64,
    /// Off-time enforced after each activation (milliseconds)
    pub cooldown_ms: u64,
}

impl Default for LaserLimits {
    fn default() -> Self {
        Self {
            enabled: true,
            max_on_time_ms: 10_000,
            cooldown_ms: 5_000,
        }
    }
}

impl LaserLimits {
    pub fn from_seconds(enabled: bool, max_on_secs: u32, cooldown_secs: u32) -> Self {
        Self {
            enabled,
            max_on_time_ms: max_on_secs as u64 * 1000,
            cooldown_ms: cooldown_secs as u64 * 1000,
        }
    }
}

/// Laser state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LaserState {
    Off,
    Armed,
    Active,
    Cooldown,
    EmergencyStop,
    Error,
}

/// Laser statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct LaserStats {
    pub activation_count: u64,
    pub safety_timeout_count: u64,
    pub cooldown_block_count: u64,
    pub kill_switch_count: u64,
    pub total_on_time_ms: u64,
}

struct Inner {
    line: Box<dyn LaserLine>,
    limits: LaserLimits,
    state: LaserState,
    armed: bool,
    kill_switch: bool,
    activated_at: Option<Instant>,
    cooldown_until: Option<Instant>,
    stats: LaserStats,
}

impl Inner {
    fn resting_state(&self) -> LaserState {
        if self.kill_switch {
            LaserState::EmergencyStop
        } else if self.armed {
            LaserState::Armed
        } else {
            LaserState::Off
        }
    }

    /// Drop the line and record on-time. Returns how long it was on.
    fn turn_off(&mut self, now: Instant) -> Option<Duration> {
        if let Err(e) = self.line.set(false) {
            error!("Failed to drive laser line low: {}", e);
        }
        let on_for = self.activated_at.take().map(|at| now.saturating_duration_since(at))?;
        self.stats.total_on_time_ms += on_for.as_millis() as u64;
        self.cooldown_until = Some(now + Duration::from_millis(self.limits.cooldown_ms));
        Some(on_for)
    }
}

/// Laser controller.
///
/// The only path to the laser line. Every transition to on goes through
/// the arming, cooldown and kill-switch checks; every path to off is
/// unconditional.
pub struct LaserController {
    inner: Mutex<Inner>,
}

impl LaserController {
    pub fn new(limits: LaserLimits, line: Box<dyn LaserLine>) -> Self {
        let mut line = line;
        if let Err(e) = line.set(false) {
            warn!("Could not drive laser line low at startup: {}", e);
        }
        Self {
            inner: Mutex::new(Inner {
                line,
                limits,
                state: LaserState::Off,
                armed: false,
                kill_switch: false,
                activated_at: None,
                cooldown_until: None,
                stats: LaserStats::default(),
            }),
        }
    }

    pub fn arm(&self) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        if inner.kill_switch {
            warn!("Cannot arm: kill switch engaged");
            return Err(LaserError::KillSwitch);
        }
        if inner.state == LaserState::Error {
            warn!("Cannot arm: laser in error state");
            return Err(LaserError::Fault("reset required".to_string()));
        }
        if !inner.armed {
            inner.armed = true;
            if inner.state == LaserState::Off {
                inner.state = LaserState::Armed;
            }
            info!("Laser armed");
        }
        Ok(())
    }

    /// Disarm and force the line off
    pub fn disarm(&self) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        inner.armed = false;
        inner.turn_off(Instant::now());
        if !matches!(inner.state, LaserState::Error | LaserState::EmergencyStop) {
            inner.state = LaserState::Off;
        }
        info!("Laser disarmed");
        Ok(())
    }

    pub fn is_armed(&self) -> bool {
        self.lock().map(|inner| inner.armed).unwrap_or(false)
    }

    pub fn on(&self) -> Result<(), LaserError> {
        self.on_at(Instant::now())
    }

    /// Turn the laser on if every safety condition allows it
    pub fn on_at(&self, now: Instant) -> Result<(), LaserError> {
        let mut inner = self.lock()?;

        if inner.state == LaserState::Active {
            return Ok(());
        }
        if inner.state == LaserState::Error {
            return Err(LaserError::Fault("reset required".to_string()));
        }
        if inner.kill_switch {
            return Err(LaserError::KillSwitch);
        }
        if !inner.limits.enabled {
            return Err(LaserError::Disabled);
        }
        if !inner.armed {
            return Err(LaserError::NotArmed);
        }
        if let Some(until) = inner.cooldown_until {
            if now < until {
                inner.stats.cooldown_block_count += 1;
                let remaining = until.saturating_duration_since(now).as_millis() as u64;
                debug!("Laser blocked by cooldown ({} ms left)", remaining);
                return Err(LaserError::Cooldown(remaining));
            }
        }

        if let Err(e) = inner.line.set(true) {
            inner.state = LaserState::Error;
            let _ = inner.line.set(false);
            error!("Laser line fault: {}", e);
            return Err(e);
        }

        inner.activated_at = Some(now);
        inner.cooldown_until = None;
        inner.state = LaserState::Active;
        inner.stats.activation_count += 1;
        metrics::counter!("laser_activations_total").increment(1);
        debug!("Laser on");
        Ok(())
    }

    pub fn off(&self) -> Result<(), LaserError> {
        self.off_at(Instant::now())
    }

    /// Turn the laser off, entering cooldown if it was on
    pub fn off_at(&self, now: Instant) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        if inner.state != LaserState::Active {
            let _ = inner.line.set(false);
            return Ok(());
        }
        if let Some(on_for) = inner.turn_off(now) {
            debug!("Laser off after {} ms", on_for.as_millis());
        }
        inner.state = if inner.armed && !inner.kill_switch {
            LaserState::Cooldown
        } else {
            inner.resting_state()
        };
        Ok(())
    }

    /// Fail-closed path used by fault handlers: never refuses, never blocks on state
    pub fn force_off(&self, reason: &str) {
        match self.inner.lock() {
            Ok(mut inner) => {
                inner.turn_off(Instant::now());
                inner.state = LaserState::Error;
                error!("Laser forced off: {}", reason);
            }
            Err(poisoned) => {
                let mut inner = poisoned.into_inner();
                let _ = inner.line.set(false);
                inner.state = LaserState::Error;
                error!("Laser forced off (poisoned lock): {}", reason);
            }
        }
    }

    /// Leave the error state after the fault was dealt with
    pub fn reset_error(&self) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        if inner.state == LaserState::Error {
            inner.state = inner.resting_state();
            info!("Laser error cleared");
        }
        Ok(())
    }

    pub fn kill_switch(&self) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        inner.turn_off(Instant::now());
        inner.kill_switch = true;
        inner.armed = false;
        inner.state = LaserState::EmergencyStop;
        inner.stats.kill_switch_count += 1;
        warn!("Laser kill switch engaged");
        Ok(())
    }

    pub fn reset_kill_switch(&self) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        if inner.kill_switch {
            inner.kill_switch = false;
            inner.state = LaserState::Off;
            info!("Laser kill switch reset (unit remains disarmed)");
        }
        Ok(())
    }

    pub fn update(&self) -> Result<(), LaserError> {
        self.update_at(Instant::now())
    }

    /// Enforce the on-time limit and expire cooldowns
    pub fn update_at(&self, now: Instant) -> Result<(), LaserError> {
        let mut inner = self.lock()?;

        if let Some(at) = inner.activated_at {
            let elapsed = now.saturating_duration_since(at);
            if elapsed >= Duration::from_millis(inner.limits.max_on_time_ms) {
                warn!("Safety timeout: laser on for {} ms, forcing off", elapsed.as_millis());
                inner.turn_off(now);
                inner.stats.safety_timeout_count += 1;
                inner.state = LaserState::Cooldown;
            }
        }

        if inner.state == LaserState::Cooldown {
            let expired = inner.cooldown_until.map_or(true, |until| now >= until);
            if expired {
                inner.state = inner.resting_state();
            }
        }
        Ok(())
    }

    /// Apply new limits from the runtime config
    pub fn set_limits(&self, limits: LaserLimits) -> Result<(), LaserError> {
        let mut inner = self.lock()?;
        if !limits.enabled && inner.state == LaserState::Active {
            inner.turn_off(Instant::now());
            inner.state = inner.resting_state();
        }
        debug!("Laser limits updated: {:?}", limits);
        inner.limits = limits;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.lock()
            .map(|inner| inner.state == LaserState::Active)
            .unwrap_or(false)
    }

    pub fn state(&self) -> Result<LaserState, LaserError> {
        Ok(self.lock()?.state)
    }

    pub fn stats(&self) -> Result<LaserStats, LaserError> {
        Ok(self.lock()?.stats.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, LaserError> {
        self.inner
            .lock()
            .map_err(|e| LaserError::Lock(format!("Lock error: {}", e)))
    }
}
