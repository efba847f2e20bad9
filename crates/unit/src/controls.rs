//! Arming, emergency stop and fault reset

use std::sync::Arc;

use anyhow::anyhow;
use laser::{LaserController, LaserState};
use led::{LedController, LedState};
use targeting::{TargetingEngine, TargetingState};
use tracing::{info, warn};
use unit_config::ConfigStore;

use crate::button::ButtonEvent;

/// Operator-facing safety actions shared by the heartbeat, the arm
/// button and startup
pub struct UnitControls {
    config: Arc<ConfigStore>,
    laser: Arc<LaserController>,
    led: Arc<LedController>,
    targeting: Arc<TargetingEngine>,
}

impl UnitControls {
    pub fn new(
        config: Arc<ConfigStore>,
        laser: Arc<LaserController>,
        led: Arc<LedController>,
        targeting: Arc<TargetingEngine>,
    ) -> Self {
        Self {
            config,
            laser,
            led,
            targeting,
        }
    }

    /// A latched fault that only [`UnitControls::reset_fault`] clears
    pub fn in_safe_mode(&self) -> bool {
        let laser_fault = self
            .laser
            .state()
            .map_or(true, |state| state == LaserState::Error);
        let targeting_fault = self
            .targeting
            .state()
            .map_or(true, |state| state == TargetingState::Error);
        laser_fault || targeting_fault
    }

    pub fn is_emergency_stopped(&self) -> bool {
        matches!(self.laser.state(), Ok(LaserState::EmergencyStop))
    }

    /// Arm or disarm the laser, persist the flag and update the LED.
    /// Arming is refused in safe mode.
    pub fn apply_armed(&self, armed: bool) -> anyhow::Result<()> {
        if armed {
            let refused = if self.in_safe_mode() {
                Err(anyhow!("system is in safe mode, manual reset required"))
            } else {
                self.laser.arm().map_err(anyhow::Error::from)
            };
            if let Err(e) = refused {
                warn!("Cannot arm: {}", e);
                self.led.clear_state(LedState::Armed);
                self.led.set_state(LedState::Disarmed);
                return Err(e);
            }
        } else if let Err(e) = self.laser.disarm() {
            self.laser.force_off("disarm failure");
            warn!("Disarm reported: {}", e);
        }

        self.config.set_armed(armed)?;
        let (set, clear) = if armed {
            (LedState::Armed, LedState::Disarmed)
        } else {
            (LedState::Disarmed, LedState::Armed)
        };
        self.led.clear_state(clear);
        self.led.set_state(set);
        Ok(())
    }

    /// Laser off and locked out, unit disarmed
    pub fn emergency_stop(&self) -> anyhow::Result<()> {
        self.laser.kill_switch()?;
        self.targeting.shutdown();
        self.config.set_armed(false)?;
        self.led.clear_state(LedState::Armed);
        self.led.set_state(LedState::Disarmed);
        self.led.set_state(LedState::Error);
        warn!("Emergency stop engaged");
        Ok(())
    }

    /// Release the kill switch; the unit stays disarmed
    pub fn clear_emergency_stop(&self) -> anyhow::Result<()> {
        self.laser.reset_kill_switch()?;
        if !self.in_safe_mode() {
            self.led.clear_state(LedState::Error);
        }
        info!("Emergency stop cleared, unit disarmed");
        Ok(())
    }

    /// Re-initialize the servos and clear a latched laser or targeting error
    pub fn reset_fault(&self) -> anyhow::Result<()> {
        self.targeting.reset()?;
        if self.is_emergency_stopped() {
            self.led.set_state(LedState::Error);
        }
        info!("Safety fault reset");
        Ok(())
    }

    /// Short press: clear an emergency stop, else reset a fault, else
    /// toggle arming. Long press: emergency stop.
    pub fn handle_button(&self, event: ButtonEvent) -> anyhow::Result<()> {
        match event {
            ButtonEvent::LongPress => self.emergency_stop(),
            ButtonEvent::ShortPress if self.is_emergency_stopped() => self.clear_emergency_stop(),
            ButtonEvent::ShortPress if self.in_safe_mode() => self.reset_fault(),
            ButtonEvent::ShortPress => {
                let armed = self.config.is_armed()?;
                info!("Button toggles armed to {}", !armed);
                self.apply_armed(!armed)
            }
        }
    }
}
