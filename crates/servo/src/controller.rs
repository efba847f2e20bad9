//! Servo controller

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn, Level};

use crate::config::ServoConfig;
use crate::pwm::{Axis, PwmDriver};
use crate::ServoError;

/// Callback run synchronously when the actuation layer faults
pub type FaultHook = Arc<dyn Fn(&ServoError) + Send + Sync>;

/// Commanded pan/tilt position (degrees)
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServoPosition {
    pub pan_deg: f32,
    pub tilt_deg: f32,
}

/// Controller lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServoState {
    Uninitialized,
    Ready,
    Disabled,
    /// Actuation fault, moves refused until [`ServoController::init`]
    Fault,
}

/// Servo statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ServoStats {
    pub move_count: u64,
    pub clamp_count: u64,
    pub fault_count: u64,
    pub hardware_ok: bool,
}

struct Inner {
    driver: Box<dyn PwmDriver>,
    position: ServoPosition,
    state: ServoState,
    stats: ServoStats,
}

/// Pan/tilt servo controller.
///
/// Owns the servo position exclusively. Moves block the calling thread for
/// up to the configured move time.
pub struct ServoController {
    config: ServoConfig,
    inner: Mutex<Inner>,
    /// Serializes moves so interpolation sequences never interleave
    motion: Mutex<()>,
    fault_hook: Mutex<Option<FaultHook>>,
}

impl ServoController {
    pub fn new(config: ServoConfig, driver: Box<dyn PwmDriver>) -> Self {
        let (pan_deg, tilt_deg) = config.home();
        Self {
            config,
            inner: Mutex::new(Inner {
                driver,
                position: ServoPosition { pan_deg, tilt_deg },
                state: ServoState::Uninitialized,
                stats: ServoStats::default(),
            }),
            motion: Mutex::new(()),
            fault_hook: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    /// Install the hook run on actuation faults
    pub fn set_fault_hook(&self, hook: FaultHook) {
        if let Ok(mut slot) = self.fault_hook.lock() {
            *slot = Some(hook);
        }
    }

    /// Home both axes and self-test across a small safe range.
    ///
    /// Also the only way out of [`ServoState::Fault`].
    pub fn init(&self) -> Result<ServoPosition, ServoError> {
        let _motion = self.lock_motion()?;
        let (home_pan, home_tilt) = self.config.home();

        {
            let mut inner = self.lock()?;
            if !inner.driver.is_connected() {
                drop(inner);
                return Err(self.fault(ServoError::Hardware("PWM output not connected".into())));
            }
            inner.state = ServoState::Ready;
            inner.stats.hardware_ok = true;
        }

        self.apply(home_pan, home_tilt)?;

        let range = self.config.self_test_range_deg;
        let checkpoints = [
            (home_pan - range, home_tilt),
            (home_pan + range, home_tilt),
            (home_pan, home_tilt - range),
            (home_pan, home_tilt),
        ];
        for (pan, tilt) in checkpoints {
            let pan = self.config.clamp(Axis::Pan, pan);
            let tilt = self.config.clamp(Axis::Tilt, tilt);
            self.interpolate_to(pan, tilt)?;
        }

        info!(
            "Servo controller initialized (home position: pan={:.1}°, tilt={:.1}°)",
            home_pan, home_tilt
        );
        self.position()
    }

    /// Move to the requested angles, clamped to the safe envelope.
    ///
    /// Returns the position actually commanded, which differs from the
    /// request whenever clamping applied.
    pub fn move_to(&self, pan_deg: f32, tilt_deg: f32) -> Result<ServoPosition, ServoError> {
        let _motion = self.lock_motion()?;
        self.ensure_ready()?;

        let (pan, tilt) = self.clamp_request(pan_deg, tilt_deg, Level::WARN)?;
        let started = Instant::now();
        self.interpolate_to(pan, tilt)?;

        let budget = Duration::from_millis(self.config.move_time_ms * 2 + 10);
        let elapsed = started.elapsed();
        if elapsed > budget {
            warn!("Servo move took {:?} (budget {:?})", elapsed, budget);
        }

        let position = {
            let mut inner = self.lock()?;
            inner.stats.move_count += 1;
            inner.position
        };
        metrics::counter!("servo_moves_total").increment(1);
        Ok(position)
    }

    /// Jump to the requested angles without interpolation
    pub fn move_immediate(&self, pan_deg: f32, tilt_deg: f32) -> Result<ServoPosition, ServoError> {
        let _motion = self.lock_motion()?;
        self.ensure_ready()?;

        let (pan, tilt) = self.clamp_request(pan_deg, tilt_deg, Level::DEBUG)?;
        self.apply(pan, tilt)?;
        self.verify(pan, tilt)?;

        let mut inner = self.lock()?;
        inner.stats.move_count += 1;
        Ok(inner.position)
    }

    /// Return to the center of both axes
    pub fn home(&self) -> Result<ServoPosition, ServoError> {
        let (pan, tilt) = self.config.home();
        debug!("Returning to home position");
        self.move_to(pan, tilt)
    }

    pub fn position(&self) -> Result<ServoPosition, ServoError> {
        Ok(self.lock()?.position)
    }

    pub fn state(&self) -> Result<ServoState, ServoError> {
        Ok(self.lock()?.state)
    }

    pub fn stats(&self) -> Result<ServoStats, ServoError> {
        Ok(self.lock()?.stats.clone())
    }

    pub fn is_hardware_ok(&self) -> bool {
        self.lock()
            .map(|inner| inner.state == ServoState::Ready && inner.stats.hardware_ok)
            .unwrap_or(false)
    }

    /// Leave a fault or disabled state by running initialization again
    pub fn reset(&self) -> Result<ServoPosition, ServoError> {
        info!("Servo reset requested");
        self.init()
    }

    /// Stop driving the servos. Moves are refused until re-initialized.
    pub fn disable(&self) -> Result<(), ServoError> {
        let _motion = self.lock_motion()?;
        let mut inner = self.lock()?;
        inner.driver.disable()?;
        if inner.state != ServoState::Fault {
            inner.state = ServoState::Disabled;
        }
        info!("Servo outputs disabled");
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), ServoError> {
        match self.lock()?.state {
            ServoState::Ready => Ok(()),
            ServoState::Uninitialized => Err(ServoError::NotInitialized),
            ServoState::Disabled => Err(ServoError::Disabled),
            ServoState::Fault => Err(ServoError::Faulted),
        }
    }

    /// Clamp into the envelope. Tracking ticks clamp continuously, so
    /// they log at `DEBUG`; the count and metric are kept either way.
    fn clamp_request(&self, pan_deg: f32, tilt_deg: f32, level: Level) -> Result<(f32, f32), ServoError> {
        let pan = self.config.clamp(Axis::Pan, pan_deg);
        let tilt = self.config.clamp(Axis::Tilt, tilt_deg);

        if pan != pan_deg || tilt != tilt_deg {
            if level == Level::WARN {
                warn!(
                    "Servo request clamped: pan {:.1}° -> {:.1}°, tilt {:.1}° -> {:.1}°",
                    pan_deg, pan, tilt_deg, tilt
                );
            } else {
                debug!(
                    "Servo request clamped: pan {:.1}° -> {:.1}°, tilt {:.1}° -> {:.1}°",
                    pan_deg, pan, tilt_deg, tilt
                );
            }
            self.lock()?.stats.clamp_count += 1;
            metrics::counter!("servo_clamp_events_total").increment(1);
        }
        Ok((pan, tilt))
    }

    /// Walk from the current position to the target in equal steps
    fn interpolate_to(&self, pan: f32, tilt: f32) -> Result<(), ServoError> {
        let start = self.lock()?.position;
        let steps = self.config.steps_per_move();
        let interval = Duration::from_millis(self.config.step_interval_ms);

        for step in 1..=steps {
            let t = step as f32 / steps as f32;
            let next_pan = start.pan_deg + (pan - start.pan_deg) * t;
            let next_tilt = start.tilt_deg + (tilt - start.tilt_deg) * t;

            // Each intermediate point must lie between start and target
            if !between(next_pan, start.pan_deg, pan) || !between(next_tilt, start.tilt_deg, tilt) {
                return Err(self.fault(ServoError::Hardware(format!(
                    "Interpolation overshoot at step {}",
                    step
                ))));
            }

            self.apply(next_pan, next_tilt)?;
            if step < steps && !interval.is_zero() {
                std::thread::sleep(interval);
            }
        }

        self.verify(pan, tilt)
    }

    fn apply(&self, pan: f32, tilt: f32) -> Result<(), ServoError> {
        let pan_pulse = self.config.angle_to_pulse(Axis::Pan, pan);
        let tilt_pulse = self.config.angle_to_pulse(Axis::Tilt, tilt);

        let result = {
            let mut inner = self.lock()?;
            let written = inner
                .driver
                .set_pulse_us(Axis::Pan, pan_pulse)
                .and_then(|_| inner.driver.set_pulse_us(Axis::Tilt, tilt_pulse));
            if written.is_ok() {
                inner.position = ServoPosition {
                    pan_deg: pan,
                    tilt_deg: tilt,
                };
            }
            written
        };

        result.map_err(|e| self.fault(e))
    }

    /// Compare hardware feedback (when available) against the command
    fn verify(&self, pan: f32, tilt: f32) -> Result<(), ServoError> {
        let mismatch = {
            let inner = self.lock()?;
            [(Axis::Pan, pan), (Axis::Tilt, tilt)]
                .into_iter()
                .find_map(|(axis, angle)| {
                    let commanded = self.config.angle_to_pulse(axis, angle);
                    let measured = inner.driver.feedback_pulse_us(axis)?;
                    (measured.abs_diff(commanded) > self.config.feedback_tolerance_us).then_some(
                        ServoError::PositionMismatch {
                            axis,
                            commanded,
                            measured,
                        },
                    )
                })
        };

        match mismatch {
            Some(e) => Err(self.fault(e)),
            None => Ok(()),
        }
    }

    /// Latch the fault state and notify the hook; returns the error for `?`
    fn fault(&self, err: ServoError) -> ServoError {
        if let Ok(mut inner) = self.inner.lock() {
            inner.state = ServoState::Fault;
            inner.stats.fault_count += 1;
            inner.stats.hardware_ok = false;
            if let Err(e) = inner.driver.disable() {
                warn!("Failed to disable PWM after fault: {}", e);
            }
        }
        error!("Servo fault: {}", err);

        let hook = self.fault_hook.lock().ok().and_then(|slot| slot.clone());
        if let Some(hook) = hook {
            hook(&err);
        }
        err
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ServoError> {
        self.inner
            .lock()
            .map_err(|e| ServoError::Lock(format!("Lock error: {}", e)))
    }

    fn lock_motion(&self) -> Result<MutexGuard<'_, ()>, ServoError> {
        self.motion
            .lock()
            .map_err(|e| ServoError::Lock(format!("Lock error: {}", e)))
    }
}

fn between(value: f32, a: f32, b: f32) -> bool {
    const EPSILON: f32 = 1e-3;
    value >= a.min(b) - EPSILON && value <= a.max(b) + EPSILON
}
