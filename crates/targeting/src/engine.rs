//! Targeting state machine

use std::f32::consts::TAU;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate};
use coordinate_mapper::{CoordinateMapper, ServoAngles};
use laser::{LaserController, LaserError, LaserState};
use led::{LedController, LedState};
use serde::Serialize;
use servo::{ServoController, ServoError};
use tracing::{debug, error, info, warn};

use crate::config::{TargetingConfig, SWEEP_AMPLITUDE_RANGE, SWEEP_FREQUENCY_RANGE};
use crate::detection::{Detection, DetectionFrame};
use crate::TargetingError;

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetingState {
    Idle,
    /// Servos slewing onto a newly selected target
    Acquiring,
    /// Locked on and sweeping
    Tracking,
    /// Latched after a servo fault; only [`TargetingEngine::reset`] leaves it
    Error,
}

/// Sweep around the current target
#[derive(Debug, Clone, Copy)]
pub struct SweepState {
    /// Sweep center (degrees), follows the target at a bounded rate
    pub center_pan_deg: f32,
    pub center_tilt_deg: f32,
    /// Oscillator phase (radians, `[0, 2π)`)
    pub phase_rad: f32,
    last_update: Instant,
}

impl SweepState {
    fn new(center: ServoAngles, now: Instant) -> Self {
        Self {
            center_pan_deg: center.pan_deg,
            center_tilt_deg: center.tilt_deg,
            phase_rad: 0.0,
            last_update: now,
        }
    }

    /// Move the center toward `target` and advance the phase.
    /// Returns the number of completed sweep cycles.
    fn advance(&mut self, now: Instant, target: ServoAngles, config: &TargetingConfig) -> u64 {
        let dt = now.saturating_duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        let max_step = config.recenter_rate_deg_s.max(0.0) * dt;
        self.center_pan_deg += (target.pan_deg - self.center_pan_deg).clamp(-max_step, max_step);
        self.center_tilt_deg += (target.tilt_deg - self.center_tilt_deg).clamp(-max_step, max_step);

        self.phase_rad += TAU * config.sweep_frequency_hz * dt;
        let mut cycles = 0;
        while self.phase_rad >= TAU {
            self.phase_rad -= TAU;
            cycles += 1;
        }
        cycles
    }

    /// Current aim point
    pub fn aim(&self, amplitude_deg: f32) -> (f32, f32) {
        (
            self.center_pan_deg + amplitude_deg * self.phase_rad.sin(),
            self.center_tilt_deg,
        )
    }
}

/// Targeting statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct TargetingStats {
    pub target_count: u64,
    pub lost_count: u64,
    pub multi_target_count: u64,
    pub sweep_cycles: u64,
    pub total_track_time_ms: u64,
    /// Acquisitions since local midnight
    pub detections_today: u64,
}

struct Inner {
    state: TargetingState,
    /// Latest aim derived from a detection
    target: Option<ServoAngles>,
    sweep: Option<SweepState>,
    last_seen: Option<Instant>,
    track_started: Option<Instant>,
    stats: TargetingStats,
    stats_day: NaiveDate,
}

impl Inner {
    fn end_track(&mut self, now: Instant) {
        if let Some(started) = self.track_started.take() {
            self.stats.total_track_time_ms +=
                now.saturating_duration_since(started).as_millis() as u64;
        }
        self.target = None;
        self.sweep = None;
        self.last_seen = None;
    }

    fn roll_day(&mut self) {
        let today = Local::now().date_naive();
        if today != self.stats_day {
            self.stats_day = today;
            self.stats.detections_today = 0;
        }
    }
}

/// Targeting engine.
///
/// Single consumer of detections. Servo moves happen without the engine
/// lock held so status readers never wait on actuation.
pub struct TargetingEngine {
    config: Mutex<TargetingConfig>,
    servo: Arc<ServoController>,
    laser: Arc<LaserController>,
    mapper: Arc<CoordinateMapper>,
    led: Arc<LedController>,
    inner: Mutex<Inner>,
}

impl TargetingEngine {
    pub fn new(
        config: TargetingConfig,
        servo: Arc<ServoController>,
        laser: Arc<LaserController>,
        mapper: Arc<CoordinateMapper>,
        led: Arc<LedController>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            servo,
            laser,
            mapper,
            led,
            inner: Mutex::new(Inner {
                state: TargetingState::Idle,
                target: None,
                sweep: None,
                last_seen: None,
                track_started: None,
                stats: TargetingStats::default(),
                stats_day: Local::now().date_naive(),
            }),
        }
    }

    /// Handle one detection cycle.
    ///
    /// Picks the largest detection above the area floor. In IDLE that
    /// starts an acquisition; while tracking it only refreshes the target.
    pub fn process_frame(
        &self,
        frame: &DetectionFrame,
        now: Instant,
    ) -> Result<TargetingState, TargetingError> {
        let config = self.config()?;

        let candidates: Vec<&Detection> = frame
            .detections
            .iter()
            .filter(|d| d.area() >= config.min_target_area_px)
            .collect();
        let Some(target) = select_largest(&candidates) else {
            return self.state();
        };

        if self.state()? == TargetingState::Error {
            debug!("Detection ignored while in ERROR");
            return Ok(TargetingState::Error);
        }

        let (cx, cy) = target.centroid();
        let aim = self
            .mapper
            .map_to_servo_angles(cx, cy, frame.frame_width, frame.frame_height)?;
        self.led.flash_detection();

        let state = {
            let mut inner = self.lock()?;
            if candidates.len() > 1 {
                inner.stats.multi_target_count += 1;
                debug!(
                    "{} targets in view, following largest ({:.0} px²)",
                    candidates.len(),
                    target.area()
                );
            }
            inner.target = Some(aim);
            inner.last_seen = Some(now);
            inner.state
        };

        match state {
            TargetingState::Idle => self.acquire(aim, now),
            other => Ok(other),
        }
    }

    /// Periodic update: laser limits, sweep motion and target loss
    pub fn tick(&self, now: Instant) -> Result<TargetingState, TargetingError> {
        if let Err(e) = self.laser.update_at(now) {
            warn!("Laser update failed: {}", e);
        }

        let config = self.config()?;
        let lost_after = Duration::from_millis(config.lost_timeout_ms);

        let aim = {
            let mut inner = self.lock()?;
            if inner.state != TargetingState::Tracking {
                return Ok(inner.state);
            }
            let lost = inner
                .last_seen
                .map_or(true, |seen| now.saturating_duration_since(seen) > lost_after);
            if lost {
                None
            } else {
                let target = inner.target;
                match (inner.sweep.as_mut(), target) {
                    (Some(sweep), Some(target)) => {
                        let cycles = sweep.advance(now, target, &config);
                        let aim = sweep.aim(config.sweep_amplitude_deg);
                        inner.stats.sweep_cycles += cycles;
                        Some(aim)
                    }
                    _ => None,
                }
            }
        };

        let Some((pan, tilt)) = aim else {
            return self.release(now);
        };

        if let Err(e) = self.servo.move_immediate(pan, tilt) {
            return Err(self.servo_failed(e, now));
        }

        // Re-fire once a cooldown or late arming allows it
        if self.laser.state()? == LaserState::Armed {
            self.fire(now);
        }
        Ok(TargetingState::Tracking)
    }

    /// Leave ERROR: re-initialize the servos and clear the laser and LED error.
    /// Also clears a laser error latched while the engine itself was idle.
    pub fn reset(&self) -> Result<(), TargetingError> {
        if self.state()? != TargetingState::Error && self.laser.state()? != LaserState::Error {
            return Ok(());
        }

        self.servo.reset()?;
        self.laser.reset_error()?;
        self.led.clear_state(LedState::Error);

        self.lock()?.state = TargetingState::Idle;
        info!("Targeting reset, back to IDLE");
        Ok(())
    }

    /// Latch ERROR from outside, e.g. the servo fault hook
    pub fn fault(&self, reason: &str) {
        self.enter_error(reason, Instant::now());
    }

    /// Stop tracking and turn the laser off, keeping any ERROR latched
    pub fn shutdown(&self) {
        if let Err(e) = self.laser.off() {
            warn!("Laser off at shutdown failed: {}", e);
        }
        if let Ok(mut inner) = self.inner.lock() {
            inner.end_track(Instant::now());
            if inner.state != TargetingState::Error {
                inner.state = TargetingState::Idle;
            }
        }
        debug!("Targeting engine stopped");
    }

    pub fn set_sweep_amplitude(&self, amplitude_deg: f32) -> Result<(), TargetingError> {
        let (min, max) = SWEEP_AMPLITUDE_RANGE;
        if !(min..=max).contains(&amplitude_deg) {
            return Err(TargetingError::InvalidParam(format!(
                "sweep amplitude {} outside {}..={} degrees",
                amplitude_deg, min, max
            )));
        }
        self.lock_config()?.sweep_amplitude_deg = amplitude_deg;
        debug!("Sweep amplitude set to {:.1}°", amplitude_deg);
        Ok(())
    }

    pub fn set_sweep_frequency(&self, frequency_hz: f32) -> Result<(), TargetingError> {
        let (min, max) = SWEEP_FREQUENCY_RANGE;
        if !(min..=max).contains(&frequency_hz) {
            return Err(TargetingError::InvalidParam(format!(
                "sweep frequency {} outside {}..={} Hz",
                frequency_hz, min, max
            )));
        }
        self.lock_config()?.sweep_frequency_hz = frequency_hz;
        debug!("Sweep frequency set to {:.1} Hz", frequency_hz);
        Ok(())
    }

    pub fn config(&self) -> Result<TargetingConfig, TargetingError> {
        Ok(self.lock_config()?.clone())
    }

    pub fn state(&self) -> Result<TargetingState, TargetingError> {
        Ok(self.lock()?.state)
    }

    pub fn is_tracking(&self) -> bool {
        matches!(
            self.state(),
            Ok(TargetingState::Acquiring | TargetingState::Tracking)
        )
    }

    pub fn sweep(&self) -> Result<Option<SweepState>, TargetingError> {
        Ok(self.lock()?.sweep)
    }

    pub fn current_target(&self) -> Result<Option<ServoAngles>, TargetingError> {
        Ok(self.lock()?.target)
    }

    pub fn stats(&self) -> Result<TargetingStats, TargetingError> {
        let mut inner = self.lock()?;
        inner.roll_day();
        Ok(inner.stats.clone())
    }

    fn acquire(&self, aim: ServoAngles, now: Instant) -> Result<TargetingState, TargetingError> {
        {
            let mut inner = self.lock()?;
            inner.roll_day();
            inner.state = TargetingState::Acquiring;
            inner.track_started = Some(now);
            inner.stats.target_count += 1;
            inner.stats.detections_today += 1;
        }
        metrics::counter!("targeting_acquisitions_total").increment(1);
        info!(
            "Target acquired: pan={:.1}°, tilt={:.1}°",
            aim.pan_deg, aim.tilt_deg
        );

        let reached = match self.servo.move_to(aim.pan_deg, aim.tilt_deg) {
            Ok(position) => position,
            Err(e) => return Err(self.servo_failed(e, now)),
        };

        {
            let mut inner = self.lock()?;
            // A fault reported while slewing wins over the acquisition
            if inner.state != TargetingState::Acquiring {
                return Ok(inner.state);
            }
            inner.state = TargetingState::Tracking;
            inner.sweep = Some(SweepState::new(
                ServoAngles {
                    pan_deg: reached.pan_deg,
                    tilt_deg: reached.tilt_deg,
                },
                now,
            ));
        }

        self.fire(now);
        Ok(TargetingState::Tracking)
    }

    fn fire(&self, now: Instant) {
        match self.laser.on_at(now) {
            Ok(()) => {}
            Err(LaserError::NotArmed) => debug!("Tracking while disarmed, laser stays off"),
            Err(e) => debug!("Laser not enabled: {}", e),
        }
    }

    fn release(&self, now: Instant) -> Result<TargetingState, TargetingError> {
        if let Err(e) = self.laser.off_at(now) {
            warn!("Laser off failed on target loss: {}", e);
        }
        {
            let mut inner = self.lock()?;
            inner.end_track(now);
            inner.state = TargetingState::Idle;
            inner.stats.lost_count += 1;
        }
        metrics::counter!("targeting_lost_total").increment(1);
        info!("Target lost, returning to ready position");

        if let Err(e) = self.servo.home() {
            return Err(self.servo_failed(e, now));
        }
        Ok(TargetingState::Idle)
    }

    fn servo_failed(&self, err: ServoError, now: Instant) -> TargetingError {
        match err {
            ServoError::Hardware(_) | ServoError::PositionMismatch { .. } | ServoError::Faulted => {
                self.enter_error(&err.to_string(), now);
            }
            _ => {
                warn!("Servo unavailable, dropping target: {}", err);
                if let Err(e) = self.laser.off_at(now) {
                    warn!("Laser off failed: {}", e);
                }
                if let Ok(mut inner) = self.inner.lock() {
                    inner.end_track(now);
                    inner.state = TargetingState::Idle;
                }
            }
        }
        TargetingError::Servo(err)
    }

    fn enter_error(&self, reason: &str, now: Instant) {
        self.laser.force_off(reason);
        self.led.set_state(LedState::Error);
        match self.inner.lock() {
            Ok(mut inner) => {
                inner.end_track(now);
                inner.state = TargetingState::Error;
            }
            Err(poisoned) => poisoned.into_inner().state = TargetingState::Error,
        }
        error!("Targeting entered ERROR: {}", reason);
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, TargetingError> {
        self.inner
            .lock()
            .map_err(|e| TargetingError::Lock(format!("Lock error: {}", e)))
    }

    fn lock_config(&self) -> Result<MutexGuard<'_, TargetingConfig>, TargetingError> {
        self.config
            .lock()
            .map_err(|e| TargetingError::Lock(format!("Lock error: {}", e)))
    }
}

/// Largest bounding box; the first one wins ties
fn select_largest<'a>(candidates: &[&'a Detection]) -> Option<&'a Detection> {
    candidates.iter().copied().fold(None, |best, d| match best {
        Some(b) if b.area() >= d.area() => Some(b),
        _ => Some(d),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinate_mapper::CameraParams;
    use laser::{LaserLimits, MockLaserLine};
    use led::{LedConfig, RecordingLed};
    use servo::{MockPwm, ServoConfig};

    struct Rig {
        engine: TargetingEngine,
        servo: Arc<ServoController>,
        laser: Arc<LaserController>,
        led: Arc<LedController>,
        pwm: MockPwm,
        line: MockLaserLine,
    }

    fn rig(armed: bool) -> Rig {
        let pwm = MockPwm::new();
        let servo = Arc::new(ServoController::new(
            ServoConfig::immediate(),
            Box::new(pwm.clone()),
        ));
        servo.init().unwrap();

        let line = MockLaserLine::new();
        let laser = Arc::new(LaserController::new(
            LaserLimits::default(),
            Box::new(line.clone()),
        ));
        if armed {
            laser.arm().unwrap();
        }

        let mapper = Arc::new(CoordinateMapper::new(CameraParams::default()));
        let led = Arc::new(LedController::new(
            LedConfig::default(),
            Box::new(RecordingLed::new()),
        ));

        let engine = TargetingEngine::new(
            TargetingConfig::default(),
            servo.clone(),
            laser.clone(),
            mapper,
            led.clone(),
        );
        Rig {
            engine,
            servo,
            laser,
            led,
            pwm,
            line,
        }
    }

    /// 20x20 box centered on (cx, cy) in a 640x480 frame
    fn frame_at(cx: f32, cy: f32) -> DetectionFrame {
        DetectionFrame::new(vec![Detection::new(cx - 10.0, cy - 10.0, 20.0, 20.0, 0.9)], 640, 480)
    }

    #[test]
    fn test_centered_target_fires_when_armed() {
        let rig = rig(true);
        let now = Instant::now();

        let state = rig.engine.process_frame(&frame_at(320.0, 240.0), now).unwrap();
        assert_eq!(state, TargetingState::Tracking);

        let position = rig.servo.position().unwrap();
        assert!(position.pan_deg.abs() < 0.01);
        assert!(position.tilt_deg.abs() < 0.01);
        assert!(rig.line.is_on());
        assert_eq!(rig.engine.stats().unwrap().target_count, 1);
    }

    #[test]
    fn test_disarmed_tracks_without_laser() {
        let rig = rig(false);
        let now = Instant::now();

        rig.engine.process_frame(&frame_at(480.0, 240.0), now).unwrap();
        assert_eq!(rig.engine.state().unwrap(), TargetingState::Tracking);
        assert!((rig.servo.position().unwrap().pan_deg - 15.0).abs() < 0.01);

        for i in 1..10 {
            let t = now + Duration::from_millis(20 * i);
            rig.engine.process_frame(&frame_at(480.0, 240.0), t).unwrap();
            rig.engine.tick(t).unwrap();
        }
        assert!(!rig.line.is_on());
        assert!(rig.line.transitions().iter().all(|on| !on));
    }

    #[test]
    fn test_largest_detection_selected() {
        let rig = rig(false);
        let frame = DetectionFrame::new(
            vec![
                Detection::new(100.0, 230.0, 20.0, 20.0, 0.9),
                Detection::new(460.0, 220.0, 40.0, 40.0, 0.6),
            ],
            640,
            480,
        );

        rig.engine.process_frame(&frame, Instant::now()).unwrap();
        assert!((rig.servo.position().unwrap().pan_deg - 15.0).abs() < 0.01);
        assert_eq!(rig.engine.stats().unwrap().multi_target_count, 1);
    }

    #[test]
    fn test_small_detections_ignored() {
        let rig = rig(true);
        let frame = DetectionFrame::new(vec![Detection::new(300.0, 200.0, 5.0, 5.0, 0.99)], 640, 480);

        let state = rig.engine.process_frame(&frame, Instant::now()).unwrap();
        assert_eq!(state, TargetingState::Idle);
        assert_eq!(rig.engine.stats().unwrap().target_count, 0);
    }

    #[test]
    fn test_target_lost_returns_home() {
        let rig = rig(true);
        let now = Instant::now();
        rig.engine.process_frame(&frame_at(480.0, 120.0), now).unwrap();
        assert!(rig.line.is_on());

        // Still inside the grace window
        let state = rig.engine.tick(now + Duration::from_millis(400)).unwrap();
        assert_eq!(state, TargetingState::Tracking);

        let state = rig.engine.tick(now + Duration::from_millis(600)).unwrap();
        assert_eq!(state, TargetingState::Idle);
        assert!(!rig.line.is_on());

        let (home_pan, home_tilt) = ServoConfig::default().home();
        let position = rig.servo.position().unwrap();
        assert!((position.pan_deg - home_pan).abs() < 0.01);
        assert!((position.tilt_deg - home_tilt).abs() < 0.01);

        let stats = rig.engine.stats().unwrap();
        assert_eq!(stats.lost_count, 1);
        assert_eq!(stats.total_track_time_ms, 600);
        assert_eq!(rig.laser.state().unwrap(), LaserState::Cooldown);
    }

    #[test]
    fn test_sweep_oscillates_around_target() {
        let rig = rig(false);
        let now = Instant::now();
        rig.engine.process_frame(&frame_at(320.0, 240.0), now).unwrap();

        // Quarter period at 2 Hz
        let t = now + Duration::from_millis(125);
        rig.engine.process_frame(&frame_at(320.0, 240.0), t).unwrap();
        rig.engine.tick(t).unwrap();
        assert!((rig.servo.position().unwrap().pan_deg - 10.0).abs() < 0.05);

        let t = now + Duration::from_millis(375);
        rig.engine.process_frame(&frame_at(320.0, 240.0), t).unwrap();
        rig.engine.tick(t).unwrap();
        assert!((rig.servo.position().unwrap().pan_deg + 10.0).abs() < 0.05);

        let t = now + Duration::from_millis(510);
        rig.engine.process_frame(&frame_at(320.0, 240.0), t).unwrap();
        rig.engine.tick(t).unwrap();
        assert_eq!(rig.engine.stats().unwrap().sweep_cycles, 1);
    }

    #[test]
    fn test_sweep_recenters_at_bounded_rate() {
        let rig = rig(false);
        rig.engine.set_sweep_amplitude(0.0).unwrap();
        let now = Instant::now();
        rig.engine.process_frame(&frame_at(320.0, 240.0), now).unwrap();

        // Target jumps 15 degrees right; 20 ms at 90°/s allows 1.8°
        let t = now + Duration::from_millis(20);
        rig.engine.process_frame(&frame_at(480.0, 240.0), t).unwrap();
        rig.engine.tick(t).unwrap();
        let pan = rig.servo.position().unwrap().pan_deg;
        assert!((pan - 1.8).abs() < 0.05, "pan {}", pan);
    }

    #[test]
    fn test_servo_fault_latches_error() {
        let rig = rig(true);
        let now = Instant::now();
        rig.engine.process_frame(&frame_at(320.0, 240.0), now).unwrap();
        assert!(rig.line.is_on());

        rig.pwm.inject_fault();
        let t = now + Duration::from_millis(20);
        assert!(rig.engine.tick(t).is_err());
        assert_eq!(rig.engine.state().unwrap(), TargetingState::Error);
        assert!(!rig.line.is_on());
        assert_eq!(rig.laser.state().unwrap(), LaserState::Error);
        assert!(rig.led.is_state_set(LedState::Error));

        // Detections are ignored until reset
        let t = now + Duration::from_millis(40);
        let state = rig.engine.process_frame(&frame_at(320.0, 240.0), t).unwrap();
        assert_eq!(state, TargetingState::Error);
        assert!(!rig.line.is_on());

        rig.pwm.clear_faults();
        rig.engine.reset().unwrap();
        assert_eq!(rig.engine.state().unwrap(), TargetingState::Idle);
        assert!(!rig.led.is_state_set(LedState::Error));
        assert_eq!(rig.laser.state().unwrap(), LaserState::Armed);
    }

    #[test]
    fn test_external_fault_latches_until_reset() {
        let rig = rig(true);
        rig.engine.fault("servo fault hook");
        assert_eq!(rig.engine.state().unwrap(), TargetingState::Error);
        assert_eq!(rig.laser.state().unwrap(), LaserState::Error);

        rig.engine.reset().unwrap();
        assert_eq!(rig.engine.state().unwrap(), TargetingState::Idle);
        assert_eq!(rig.laser.state().unwrap(), LaserState::Armed);
    }

    #[test]
    fn test_reset_clears_laser_only_error() {
        let rig = rig(false);
        rig.laser.force_off("line fault");
        assert_eq!(rig.engine.state().unwrap(), TargetingState::Idle);

        rig.engine.reset().unwrap();
        assert_eq!(rig.laser.state().unwrap(), LaserState::Off);
        rig.laser.arm().unwrap();
    }

    #[test]
    fn test_refires_after_cooldown() {
        let rig = rig(true);
        rig.laser
            .set_limits(LaserLimits {
                enabled: true,
                max_on_time_ms: 100,
                cooldown_ms: 100,
            })
            .unwrap();
        let now = Instant::now();
        rig.engine.process_frame(&frame_at(320.0, 240.0), now).unwrap();

        let mut fired_again = false;
        for i in 1..=14 {
            let t = now + Duration::from_millis(20 * i);
            rig.engine.process_frame(&frame_at(320.0, 240.0), t).unwrap();
            rig.engine.tick(t).unwrap();
            if i > 10 && rig.line.is_on() {
                fired_again = true;
            }
        }
        assert!(fired_again);
        assert_eq!(rig.laser.stats().unwrap().safety_timeout_count, 1);
    }

    #[test]
    fn test_sweep_parameter_ranges() {
        let rig = rig(false);
        assert!(rig.engine.set_sweep_amplitude(46.0).is_err());
        assert!(rig.engine.set_sweep_frequency(0.1).is_err());
        rig.engine.set_sweep_amplitude(20.0).unwrap();
        rig.engine.set_sweep_frequency(5.0).unwrap();

        let config = rig.engine.config().unwrap();
        assert_eq!(config.sweep_amplitude_deg, 20.0);
        assert_eq!(config.sweep_frequency_hz, 5.0);
    }

    #[test]
    fn test_select_largest_tie_keeps_first() {
        let a = Detection::new(0.0, 0.0, 10.0, 10.0, 0.5);
        let b = Detection::new(50.0, 50.0, 10.0, 10.0, 0.9);
        assert_eq!(select_largest(&[&a, &b]), Some(&a));
        assert_eq!(select_largest(&[]), None);
    }
}
