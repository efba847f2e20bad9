//! LED controller and render loop

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::output::LedOutput;
use crate::pattern::{ActiveReasons, LedColor, LedState};
use crate::LedError;

/// LED timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    /// Render period (milliseconds)
    pub tick_ms: u64,
    /// Detection flash length (milliseconds)
    pub detection_flash_ms: u64,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            detection_flash_ms: 200,
        }
    }
}

struct Shared {
    reasons: Mutex<ActiveReasons>,
    output: Mutex<Box<dyn LedOutput>>,
    last_state: Mutex<LedState>,
    running: AtomicBool,
    started: Instant,
}

/// Status LED controller.
///
/// `set_state` / `clear_state` / `flash_detection` only flip entries in the
/// reason set; all timing lives on the render thread.
pub struct LedController {
    config: LedConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LedController {
    pub fn new(config: LedConfig, output: Box<dyn LedOutput>) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                reasons: Mutex::new(ActiveReasons::default()),
                output: Mutex::new(output),
                last_state: Mutex::new(LedState::Off),
                running: AtomicBool::new(false),
                started: Instant::now(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the render thread
    pub fn start(&self) -> Result<(), LedError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let shared = self.shared.clone();
        let tick = Duration::from_millis(self.config.tick_ms.max(1));
        let handle = std::thread::Builder::new()
            .name("led-render".into())
            .spawn(move || {
                debug!("LED render thread started");
                while shared.running.load(Ordering::SeqCst) {
                    if let Err(e) = shared.render(Instant::now()) {
                        warn!("LED render failed: {}", e);
                    }
                    std::thread::sleep(tick);
                }
                if let Ok(mut output) = shared.output.lock() {
                    let _ = output.set_color(LedColor::OFF);
                }
                debug!("LED render thread exiting");
            })
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                LedError::Spawn(e)
            })?;

        *self.lock_handle()? = Some(handle);
        Ok(())
    }

    /// Stop rendering, turn the LED off and join the thread
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("LED render thread panicked");
            }
        }
    }

    pub fn set_state(&self, state: LedState) {
        match self.shared.reasons.lock() {
            Ok(mut reasons) => reasons.set(state),
            Err(e) => warn!("LED set_state({:?}) skipped: {}", state, e),
        }
    }

    pub fn clear_state(&self, state: LedState) {
        match self.shared.reasons.lock() {
            Ok(mut reasons) => reasons.clear(state),
            Err(e) => warn!("LED clear_state({:?}) skipped: {}", state, e),
        }
    }

    /// Brief white flash that clears itself
    pub fn flash_detection(&self) {
        let duration = Duration::from_millis(self.config.detection_flash_ms);
        if let Ok(mut reasons) = self.shared.reasons.lock() {
            reasons.flash_detection(Instant::now(), duration);
        }
    }

    /// Highest-priority reason currently set
    pub fn active_state(&self) -> LedState {
        match self.shared.reasons.lock() {
            Ok(mut reasons) => {
                reasons.expire(Instant::now());
                reasons.highest()
            }
            Err(_) => LedState::Error,
        }
    }

    pub fn is_state_set(&self, state: LedState) -> bool {
        self.shared
            .reasons
            .lock()
            .map(|r| r.contains(state))
            .unwrap_or(false)
    }

    /// Render one frame at `now`; the loop calls this every tick
    pub fn render_at(&self, now: Instant) -> Result<LedColor, LedError> {
        self.shared.render(now)
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn lock_handle(&self) -> Result<MutexGuard<'_, Option<JoinHandle<()>>>, LedError> {
        self.handle
            .lock()
            .map_err(|e| LedError::Lock(format!("Lock error: {}", e)))
    }
}

impl Shared {
    fn render(&self, now: Instant) -> Result<LedColor, LedError> {
        let elapsed_ms = now.saturating_duration_since(self.started).as_millis() as u64;
        let (state, color) = {
            let mut reasons = self
                .reasons
                .lock()
                .map_err(|e| LedError::Lock(format!("Lock error: {}", e)))?;
            reasons.expire(now);
            (reasons.highest(), reasons.render(elapsed_ms))
        };

        let mut output = self
            .output
            .lock()
            .map_err(|e| LedError::Lock(format!("Lock error: {}", e)))?;

        if let Ok(mut last) = self.last_state.lock() {
            if *last != state {
                *last = state;
                output.state_changed(state);
            }
        }
        output.set_color(color)?;
        Ok(color)
    }
}

impl Drop for LedController {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::RecordingLed;

    fn controller() -> (LedController, RecordingLed) {
        let led = RecordingLed::new();
        let controller = LedController::new(LedConfig::default(), Box::new(led.clone()));
        (controller, led)
    }

    #[test]
    fn test_armed_then_error_then_clear() {
        let (controller, led) = controller();
        let now = Instant::now();

        controller.set_state(LedState::Armed);
        assert_eq!(controller.render_at(now).unwrap(), LedColor::GREEN);

        controller.set_state(LedState::Error);
        assert_eq!(controller.active_state(), LedState::Error);
        controller.render_at(now).unwrap();

        controller.clear_state(LedState::Error);
        assert_eq!(controller.active_state(), LedState::Armed);
        assert_eq!(controller.render_at(now).unwrap(), LedColor::GREEN);

        assert_eq!(
            led.transitions(),
            vec![LedState::Armed, LedState::Error, LedState::Armed]
        );
    }

    #[test]
    fn test_detection_flash_auto_clears() {
        let (controller, _led) = controller();
        controller.set_state(LedState::Disarmed);
        controller.flash_detection();

        let now = Instant::now();
        assert_eq!(controller.render_at(now).unwrap(), LedColor::WHITE);
        let later = now + Duration::from_millis(250);
        assert_eq!(controller.render_at(later).unwrap(), LedColor::YELLOW);
        assert!(!controller.is_state_set(LedState::Detection));
    }

    #[test]
    fn test_render_thread_lifecycle() {
        let (controller, led) = controller();
        controller.set_state(LedState::Armed);
        controller.start().unwrap();
        assert!(controller.is_running());

        std::thread::sleep(Duration::from_millis(120));
        controller.stop();

        assert!(!controller.is_running());
        assert!(led.colors().contains(&LedColor::GREEN));
        assert_eq!(led.last_color(), Some(LedColor::OFF));
    }
}
