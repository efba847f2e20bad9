//! Physical arm button
//!
//! A short press (under 1 s) toggles arming, a press held for 3 s is an
//! emergency stop. Presses are debounced at 50 ms and polled every 20 ms.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::controls::UnitControls;

const DEBOUNCE: Duration = Duration::from_millis(50);
const SHORT_PRESS_MAX: Duration = Duration::from_millis(1000);
const LONG_PRESS: Duration = Duration::from_millis(3000);
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Input line of the button; `true` while pressed
pub trait ButtonInput: Send {
    fn is_pressed(&mut self) -> anyhow::Result<bool>;
}

/// Button driven from code; clones share state
#[derive(Debug, Clone, Default)]
pub struct MockButton {
    pressed: Arc<AtomicBool>,
}

impl MockButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn press(&self) {
        self.pressed.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        self.pressed.store(false, Ordering::SeqCst);
    }
}

impl ButtonInput for MockButton {
    fn is_pressed(&mut self) -> anyhow::Result<bool> {
        Ok(self.pressed.load(Ordering::SeqCst))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    ShortPress,
    LongPress,
}

/// Turns raw samples into press events.
///
/// Presses between the short and long thresholds produce nothing; a long
/// press fires once while still held.
#[derive(Debug, Default)]
pub struct PressDetector {
    pressed: bool,
    last_change: Option<Instant>,
    press_started: Option<Instant>,
    long_fired: bool,
}

impl PressDetector {
    pub fn update(&mut self, raw: bool, now: Instant) -> Option<ButtonEvent> {
        if raw != self.pressed {
            let settled = self
                .last_change
                .map_or(true, |at| now.saturating_duration_since(at) >= DEBOUNCE);
            if settled {
                self.pressed = raw;
                self.last_change = Some(now);
                if raw {
                    self.press_started = Some(now);
                    self.long_fired = false;
                } else {
                    let held = self
                        .press_started
                        .take()
                        .map(|at| now.saturating_duration_since(at))
                        .unwrap_or_default();
                    if !self.long_fired && held < SHORT_PRESS_MAX {
                        return Some(ButtonEvent::ShortPress);
                    }
                }
            }
        }

        if self.pressed && !self.long_fired {
            let held = self
                .press_started
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or_default();
            if held >= LONG_PRESS {
                self.long_fired = true;
                return Some(ButtonEvent::LongPress);
            }
        }
        None
    }
}

/// Polls the button on its own thread and runs the matching action
pub struct ButtonWatcher {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ButtonWatcher {
    pub fn spawn(mut input: Box<dyn ButtonInput>, controls: Arc<UnitControls>) -> anyhow::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();

        let handle = std::thread::Builder::new()
            .name("button".into())
            .spawn(move || {
                info!("Button watcher started");
                let mut detector = PressDetector::default();
                let mut read_failing = false;
                while flag.load(Ordering::SeqCst) {
                    match input.is_pressed() {
                        Ok(raw) => {
                            read_failing = false;
                            if let Some(event) = detector.update(raw, Instant::now()) {
                                debug!("Button event: {:?}", event);
                                if let Err(e) = controls.handle_button(event) {
                                    warn!("Button action failed: {}", e);
                                }
                            }
                        }
                        Err(e) => {
                            if !read_failing {
                                warn!("Button read failed: {}", e);
                            }
                            read_failing = true;
                        }
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                info!("Button watcher stopped");
            })?;

        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Button thread panicked");
            }
        }
    }
}

impl Drop for ButtonWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}
