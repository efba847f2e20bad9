//! Component wiring

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::Context;
use clip_uploader::{ClipUploader, HttpTransport, UploadTransport, UploaderConfig};
use control_server::{AppState, ServerConfig};
use coordinate_mapper::{CameraParams, CoordinateMapper, CALIBRATION_PATH};
use frame_source::{FrameSource, SharedFrame, TestPattern};
use laser::{LaserController, LaserLimits, LaserLine, MockLaserLine};
use led::{LedConfig, LedController, LedOutput, LedState, LogLed};
use servo::{MockPwm, PwmDriver, ServoConfig, ServoController};
use targeting::{DetectionWorker, TargetingConfig, TargetingEngine};
use tracing::{info, warn};
use unit_config::{ConfigStore, CONFIG_PATH, CONFIG_PATH_DEV};

use crate::button::{ButtonInput, ButtonWatcher, MockButton};
use crate::controls::UnitControls;

/// Paths and component settings chosen at startup
#[derive(Debug, Clone)]
pub struct UnitOptions {
    pub config_path: PathBuf,
    pub calibration_path: PathBuf,
    pub queue_path: PathBuf,
    /// Filesystem reported as `storage_free_mb`
    pub storage_path: PathBuf,
    pub server: ServerConfig,
    pub servo: ServoConfig,
    pub targeting: TargetingConfig,
    pub camera: CameraParams,
    /// Stream a synthetic pattern instead of waiting for camera frames
    pub test_pattern: bool,
}

impl UnitOptions {
    pub fn production() -> Self {
        Self {
            config_path: PathBuf::from(CONFIG_PATH),
            calibration_path: PathBuf::from(CALIBRATION_PATH),
            queue_path: UploaderConfig::default().queue_path,
            storage_path: PathBuf::from("/data"),
            server: ServerConfig::default(),
            servo: ServoConfig::default(),
            targeting: TargetingConfig::default(),
            camera: CameraParams::default(),
            test_pattern: false,
        }
    }

    /// Everything under `./data` so a checkout runs without root
    pub fn dev() -> Self {
        Self {
            config_path: PathBuf::from(CONFIG_PATH_DEV),
            calibration_path: PathBuf::from("./data/apis/calibration.json"),
            queue_path: PathBuf::from("./data/apis/upload_queue.json"),
            storage_path: PathBuf::from("./data"),
            test_pattern: true,
            ..Self::production()
        }
    }
}

/// Concrete hardware behind each seam
pub struct Hardware {
    pub pwm: Box<dyn PwmDriver>,
    pub laser_line: Box<dyn LaserLine>,
    pub led: Box<dyn LedOutput>,
    pub transport: Arc<dyn UploadTransport>,
    pub button: Box<dyn ButtonInput>,
}

impl Hardware {
    /// Host build: simulated actuators, real network uploads
    pub fn host() -> Self {
        Self {
            pwm: Box::new(MockPwm::new()),
            laser_line: Box::new(MockLaserLine::new()),
            led: Box::new(LogLed::default()),
            transport: Arc::new(HttpTransport::new(Duration::from_secs(
                UploaderConfig::default().timeout_secs,
            ))),
            button: Box::new(MockButton::new()),
        }
    }
}

/// Every long-lived component, built once and shared by `Arc`
pub struct UnitContext {
    pub config: Arc<ConfigStore>,
    pub servo: Arc<ServoController>,
    pub laser: Arc<LaserController>,
    pub mapper: Arc<CoordinateMapper>,
    pub led: Arc<LedController>,
    pub targeting: Arc<TargetingEngine>,
    pub uploader: Arc<ClipUploader>,
    pub controls: Arc<UnitControls>,
    /// Slot the capture pipeline publishes into
    pub camera: Arc<SharedFrame>,
    pub frames: Arc<dyn FrameSource>,
    pub start_time: Instant,
    options: UnitOptions,
    worker: Mutex<Option<DetectionWorker>>,
    button: Mutex<Option<Box<dyn ButtonInput>>>,
    button_watcher: Mutex<Option<ButtonWatcher>>,
}

impl UnitContext {
    /// Construct and initialize the components in startup order.
    ///
    /// A servo that fails its self-test leaves the unit up in ERROR so
    /// the fault stays visible, and disarmed; everything else is fatal.
    pub fn build(options: UnitOptions, hardware: Hardware) -> anyhow::Result<Self> {
        let config = Arc::new(
            ConfigStore::load(&options.config_path)
                .with_context(|| format!("loading {}", options.config_path.display()))?,
        );
        let snapshot = config.snapshot()?;

        let led = Arc::new(LedController::new(LedConfig::default(), hardware.led));
        led.start()?;
        led.set_state(LedState::Boot);

        let laser = Arc::new(LaserController::new(
            LaserLimits::from_seconds(
                snapshot.laser.enabled,
                snapshot.laser.max_duration_seconds,
                snapshot.laser.cooldown_seconds,
            ),
            hardware.laser_line,
        ));

        let servo = Arc::new(ServoController::new(options.servo.clone(), hardware.pwm));
        let mapper = Arc::new(CoordinateMapper::load(&options.calibration_path, options.camera));

        let targeting = Arc::new(TargetingEngine::new(
            options.targeting.clone(),
            servo.clone(),
            laser.clone(),
            mapper.clone(),
            led.clone(),
        ));
        {
            // Weak: the engine already owns the servo
            let engine = Arc::downgrade(&targeting);
            let laser = laser.clone();
            servo.set_fault_hook(Arc::new(move |fault| match engine.upgrade() {
                Some(engine) => engine.fault(&format!("servo fault: {}", fault)),
                None => laser.force_off("servo fault"),
            }));
        }
        if let Err(e) = servo.init() {
            warn!("Servo self-test failed: {}", e);
        }

        let uploader = Arc::new(ClipUploader::new(
            UploaderConfig {
                queue_path: options.queue_path.clone(),
                ..UploaderConfig::default()
            },
            config.clone(),
            hardware.transport,
        ));

        let controls = Arc::new(UnitControls::new(
            config.clone(),
            laser.clone(),
            led.clone(),
            targeting.clone(),
        ));

        let camera = Arc::new(SharedFrame::new());
        let frames: Arc<dyn FrameSource> = if options.test_pattern {
            Arc::new(TestPattern::new(options.camera.width, options.camera.height))
        } else {
            camera.clone()
        };

        let ctx = Self {
            config,
            servo,
            laser,
            mapper,
            led,
            targeting,
            uploader,
            controls,
            camera,
            frames,
            start_time: Instant::now(),
            options,
            worker: Mutex::new(None),
            button: Mutex::new(Some(hardware.button)),
            button_watcher: Mutex::new(None),
        };
        if let Err(e) = ctx.apply_armed(snapshot.armed) {
            warn!("Armed state not restored, starting disarmed: {}", e);
            ctx.apply_armed(false)?;
        }
        Ok(ctx)
    }

    pub fn options(&self) -> &UnitOptions {
        &self.options
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Start the uploader, the targeting worker and the button watcher
    pub fn start_workers(&self) -> anyhow::Result<()> {
        self.uploader.start()?;
        let worker = DetectionWorker::spawn(self.targeting.clone())?;
        *self.lock_worker()? = Some(worker);

        let input = self
            .button
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?
            .take();
        if let Some(input) = input {
            let watcher = ButtonWatcher::spawn(input, self.controls.clone())?;
            *self
                .button_watcher
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))? = Some(watcher);
        }
        Ok(())
    }

    /// Detection input, available once the workers run
    pub fn detection_sender(
        &self,
    ) -> Option<tokio::sync::mpsc::Sender<targeting::DetectionFrame>> {
        self.lock_worker()
            .ok()
            .and_then(|worker| worker.as_ref().map(DetectionWorker::sender))
    }

    /// State handed to the control server
    pub fn app_state(&self) -> AppState {
        let mut state = AppState::new(
            self.config.clone(),
            self.laser.clone(),
            self.led.clone(),
            self.targeting.clone(),
            self.frames.clone(),
        );
        state.storage_path = self.options.storage_path.clone();
        state.start_time = self.start_time;
        state
    }

    /// Steady state reached
    pub fn finish_boot(&self) {
        self.led.clear_state(LedState::Boot);
        info!("Unit ready");
    }

    /// Arm or disarm; arming is refused in safe mode
    pub fn apply_armed(&self, armed: bool) -> anyhow::Result<()> {
        self.controls.apply_armed(armed)
    }

    /// Explicit way out of a latched safety fault
    pub fn reset_fault(&self) -> anyhow::Result<()> {
        self.controls.reset_fault()
    }

    /// Stop the button, targeting (laser off) and the uploader (queue persisted)
    pub fn stop_workers(&self) {
        let watcher = self.button_watcher.lock().ok().and_then(|mut w| w.take());
        if let Some(mut watcher) = watcher {
            watcher.stop();
        }
        let worker = self.lock_worker().ok().and_then(|mut w| w.take());
        if let Some(mut worker) = worker {
            worker.stop();
        }
        self.targeting.shutdown();
        self.uploader.stop();
    }

    /// Last step before exit: park the servos, laser off, LED dark
    pub fn park_hardware(&self) {
        if let Err(e) = self.servo.home() {
            warn!("Could not home servos: {}", e);
        }
        if let Err(e) = self.servo.disable() {
            warn!("Could not disable servos: {}", e);
        }
        self.laser.force_off("shutdown");
        self.led.stop();
        info!("Hardware parked");
    }

    fn lock_worker(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Option<DetectionWorker>>> {
        self.worker
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }
}
