//! Detection consumer thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::detection::DetectionFrame;
use crate::engine::TargetingEngine;
use crate::TargetingError;

/// Frames buffered between the vision pipeline and the engine
const QUEUE_DEPTH: usize = 8;

/// Runs the engine on its own thread.
///
/// Detection frames arrive over a bounded channel and are applied in
/// arrival order, followed by one engine tick per period.
pub struct DetectionWorker {
    sender: mpsc::Sender<DetectionFrame>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl DetectionWorker {
    pub fn spawn(engine: Arc<TargetingEngine>) -> Result<Self, TargetingError> {
        let tick = Duration::from_millis(engine.config()?.tick_ms.max(1));
        let (sender, mut receiver) = mpsc::channel::<DetectionFrame>(QUEUE_DEPTH);
        let running = Arc::new(AtomicBool::new(true));

        let flag = running.clone();
        let handle = std::thread::Builder::new()
            .name("targeting".into())
            .spawn(move || {
                info!("Targeting worker started (tick {:?})", tick);
                while flag.load(Ordering::SeqCst) {
                    while let Ok(frame) = receiver.try_recv() {
                        if let Err(e) = engine.process_frame(&frame, Instant::now()) {
                            warn!("Detection processing failed: {}", e);
                        }
                    }
                    if let Err(e) = engine.tick(Instant::now()) {
                        debug!("Targeting tick failed: {}", e);
                    }
                    std::thread::sleep(tick);
                }
                engine.shutdown();
                info!("Targeting worker stopped");
            })?;

        Ok(Self {
            sender,
            running,
            handle: Some(handle),
        })
    }

    /// Handle for producers; async code uses `send().await`, threads `blocking_send`
    pub fn sender(&self) -> mpsc::Sender<DetectionFrame> {
        self.sender.clone()
    }

    /// Queue a frame without waiting; full queues drop the frame
    pub fn submit(&self, frame: DetectionFrame) -> bool {
        match self.sender.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                debug!("Detection frame dropped: {}", e);
                false
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stop the thread and wait for it; the laser is off when this returns
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Targeting worker panicked");
            }
        }
    }
}

impl Drop for DetectionWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Detection, TargetingConfig, TargetingState};
    use coordinate_mapper::{CameraParams, CoordinateMapper};
    use laser::{LaserController, LaserLimits, MockLaserLine};
    use led::{LedConfig, LedController, RecordingLed};
    use servo::{MockPwm, ServoConfig, ServoController};

    fn engine(line: &MockLaserLine) -> Arc<TargetingEngine> {
        let servo = Arc::new(ServoController::new(
            ServoConfig::immediate(),
            Box::new(MockPwm::new()),
        ));
        servo.init().unwrap();
        let laser = Arc::new(LaserController::new(
            LaserLimits::default(),
            Box::new(line.clone()),
        ));
        laser.arm().unwrap();
        Arc::new(TargetingEngine::new(
            TargetingConfig::default(),
            servo,
            laser,
            Arc::new(CoordinateMapper::new(CameraParams::default())),
            Arc::new(LedController::new(
                LedConfig::default(),
                Box::new(RecordingLed::new()),
            )),
        ))
    }

    #[tokio::test]
    async fn test_worker_tracks_then_stops_with_laser_off() {
        let line = MockLaserLine::new();
        let engine = engine(&line);
        let mut worker = DetectionWorker::spawn(engine.clone()).unwrap();

        let frame = DetectionFrame::new(
            vec![Detection::new(310.0, 230.0, 20.0, 20.0, 0.9)],
            640,
            480,
        );
        worker.sender().send(frame).await.unwrap();

        let mut tracking = false;
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if engine.state().unwrap() == TargetingState::Tracking {
                tracking = true;
                break;
            }
        }
        assert!(tracking);
        assert!(line.is_on());

        worker.stop();
        assert!(!worker.is_running());
        assert!(!line.is_on());
        assert_eq!(engine.state().unwrap(), TargetingState::Idle);
    }

    #[test]
    fn test_target_released_without_detections() {
        let line = MockLaserLine::new();
        let engine = engine(&line);
        let mut worker = DetectionWorker::spawn(engine.clone()).unwrap();

        assert!(worker.submit(DetectionFrame::new(
            vec![Detection::new(310.0, 230.0, 20.0, 20.0, 0.9)],
            640,
            480,
        )));
        std::thread::sleep(Duration::from_millis(800));

        assert_eq!(engine.state().unwrap(), TargetingState::Idle);
        assert_eq!(engine.stats().unwrap().lost_count, 1);
        assert!(!line.is_on());
        worker.stop();
    }
}
