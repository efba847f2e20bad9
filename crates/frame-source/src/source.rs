//! Latest-frame contract

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use tracing::debug;

use crate::frame::VideoFrame;

/// Anything that can hand out the most recent camera frame
pub trait FrameSource: Send + Sync {
    /// Latest frame, `None` if nothing has been captured yet
    fn latest_frame(&self) -> Option<Arc<VideoFrame>>;
}

/// Single-slot mailbox written by the capture pipeline.
///
/// Readers always get the newest frame; older frames are dropped, never
/// queued.
#[derive(Default)]
pub struct SharedFrame {
    slot: RwLock<Option<Arc<VideoFrame>>>,
}

impl SharedFrame {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current frame
    pub fn publish(&self, frame: VideoFrame) {
        match self.slot.write() {
            Ok(mut slot) => *slot = Some(Arc::new(frame)),
            Err(e) => debug!("Frame publish skipped: {}", e),
        }
    }
}

impl FrameSource for SharedFrame {
    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        self.slot.read().ok().and_then(|slot| slot.clone())
    }
}

/// Synthetic moving gradient, for hosts without a camera
pub struct TestPattern {
    width: u32,
    height: u32,
    started: Instant,
    sequence: AtomicU32,
}

impl TestPattern {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            started: Instant::now(),
            sequence: AtomicU32::new(0),
        }
    }
}

impl FrameSource for TestPattern {
    fn latest_frame(&self) -> Option<Arc<VideoFrame>> {
        let elapsed = self.started.elapsed();
        let shift = ((elapsed.as_millis() / 40) % self.width.max(1) as u128) as u32;
        let (w, h) = (self.width.max(1), self.height.max(1));

        let mut data = Vec::with_capacity((w * h * 3) as usize);
        for y in 0..h {
            for x in 0..w {
                let r = (((x + shift) % w) * 255 / w) as u8;
                let g = (y * 255 / h) as u8;
                data.extend_from_slice(&[r, g, 96]);
            }
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        VideoFrame::new(data, w, h, elapsed.as_nanos() as u64, sequence)
            .ok()
            .map(Arc::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_frame_keeps_latest() {
        let shared = SharedFrame::new();
        assert!(shared.latest_frame().is_none());

        shared.publish(VideoFrame::new(vec![0; 12], 2, 2, 1, 1).unwrap());
        shared.publish(VideoFrame::new(vec![0; 12], 2, 2, 2, 2).unwrap());
        assert_eq!(shared.latest_frame().unwrap().sequence, 2);
    }

    #[test]
    fn test_pattern_produces_frames() {
        let pattern = TestPattern::new(32, 24);
        let first = pattern.latest_frame().unwrap();
        let second = pattern.latest_frame().unwrap();
        assert_eq!(first.width, 32);
        assert_eq!(first.data.len(), 32 * 24 * 3);
        assert_eq!(second.sequence, first.sequence + 1);
    }
}
