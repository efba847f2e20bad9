//! Camera Frame Source
//!
//! The unit does not own the camera. The capture pipeline publishes frames
//! into a [`SharedFrame`] slot and consumers (the live stream) pull the
//! latest one through [`FrameSource`].
//! Supports:
//! - RGB24 frames with JPEG encoding
//! - A moving test pattern for hosts without a camera

mod frame;
mod source;

pub use frame::VideoFrame;
pub use source::{FrameSource, SharedFrame, TestPattern};

use thiserror::Error;

/// Frame error types
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Frame buffer size {actual} does not match {width}x{height} RGB")]
    BufferSize {
        width: u32,
        height: u32,
        actual: usize,
    },

    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}
