//! Control Server
//!
//! Minimal HTTP/1.1 server over raw `tokio` sockets, the unit's local
//! control surface:
//! - `GET /status`, `POST /arm`, `POST /disarm`
//! - `GET /config` (secrets masked), `POST /config` (validated partial update)
//! - `GET /stream` (MJPEG, one client at a time)
//!
//! Connections are capped, requests are size-bounded and time-limited,
//! and each peer IP is rate limited.

mod disk;
pub mod rate_limit;
pub mod request;
pub mod response;
mod routes;
mod server;
pub mod stream;

pub use disk::storage_free_mb;
pub use rate_limit::RateLimitConfig;
pub use request::{parse_request, Request, RequestError, RequestLimits};
pub use response::Response;
pub use server::{ControlServer, ShutdownHandle};
pub use stream::{StreamEnd, StreamSettings};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use frame_source::FrameSource;
use laser::{LaserController, LaserState};
use led::LedController;
use serde::{Deserialize, Serialize};
use targeting::{TargetingEngine, TargetingState};
use thiserror::Error;
use unit_config::ConfigStore;

/// Firmware version reported on `/status` and in heartbeats
pub const FIRMWARE_VERSION: &str = "1.0.0";

/// Server error types
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid rate limit: {0}")]
    RateLimit(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    pub bind_addr: String,
    /// Listen port (0 picks a free one)
    pub port: u16,
    /// Concurrent connections, including an active stream
    pub max_connections: usize,
    /// Time allowed to receive a request and write its response (milliseconds)
    pub timeout_ms: u64,
    /// Longest a single `/stream` may run (seconds)
    pub stream_max_secs: u64,
    /// Stream frame rate
    pub stream_fps: u32,
    /// JPEG quality for streamed frames (1-100)
    pub jpeg_quality: u8,
    pub rate_limit: RateLimitConfig,
    pub limits: RequestLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 8080,
            max_connections: 4,
            timeout_ms: 5000,
            stream_max_secs: 300,
            stream_fps: 10,
            jpeg_quality: 80,
            rate_limit: RateLimitConfig::lenient(),
            limits: RequestLimits::default(),
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub laser: Arc<LaserController>,
    pub led: Arc<LedController>,
    pub targeting: Arc<TargetingEngine>,
    pub frames: Arc<dyn FrameSource>,
    /// Filesystem queried for `storage_free_mb`
    pub storage_path: PathBuf,
    /// Version string
    pub version: String,
    /// Start time
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<ConfigStore>,
        laser: Arc<LaserController>,
        led: Arc<LedController>,
        targeting: Arc<TargetingEngine>,
        frames: Arc<dyn FrameSource>,
    ) -> Self {
        Self {
            config,
            laser,
            led,
            targeting,
            frames,
            storage_path: PathBuf::from("/data"),
            version: FIRMWARE_VERSION.to_string(),
            start_time: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// A latched safety fault that only an explicit reset clears.
    /// An unreadable state counts as a fault.
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
}
