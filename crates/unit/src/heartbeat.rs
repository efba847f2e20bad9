//! Periodic check-in with the backend

use std::sync::Arc;
use std::time::Duration;

use control_server::{storage_free_mb, FIRMWARE_VERSION};
use led::LedState;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::context::UnitContext;

/// Backend endpoint, relative to the server URL
pub const HEARTBEAT_ENDPOINT: &str = "/api/units/heartbeat";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Body of each heartbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub armed: bool,
    pub firmware_version: String,
    pub uptime_seconds: u64,
    pub free_storage_mb: u64,
    pub pending_clips: usize,
}

#[derive(Debug, Default, Deserialize)]
struct HeartbeatReply {
    #[serde(default)]
    config: Option<RemoteConfig>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteConfig {
    #[serde(default)]
    armed: Option<bool>,
}

/// What one heartbeat achieved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    /// No server configured
    Skipped,
    /// 200; `armed` is the server's wish, if it sent one
    Online { armed: Option<bool> },
    /// Any other status
    Rejected(u16),
    /// Request never completed
    Unreachable(String),
}

/// Heartbeat sender
pub struct Heartbeat {
    ctx: Arc<UnitContext>,
    client: reqwest::Client,
}

impl Heartbeat {
    pub fn new(ctx: Arc<UnitContext>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { ctx, client })
    }

    pub fn report(&self) -> anyhow::Result<HeartbeatReport> {
        Ok(HeartbeatReport {
            armed: self.ctx.config.is_armed()?,
            firmware_version: FIRMWARE_VERSION.to_string(),
            uptime_seconds: self.ctx.uptime_seconds(),
            free_storage_mb: storage_free_mb(&self.ctx.options().storage_path),
            pending_clips: self.ctx.uploader.pending_count(),
        })
    }

    /// Send one heartbeat and apply the result to the LED and arming
    pub async fn beat(&self) -> HeartbeatOutcome {
        let outcome = self.send().await;
        self.apply(&outcome);
        outcome
    }

    async fn send(&self) -> HeartbeatOutcome {
        let credentials = match self.ctx.config.server_credentials() {
            Ok(Some(credentials)) => credentials,
            Ok(None) => return HeartbeatOutcome::Skipped,
            Err(e) => return HeartbeatOutcome::Unreachable(e.to_string()),
        };
        let (url, api_key) = credentials;
        let report = match self.report() {
            Ok(report) => report,
            Err(e) => return HeartbeatOutcome::Unreachable(e.to_string()),
        };

        let endpoint = format!("{}{}", url.trim_end_matches('/'), HEARTBEAT_ENDPOINT);
        debug!("Heartbeat to {}", endpoint);
        let response = match self
            .client
            .post(&endpoint)
            .header("X-API-Key", api_key)
            .json(&report)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return HeartbeatOutcome::Unreachable(e.to_string()),
        };

        let status = response.status().as_u16();
        if status != 200 {
            return HeartbeatOutcome::Rejected(status);
        }
        let reply: HeartbeatReply = response.json().await.unwrap_or_default();
        HeartbeatOutcome::Online {
            armed: reply.config.and_then(|c| c.armed),
        }
    }

    fn apply(&self, outcome: &HeartbeatOutcome) {
        match outcome {
            HeartbeatOutcome::Skipped => debug!("Heartbeat skipped: no server configured"),
            HeartbeatOutcome::Online { armed } => {
                if self.ctx.led.is_state_set(LedState::Offline) {
                    info!("Backend reachable again");
                }
                self.ctx.led.clear_state(LedState::Offline);
                if let Some(wanted) = *armed {
                    let current = self.ctx.config.is_armed().unwrap_or(!wanted);
                    if current != wanted {
                        info!("Server requested armed={}", wanted);
                        if let Err(e) = self.ctx.apply_armed(wanted) {
                            warn!("Could not apply server arming: {}", e);
                        }
                    }
                }
            }
            HeartbeatOutcome::Rejected(status @ (401 | 403)) => {
                error!("Heartbeat authentication failed ({}), check the API key", status);
                self.ctx.led.set_state(LedState::Offline);
            }
            HeartbeatOutcome::Rejected(status) => {
                warn!("Heartbeat rejected with status {}", status);
                self.ctx.led.set_state(LedState::Offline);
            }
            HeartbeatOutcome::Unreachable(reason) => {
                warn!("Heartbeat failed: {}", reason);
                self.ctx.led.set_state(LedState::Offline);
            }
        }
    }

    /// Beat every `server.heartbeat_interval_seconds` until shutdown
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("Heartbeat task started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.beat().await;

            let interval = self
                .ctx
                .config
                .snapshot()
                .map(|c| c.server.heartbeat_interval_seconds)
                .unwrap_or(60);
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(u64::from(interval))) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Heartbeat task stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use crate::button::MockButton;
    use crate::context::{Hardware, UnitOptions};
    use clip_uploader::MockTransport;
    use laser::MockLaserLine;
    use led::LogLed;
    use serde_json::Value;
    use servo::{MockPwm, ServoConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use unit_config::UnitConfig;

    fn context(dir: &Path, server_url: &str) -> Arc<UnitContext> {
        let options = UnitOptions {
            config_path: dir.join("config.json"),
            calibration_path: dir.join("calibration.json"),
            queue_path: dir.join("upload_queue.json"),
            storage_path: dir.to_path_buf(),
            servo: ServoConfig::immediate(),
            test_pattern: true,
            ..UnitOptions::production()
        };

        let mut config = UnitConfig::default();
        config.server.url = server_url.to_string();
        config.server.api_key = "unit-key".to_string();
        std::fs::write(&options.config_path, serde_json::to_string(&config).unwrap()).unwrap();

        let hardware = Hardware {
            pwm: Box::new(MockPwm::new()),
            laser_line: Box::new(MockLaserLine::new()),
            led: Box::new(LogLed::default()),
            transport: Arc::new(MockTransport::new()),
            button: Box::new(MockButton::new()),
        };
        Arc::new(UnitContext::build(options, hardware).unwrap())
    }

    /// Serve exactly one request with `status` and `body`; hands back the raw request
    async fn one_shot_backend(status: &'static str, body: &'static str) -> (String, oneshot::Receiver<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = Vec::new();
            let mut chunk = [0u8; 2048];
            loop {
                let n = socket.read(&mut chunk).await.unwrap();
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
                let text = String::from_utf8_lossy(&buf).to_string();
                if let Some(head_end) = text.find("\r\n\r\n") {
                    let length = text[..head_end]
                        .lines()
                        .find_map(|l| {
                            let (name, value) = l.split_once(':')?;
                            name.eq_ignore_ascii_case("content-length")
                                .then(|| value.trim().parse::<usize>().ok())
                                .flatten()
                        })
                        .unwrap_or(0);
                    if buf.len() >= head_end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            let _ = tx.send(String::from_utf8_lossy(&buf).to_string());
        });

        (format!("http://{}", addr), rx)
    }

    #[tokio::test]
    async fn test_heartbeat_reports_and_applies_remote_arming() {
        let dir = tempfile::tempdir().unwrap();
        let (url, request) = one_shot_backend("200 OK", r#"{"config":{"armed":true}}"#).await;
        let ctx = context(dir.path(), &url);
        ctx.led.set_state(LedState::Offline);

        let heartbeat = Heartbeat::new(ctx.clone()).unwrap();
        let outcome = heartbeat.beat().await;
        assert_eq!(outcome, HeartbeatOutcome::Online { armed: Some(true) });

        let raw = request.await.unwrap();
        assert!(raw.starts_with("POST /api/units/heartbeat HTTP/1.1"));
        assert!(raw.to_ascii_lowercase().contains("x-api-key: unit-key"));
        let body: Value = serde_json::from_str(&raw[raw.find("\r\n\r\n").unwrap() + 4..]).unwrap();
        assert_eq!(body["armed"], false);
        assert_eq!(body["firmware_version"], "1.0.0");
        assert_eq!(body["pending_clips"], 0);
        assert!(body["free_storage_mb"].is_u64());

        assert!(!ctx.led.is_state_set(LedState::Offline));
        assert!(ctx.laser.is_armed());
        assert!(ctx.config.is_armed().unwrap());
        assert!(ctx.led.is_state_set(LedState::Armed));
        ctx.park_hardware();
    }

    #[tokio::test]
    async fn test_auth_failure_marks_offline() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _request) = one_shot_backend("401 Unauthorized", r#"{"error":"bad key"}"#).await;
        let ctx = context(dir.path(), &url);

        let outcome = Heartbeat::new(ctx.clone()).unwrap().beat().await;
        assert_eq!(outcome, HeartbeatOutcome::Rejected(401));
        assert!(ctx.led.is_state_set(LedState::Offline));
        assert!(!ctx.laser.is_armed());
        ctx.park_hardware();
    }

    #[tokio::test]
    async fn test_unreachable_backend_marks_offline() {
        let dir = tempfile::tempdir().unwrap();
        let closed = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", closed.local_addr().unwrap());
        drop(closed);
        let ctx = context(dir.path(), &url);

        let outcome = Heartbeat::new(ctx.clone()).unwrap().beat().await;
        assert!(matches!(outcome, HeartbeatOutcome::Unreachable(_)));
        assert!(ctx.led.is_state_set(LedState::Offline));
        ctx.park_hardware();
    }

    #[tokio::test]
    async fn test_no_server_configured_skips() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), "");

        let outcome = Heartbeat::new(ctx.clone()).unwrap().beat().await;
        assert_eq!(outcome, HeartbeatOutcome::Skipped);
        assert!(!ctx.led.is_state_set(LedState::Offline));
        ctx.park_hardware();
    }

    #[tokio::test]
    async fn test_remote_arming_refused_in_safe_mode() {
        let dir = tempfile::tempdir().unwrap();
        let (url, _request) = one_shot_backend("200 OK", r#"{"config":{"armed":true}}"#).await;
        let ctx = context(dir.path(), &url);
        ctx.targeting.fault("servo fault");

        let outcome = Heartbeat::new(ctx.clone()).unwrap().beat().await;
        assert_eq!(outcome, HeartbeatOutcome::Online { armed: Some(true) });
        assert!(!ctx.laser.is_armed());
        assert!(!ctx.config.is_armed().unwrap());
        assert_eq!(ctx.led.active_state(), LedState::Error);
        ctx.park_hardware();
    }
}
