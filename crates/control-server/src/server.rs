//! Accept loop and per-connection handling

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::rate_limit::{create_limiter, PeerRateLimiter};
use crate::request::{parse_request, Request, RequestError, RequestLimits};
use crate::response::Response;
use crate::routes::{self, Route};
use crate::stream::{self, StreamSettings};
use crate::{AppState, ServerConfig, ServerError};

/// How long shutdown waits for in-flight connections
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Stops a running [`ControlServer`]; cheap to clone
#[derive(Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_shutdown(&self) -> bool {
        *self.tx.borrow()
    }
}

/// State every connection task needs
struct Shared {
    state: Arc<AppState>,
    limiter: Arc<PeerRateLimiter>,
    limits: RequestLimits,
    timeout: Duration,
    stream: StreamSettings,
    streaming: AtomicBool,
}

/// Clears the single stream slot however the stream ends
struct StreamSlot<'a>(&'a AtomicBool);

impl<'a> StreamSlot<'a> {
    fn claim(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for StreamSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// The unit's local HTTP control surface
pub struct ControlServer {
    listener: TcpListener,
    shared: Arc<Shared>,
    connections: Arc<Semaphore>,
    max_connections: u32,
    shutdown: Arc<watch::Sender<bool>>,
}

impl ControlServer {
    /// Bind the listener; requests are served once [`run`](Self::run) is awaited
    pub async fn bind(config: ServerConfig, state: Arc<AppState>) -> Result<Self, ServerError> {
        let limiter = create_limiter(&config.rate_limit)?;
        let listener = TcpListener::bind((config.bind_addr.as_str(), config.port)).await?;
        let max_connections = config.max_connections.max(1);
        let (shutdown, _) = watch::channel(false);

        info!(
            "Control server bound to {} (max {} connections)",
            listener.local_addr()?,
            max_connections
        );

        Ok(Self {
            listener,
            shared: Arc::new(Shared {
                state,
                limiter,
                limits: config.limits,
                timeout: Duration::from_millis(config.timeout_ms),
                stream: StreamSettings {
                    fps: config.stream_fps,
                    max_duration: Duration::from_secs(config.stream_max_secs),
                    jpeg_quality: config.jpeg_quality,
                    write_timeout: Duration::from_millis(config.timeout_ms),
                },
                streaming: AtomicBool::new(false),
            }),
            connections: Arc::new(Semaphore::new(max_connections)),
            max_connections: max_connections as u32,
            shutdown: Arc::new(shutdown),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: self.shutdown.clone(),
        }
    }

    /// Serve until shut down, then give open connections a moment to finish
    pub async fn run(self) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();

        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (socket, peer) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept failed: {}", e);
                            continue;
                        }
                    };

                    let Ok(permit) = self.connections.clone().try_acquire_owned() else {
                        warn!("All connection slots busy, rejecting {}", peer);
                        let wait = self.shared.timeout;
                        tokio::spawn(async move {
                            let mut socket = socket;
                            write_response(&mut socket, &Response::error(503, "Server busy"), wait).await;
                        });
                        continue;
                    };

                    let shared = self.shared.clone();
                    let shutdown = self.shutdown.subscribe();
                    tokio::spawn(async move {
                        handle_connection(shared, socket, peer, shutdown).await;
                        drop(permit);
                    });
                }
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Control server stopping");
        drop(self.listener);
        match timeout(DRAIN_TIMEOUT, self.connections.acquire_many(self.max_connections)).await {
            Ok(Ok(_)) => debug!("All connections drained"),
            Ok(Err(e)) => warn!("Connection drain aborted: {}", e),
            Err(_) => warn!("Connections still open after {:?}", DRAIN_TIMEOUT),
        }
        info!("Control server stopped");
        Ok(())
    }
}

async fn handle_connection(
    shared: Arc<Shared>,
    mut socket: TcpStream,
    peer: SocketAddr,
    shutdown: watch::Receiver<bool>,
) {
    if shared.limiter.check_key(&peer.ip()).is_err() {
        debug!("Rate limited {}", peer);
        respond(&mut socket, "rate_limited", &Response::error(429, "Too many requests"), shared.timeout).await;
        return;
    }

    let request = match timeout(shared.timeout, read_request(&mut socket, &shared.limits)).await {
        Ok(Ok(request)) => request,
        Ok(Err(RequestError::Truncated)) => {
            debug!("{} closed before sending a request", peer);
            return;
        }
        Ok(Err(e)) => {
            warn!("Bad request from {}: {}", peer, e);
            respond(&mut socket, "invalid", &Response::error(400, e.to_string()), shared.timeout).await;
            return;
        }
        Err(_) => {
            warn!("Request timeout from {}", peer);
            respond(&mut socket, "timeout", &Response::error(408, "Request timeout"), shared.timeout).await;
            return;
        }
    };
    debug!("{} {} from {}", request.method, request.target, peer);

    let route = match routes::route(&request.method, request.path()) {
        Ok(route) => route,
        Err(response) => {
            respond(&mut socket, "unmatched", &response, shared.timeout).await;
            return;
        }
    };

    if route == Route::Stream {
        serve_stream(&shared, socket, peer, shutdown).await;
        return;
    }

    // Handlers take std locks and may write config to disk
    let state = shared.state.clone();
    let response = match tokio::task::spawn_blocking(move || routes::handle(&state, route, &request)).await {
        Ok(response) => response,
        Err(e) => {
            error!("Handler task failed: {}", e);
            Response::error(500, "Internal server error")
        }
    };
    respond(&mut socket, route_label(route), &response, shared.timeout).await;
}

async fn serve_stream(shared: &Shared, mut socket: TcpStream, peer: SocketAddr, shutdown: watch::Receiver<bool>) {
    let Some(_slot) = StreamSlot::claim(&shared.streaming) else {
        info!("Stream requested by {} while another is active", peer);
        respond(&mut socket, "stream", &Response::error(503, "Stream already active"), shared.timeout).await;
        return;
    };

    metrics::counter!("http_requests_total", "route" => "stream", "status" => "200").increment(1);
    info!("Stream started for {}", peer);
    let end = stream::serve(&mut socket, shared.state.frames.clone(), &shared.stream, shutdown).await;
    debug!("Stream for {} ended: {:?}", peer, end);
}

/// Read until a full request is parsed
async fn read_request(socket: &mut TcpStream, limits: &RequestLimits) -> Result<Request, RequestError> {
    let cap = limits.max_header + limits.max_body + 4;
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = socket
            .read(&mut chunk)
            .await
            .map_err(|_| RequestError::Truncated)?;
        if n == 0 {
            return Err(RequestError::Truncated);
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some(request) = parse_request(&buf, limits)? {
            return Ok(request);
        }
        if buf.len() > cap {
            return Err(RequestError::HeaderTooLarge);
        }
    }
}

async fn respond(socket: &mut TcpStream, route: &'static str, response: &Response, wait: Duration) {
    metrics::counter!(
        "http_requests_total",
        "route" => route,
        "status" => response.status.to_string()
    )
    .increment(1);
    write_response(socket, response, wait).await;
}

async fn write_response(socket: &mut TcpStream, response: &Response, wait: Duration) {
    let bytes = response.to_bytes();
    let write = async {
        socket.write_all(&bytes).await?;
        socket.shutdown().await
    };
    match timeout(wait, write).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!("Response write failed: {}", e),
        Err(_) => debug!("Response write timed out"),
    }
}

fn route_label(route: Route) -> &'static str {
    match route {
        Route::Preflight => "preflight",
        Route::Status => "status",
        Route::Arm => "arm",
        Route::Disarm => "disarm",
        Route::GetConfig | Route::UpdateConfig => "config",
        Route::Stream => "stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_stream_slot() {
        let flag = AtomicBool::new(false);
        let first = StreamSlot::claim(&flag).unwrap();
        assert!(StreamSlot::claim(&flag).is_none());
        drop(first);
        assert!(StreamSlot::claim(&flag).is_some());
    }

    #[test]
    fn test_shutdown_handle_without_running_server() {
        let (tx, _) = watch::channel(false);
        let handle = ShutdownHandle { tx: Arc::new(tx) };
        handle.shutdown();
        assert!(handle.is_shutdown());
    }

    mod api {
        //! End-to-end over a real listening socket

        use std::net::SocketAddr;
        use std::sync::Arc;
        use std::time::{Duration, Instant};

        use crate::{AppState, ControlServer, RateLimitConfig, ServerConfig, ShutdownHandle};
        use coordinate_mapper::{CameraParams, CoordinateMapper};
        use frame_source::{FrameSource, TestPattern};
        use laser::{LaserController, LaserLimits, LaserState, MockLaserLine};
        use led::{LedConfig, LedController, LedState, RecordingLed};
        use serde_json::Value;
        use servo::{MockPwm, ServoConfig, ServoController};
        use targeting::{Detection, DetectionFrame, TargetingConfig, TargetingEngine, TargetingState};
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpStream;
        use tokio::time::timeout;
        use unit_config::{ConfigStore, UnitConfig};

        struct Harness {
            addr: SocketAddr,
            shutdown: ShutdownHandle,
            state: Arc<AppState>,
            line: MockLaserLine,
            storage: tempfile::TempDir,
        }

        async fn start(max_connections: usize) -> Harness {
            let pwm = MockPwm::new();
            let servo = Arc::new(ServoController::new(ServoConfig::immediate(), Box::new(pwm)));
            servo.init().unwrap();

            let line = MockLaserLine::new();
            let laser = Arc::new(LaserController::new(LaserLimits::default(), Box::new(line.clone())));
            let led = Arc::new(LedController::new(LedConfig::default(), Box::new(RecordingLed::new())));
            let mapper = Arc::new(CoordinateMapper::new(CameraParams::default()));
            let targeting = Arc::new(TargetingEngine::new(
                TargetingConfig::default(),
                servo,
                laser.clone(),
                mapper,
                led.clone(),
            ));
            let frames: Arc<dyn FrameSource> = Arc::new(TestPattern::new(64, 48));
            let config = Arc::new(ConfigStore::in_memory(UnitConfig::default()));

            let storage = tempfile::tempdir().unwrap();
            let mut state = AppState::new(config, laser, led, targeting, frames);
            state.storage_path = storage.path().to_path_buf();
            let state = Arc::new(state);

            let server_config = ServerConfig {
                bind_addr: "127.0.0.1".to_string(),
                port: 0,
                max_connections,
                timeout_ms: 500,
                rate_limit: RateLimitConfig {
                    per_second: 1,
                    burst_size: 100,
                },
                ..ServerConfig::default()
            };
            let server = ControlServer::bind(server_config, state.clone()).await.unwrap();
            let addr = server.local_addr().unwrap();
            let shutdown = server.shutdown_handle();
            tokio::spawn(server.run());

            Harness {
                addr,
                shutdown,
                state,
                line,
                storage,
            }
        }

        /// Send raw bytes, read until the server closes
        async fn exchange(addr: SocketAddr, raw: &[u8]) -> (u16, String, Vec<u8>) {
            let mut socket = TcpStream::connect(addr).await.unwrap();
            socket.write_all(raw).await.unwrap();
            let mut out = Vec::new();
            timeout(Duration::from_secs(5), socket.read_to_end(&mut out))
                .await
                .unwrap()
                .unwrap();
            split_response(&out)
        }

        fn split_response(out: &[u8]) -> (u16, String, Vec<u8>) {
            let end = out
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("response head");
            let head = String::from_utf8(out[..end].to_vec()).unwrap();
            let status = head.split(' ').nth(1).unwrap().parse().unwrap();
            (status, head, out[end + 4..].to_vec())
        }

        async fn get(addr: SocketAddr, path: &str) -> (u16, Value) {
            let raw = format!("GET {} HTTP/1.1\r\nHost: unit\r\n\r\n", path);
            let (status, _, body) = exchange(addr, raw.as_bytes()).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        async fn post(addr: SocketAddr, path: &str, body: &str) -> (u16, Value) {
            let raw = format!(
                "POST {} HTTP/1.1\r\nHost: unit\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{}",
                path,
                body.len(),
                body
            );
            let (status, _, body) = exchange(addr, raw.as_bytes()).await;
            (status, serde_json::from_slice(&body).unwrap())
        }

        #[tokio::test]
        async fn test_status_reports_unit_state() {
            let h = start(4).await;
            let (status, body) = get(h.addr, "/status").await;

            assert_eq!(status, 200);
            assert_eq!(body["armed"], false);
            assert_eq!(body["detection_enabled"], true);
            assert_eq!(body["detections_today"], 0);
            assert_eq!(body["firmware_version"], "1.0.0");
            assert!(body["uptime_seconds"].is_u64());
            assert!(body["storage_free_mb"].is_u64());
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_disarmed_unit_tracks_without_firing() {
            let h = start(4).await;

            let (status, body) = post(h.addr, "/arm", "").await;
            assert_eq!(status, 200);
            assert_eq!(body["armed"], true);
            assert!(h.state.laser.is_armed());
            assert!(h.state.led.is_state_set(LedState::Armed));

            let (status, body) = post(h.addr, "/disarm", "").await;
            assert_eq!(status, 200);
            assert_eq!(body["armed"], false);
            assert!(h.state.led.is_state_set(LedState::Disarmed));
            assert!(!h.state.led.is_state_set(LedState::Armed));

            let frame = DetectionFrame::new(vec![Detection::new(400.0, 200.0, 30.0, 30.0, 0.9)], 640, 480);
            let state = h.state.targeting.process_frame(&frame, Instant::now()).unwrap();
            assert_eq!(state, TargetingState::Tracking);
            assert!(h.state.targeting.current_target().unwrap().is_some());
            assert!(!h.line.is_on());
            assert_eq!(h.state.laser.state().unwrap(), LaserState::Off);

            let (_, body) = get(h.addr, "/status").await;
            assert_eq!(body["armed"], false);
            assert_eq!(body["detections_today"], 1);
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_arm_refused_while_kill_switch_engaged() {
            let h = start(4).await;
            h.state.laser.kill_switch().unwrap();

            let (status, body) = post(h.addr, "/arm", "").await;
            assert_eq!(status, 400);
            assert_eq!(body["code"], 400);
            assert!(body["error"].as_str().unwrap().starts_with("Cannot arm"));
            assert!(!h.state.config.is_armed().unwrap());
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_routing_errors() {
            let h = start(4).await;

            let (status, body) = get(h.addr, "/nope").await;
            assert_eq!(status, 404);
            assert_eq!(body, serde_json::json!({ "error": "Endpoint not found: /nope", "code": 404 }));

            let (status, body) = post(h.addr, "/status", "").await;
            assert_eq!(status, 405);
            assert_eq!(body["error"], "Use GET for /status");

            let (status, _, body) = exchange(h.addr, b"NONSENSE\r\n\r\n").await;
            assert_eq!(status, 400);
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["code"], 400);

            let (status, head, body) =
                exchange(h.addr, b"OPTIONS /config HTTP/1.1\r\nOrigin: http://dash\r\n\r\n").await;
            assert_eq!(status, 204);
            assert!(head.contains("Access-Control-Allow-Methods: GET, POST, OPTIONS"));
            assert!(body.is_empty());
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_oversized_body_rejected() {
            let h = start(4).await;
            let raw = "POST /config HTTP/1.1\r\nContent-Length: 5000\r\n\r\n";
            let (status, _, _) = exchange(h.addr, raw.as_bytes()).await;
            assert_eq!(status, 400);
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_stalled_client_times_out() {
            let h = start(4).await;
            let (status, _, _) = exchange(h.addr, b"GET /status HTTP/1.1\r\n").await;
            assert_eq!(status, 408);

            // The server keeps serving after a stalled client
            let (status, _) = get(h.addr, "/status").await;
            assert_eq!(status, 200);
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_config_update_validation() {
            let h = start(4).await;

            let (status, body) = post(h.addr, "/config", "").await;
            assert_eq!(status, 400);
            assert_eq!(body["error"], "Request body required");

            let (status, body) = post(h.addr, "/config", r#"{"detection":{"fps":99}}"#).await;
            assert_eq!(status, 400);
            assert_eq!(body["field"], "detection.fps");
            assert_eq!(body["error"], "Value must be between 1 and 30");
            assert_eq!(h.state.config.snapshot().unwrap().detection.fps, 10);

            let (status, body) = post(h.addr, "/config", "not json").await;
            assert_eq!(status, 400);
            assert_eq!(body["field"], "_json");

            let (status, body) = post(
                h.addr,
                "/config",
                r#"{"server":{"api_key":"secret-key"},"laser":{"cooldown_seconds":20}}"#,
            )
            .await;
            assert_eq!(status, 200);
            assert_eq!(body["server"]["api_key"], "***");
            assert_eq!(body["laser"]["cooldown_seconds"], 20);

            let (_, body) = get(h.addr, "/config").await;
            assert_eq!(body["server"]["api_key"], "***");
            assert_eq!(h.state.config.snapshot().unwrap().server.api_key, "secret-key");
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_arm_refused_in_safe_mode() {
            let h = start(4).await;
            h.state.targeting.fault("servo fault");
            assert!(h.state.in_safe_mode());

            let (status, body) = post(h.addr, "/arm", "").await;
            assert_eq!(status, 400);
            assert_eq!(body["error"], "Cannot arm: system is in safe mode. Manual reset required.");
            assert!(!h.state.laser.is_armed());
            assert!(!h.state.config.is_armed().unwrap());

            let (_, body) = get(h.addr, "/status").await;
            assert_eq!(body["armed"], false);

            // Disarm still works in safe mode
            let (status, _) = post(h.addr, "/disarm", "").await;
            assert_eq!(status, 200);

            h.state.targeting.reset().unwrap();
            let (status, _) = post(h.addr, "/arm", "").await;
            assert_eq!(status, 200);
            h.shutdown.shutdown();
        }

        /// Read from a stream connection until one complete frame part has arrived
        async fn read_first_part(socket: &mut TcpStream) -> Vec<u8> {
            let mut buf = Vec::new();
            let mut chunk = [0u8; 4096];
            loop {
                let n = timeout(Duration::from_secs(5), socket.read(&mut chunk))
                    .await
                    .unwrap()
                    .unwrap();
                assert!(n > 0, "stream closed early");
                buf.extend_from_slice(&chunk[..n]);

                let text = String::from_utf8_lossy(&buf).to_string();
                let Some(part) = text.find("--frame\r\n") else { continue };
                let Some(len_at) = text[part..].find("Content-Length: ") else { continue };
                let len_start = part + len_at + "Content-Length: ".len();
                let Some(len_end) = text[len_start..].find("\r\n") else { continue };
                let len: usize = text[len_start..len_start + len_end].parse().unwrap();
                let data_start = len_start + len_end + 4;
                if buf.len() >= data_start + len + 2 {
                    assert_eq!(&buf[data_start..data_start + 2], &[0xFF, 0xD8]);
                    assert_eq!(&buf[data_start + len..data_start + len + 2], b"\r\n");
                    return buf;
                }
            }
        }

        #[tokio::test]
        async fn test_stream_sends_jpeg_parts_and_allows_one_client() {
            let h = start(4).await;

            let mut first = TcpStream::connect(h.addr).await.unwrap();
            first.write_all(b"GET /stream HTTP/1.1\r\n\r\n").await.unwrap();
            let buf = read_first_part(&mut first).await;
            let head = String::from_utf8_lossy(&buf);
            assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
            assert!(head.contains("Content-Type: multipart/x-mixed-replace; boundary=frame\r\n"));

            let (status, _, body) = exchange(h.addr, b"GET /stream HTTP/1.1\r\n\r\n").await;
            assert_eq!(status, 503);
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["error"], "Stream already active");

            // Client disconnect frees the slot
            drop(first);
            let mut reopened = None;
            for _ in 0..20 {
                tokio::time::sleep(Duration::from_millis(150)).await;
                let mut socket = TcpStream::connect(h.addr).await.unwrap();
                socket.write_all(b"GET /stream HTTP/1.1\r\n\r\n").await.unwrap();
                let mut head = [0u8; 12];
                if socket.read_exact(&mut head).await.is_ok() && &head == b"HTTP/1.1 200" {
                    reopened = Some(socket);
                    break;
                }
            }
            assert!(reopened.is_some());
            h.shutdown.shutdown();
        }

        #[tokio::test]
        async fn test_busy_when_all_slots_taken() {
            let h = start(1).await;

            let mut stream = TcpStream::connect(h.addr).await.unwrap();
            stream.write_all(b"GET /stream HTTP/1.1\r\n\r\n").await.unwrap();
            read_first_part(&mut stream).await;

            let (status, _, body) = exchange(h.addr, b"GET /status HTTP/1.1\r\n\r\n").await;
            assert_eq!(status, 503);
            let body: Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(body["error"], "Server busy");

            h.shutdown.shutdown();
            drop(h.storage);
        }
    }
}
