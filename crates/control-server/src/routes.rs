//! Route table and JSON handlers

use laser::{LaserError, LaserLimits};
use led::LedState;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use unit_config::ConfigError;

use crate::disk::storage_free_mb;
use crate::request::Request;
use crate::response::Response;
use crate::AppState;

/// Longest path echoed back in a 404
const MAX_ECHOED_PATH: usize = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Route {
    Preflight,
    Status,
    Arm,
    Disarm,
    GetConfig,
    UpdateConfig,
    Stream,
}

/// Resolve a route by exact path match
pub(crate) fn route(method: &str, path: &str) -> Result<Route, Response> {
    if method == "OPTIONS" {
        return Ok(Route::Preflight);
    }
    let known = matches!(path, "/status" | "/arm" | "/disarm" | "/config" | "/stream");
    if !known {
        return Err(Response::error(
            404,
            format!("Endpoint not found: {}", sanitize_path(path)),
        ));
    }

    match (path, method) {
        ("/status", "GET") => Ok(Route::Status),
        ("/arm", "POST") => Ok(Route::Arm),
        ("/disarm", "POST") => Ok(Route::Disarm),
        ("/config", "GET") => Ok(Route::GetConfig),
        ("/config", "POST") => Ok(Route::UpdateConfig),
        ("/stream", "GET") => Ok(Route::Stream),
        ("/status", _) => Err(Response::error(405, "Use GET for /status")),
        ("/arm", _) => Err(Response::error(405, "Use POST for /arm")),
        ("/disarm", _) => Err(Response::error(405, "Use POST for /disarm")),
        ("/config", _) => Err(Response::error(405, "Use GET or POST for /config")),
        _ => Err(Response::error(405, "Use GET for /stream")),
    }
}

/// Printable ASCII only, capped so a hostile path cannot bloat the reply
fn sanitize_path(path: &str) -> String {
    path.chars()
        .take(MAX_ECHOED_PATH)
        .map(|c| if (' '..='~').contains(&c) { c } else { '?' })
        .collect()
}

/// Run a non-streaming route
pub(crate) fn handle(state: &AppState, route: Route, request: &Request) -> Response {
    match route {
        Route::Preflight => Response::preflight(),
        Route::Status => status(state),
        Route::Arm => arm(state),
        Route::Disarm => disarm(state),
        Route::GetConfig => get_config(state),
        Route::UpdateConfig => update_config(state, request),
        Route::Stream => Response::error(500, "Stream must be served by the connection task"),
    }
}

/// `GET /status` body
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub armed: bool,
    pub detection_enabled: bool,
    pub uptime_seconds: u64,
    pub detections_today: u64,
    pub storage_free_mb: u64,
    pub firmware_version: String,
}

fn status(state: &AppState) -> Response {
    let snapshot = match state.config.snapshot() {
        Ok(snapshot) => snapshot,
        Err(e) => {
            error!("Status: config unavailable: {}", e);
            return Response::error(500, "Configuration unavailable");
        }
    };
    let detections_today = state
        .targeting
        .stats()
        .map(|stats| stats.detections_today)
        .unwrap_or(0);

    let body = StatusResponse {
        armed: snapshot.armed,
        detection_enabled: snapshot.detection.enabled,
        uptime_seconds: state.uptime_seconds(),
        detections_today,
        storage_free_mb: storage_free_mb(&state.storage_path),
        firmware_version: state.version.clone(),
    };
    match serde_json::to_value(&body) {
        Ok(value) => Response::json(200, &value),
        Err(e) => {
            error!("Status serialization failed: {}", e);
            Response::error(500, "Failed to build status")
        }
    }
}

const SAFE_MODE_MESSAGE: &str = "Cannot arm: system is in safe mode. Manual reset required.";

/// Laser first, then the persisted flag, then the LED
fn arm(state: &AppState) -> Response {
    if state.in_safe_mode() {
        warn!("Arm refused: safety fault latched");
        return Response::error(400, SAFE_MODE_MESSAGE);
    }
    match state.laser.arm() {
        Ok(()) => {}
        Err(LaserError::KillSwitch) => {
            return Response::error(
                400,
                "Cannot arm: emergency stop is engaged. Clear emergency stop first.",
            );
        }
        Err(LaserError::Fault(_)) => return Response::error(400, SAFE_MODE_MESSAGE),
        Err(e) => {
            error!("Arm failed at laser: {}", e);
            return Response::error(500, "Failed to arm device");
        }
    }

    if let Err(e) = state.config.set_armed(true) {
        error!("Arm failed to persist: {}", e);
        if let Err(e) = state.laser.disarm() {
            warn!("Rollback disarm failed: {}", e);
            state.laser.force_off("arm rollback");
        }
        return Response::error(500, "Failed to arm device");
    }

    state.led.clear_state(LedState::Disarmed);
    state.led.set_state(LedState::Armed);
    info!("Armed via control server");
    Response::json(200, &json!({ "armed": true }))
}

/// Disarm always reaches the laser, even if the config write fails
fn disarm(state: &AppState) -> Response {
    let laser_result = state.laser.disarm();
    if let Err(e) = &laser_result {
        error!("Disarm failed at laser: {}", e);
        state.laser.force_off("disarm failure");
    }

    let config_result = state.config.set_armed(false);
    if let Err(e) = &config_result {
        error!("Disarm failed to persist: {}", e);
    }

    state.led.clear_state(LedState::Armed);
    state.led.set_state(LedState::Disarmed);

    if laser_result.is_err() || config_result.is_err() {
        return Response::error(500, "Failed to disarm device");
    }
    info!("Disarmed via control server");
    Response::json(200, &json!({ "armed": false }))
}

fn get_config(state: &AppState) -> Response {
    let view = state
        .config
        .public_view()
        .map_err(|e| e.to_string())
        .and_then(|view| serde_json::to_value(view).map_err(|e| e.to_string()));
    match view {
        Ok(value) => Response::json(200, &value),
        Err(e) => {
            error!("Config read failed: {}", e);
            Response::error(500, "Failed to read configuration")
        }
    }
}

fn update_config(state: &AppState, request: &Request) -> Response {
    if request.body.is_empty() {
        return Response::error(400, "Request body required");
    }
    let Some(body) = request.body_str() else {
        return validation_error("_json", "Invalid JSON");
    };

    match state.config.apply_update(body) {
        Ok(view) => {
            let limits = LaserLimits::from_seconds(
                view.laser.enabled,
                view.laser.max_duration_seconds,
                view.laser.cooldown_seconds,
            );
            if let Err(e) = state.laser.set_limits(limits) {
                warn!("Laser limits not applied: {}", e);
            }
            match serde_json::to_value(view) {
                Ok(value) => Response::json(200, &value),
                Err(e) => {
                    error!("Config serialization failed: {}", e);
                    Response::error(500, "Failed to serialize configuration")
                }
            }
        }
        Err(ConfigError::Validation(e)) => {
            warn!("Config update rejected: {}", e);
            validation_error(&e.field, &e.message)
        }
        Err(e) => {
            error!("Config update failed: {}", e);
            Response::error(500, "Failed to update configuration")
        }
    }
}

/// 400 naming the offending field
fn validation_error(field: &str, message: &str) -> Response {
    Response::json(400, &json!({ "error": message, "code": 400, "field": field }))
}
