//! Network seam for clip uploads

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use tracing::debug;

use crate::UploadError;

/// Backend endpoint for clip uploads, relative to the server URL
pub const CLIPS_ENDPOINT: &str = "/api/units/clips";

/// One upload attempt
#[derive(Debug, Clone, Copy)]
pub struct UploadRequest<'a> {
    pub server_url: &'a str,
    pub api_key: &'a str,
    pub clip_path: &'a Path,
    pub detection_id: &'a str,
}

/// Sends one clip and reports the HTTP status the backend answered with
pub trait UploadTransport: Send + Sync {
    fn upload(&self, request: &UploadRequest<'_>) -> Result<u16, UploadError>;
}

/// `multipart/form-data` POST over `reqwest`'s blocking client
pub struct HttpTransport {
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl UploadTransport for HttpTransport {
    fn upload(&self, request: &UploadRequest<'_>) -> Result<u16, UploadError> {
        // Built per attempt on the uploader thread: a blocking client must
        // never be created or dropped on the async runtime
        let client = Client::builder().timeout(self.timeout).build()?;

        let clip = Part::file(request.clip_path)?.mime_str("video/mp4")?;
        let form = Form::new()
            .text("detection_id", request.detection_id.to_string())
            .part("clip", clip);

        let url = format!(
            "{}{}",
            request.server_url.trim_end_matches('/'),
            CLIPS_ENDPOINT
        );
        debug!("Uploading {} to {}", request.clip_path.display(), url);

        let response = client
            .post(&url)
            .header("X-API-Key", request.api_key)
            .multipart(form)
            .send()?;
        Ok(response.status().as_u16())
    }
}

#[derive(Debug, Default)]
struct Script {
    statuses: Vec<Result<u16, String>>,
    calls: Vec<(String, String)>,
}

/// Scripted transport for tests; clones share the script.
///
/// Answers with the queued results in order, then 201 once the script
/// runs out. Records `(clip_path, detection_id)` for every call.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<Script>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_status(&self, status: u16) {
        if let Ok(mut s) = self.script.lock() {
            s.statuses.push(Ok(status));
        }
    }

    pub fn push_network_error(&self, message: &str) {
        if let Ok(mut s) = self.script.lock() {
            s.statuses.push(Err(message.to_string()));
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.script.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }
}

impl UploadTransport for MockTransport {
    fn upload(&self, request: &UploadRequest<'_>) -> Result<u16, UploadError> {
        let mut s = self
            .script
            .lock()
            .map_err(|e| UploadError::Lock(format!("Lock error: {}", e)))?;
        s.calls.push((
            request.clip_path.display().to_string(),
            request.detection_id.to_string(),
        ));
        if s.statuses.is_empty() {
            return Ok(201);
        }
        s.statuses.remove(0).map_err(UploadError::Http)
    }
}
