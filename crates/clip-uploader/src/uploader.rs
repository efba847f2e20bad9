//! Upload worker

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use unit_config::ConfigStore;

use crate::backoff::retry_delay;
use crate::queue::{ClipQueue, ClipQueueEntry};
use crate::transport::{UploadRequest, UploadTransport};
use crate::UploadError;

/// Uploader configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploaderConfig {
    /// Where the queue is checkpointed
    pub queue_path: PathBuf,
    /// Maximum queued clips
    pub capacity: usize,
    /// Minimum spacing between upload attempts (seconds)
    pub min_interval_secs: u64,
    /// Per-attempt timeout (seconds)
    pub timeout_secs: u64,
    /// How often the worker looks at the queue (milliseconds)
    pub check_interval_ms: u64,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            queue_path: PathBuf::from("/data/apis/upload_queue.json"),
            capacity: 50,
            min_interval_secs: 30,
            timeout_secs: 120,
            check_interval_ms: 5000,
        }
    }
}

/// Queue statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct UploadStats {
    /// Clips in the queue
    pub pending: usize,
    /// Clips waiting out a backoff
    pub retrying: usize,
    pub uploaded: u64,
    pub failed_attempts: u64,
    pub dropped: u64,
    pub last_upload_time: Option<DateTime<Utc>>,
    pub oldest_pending: Option<DateTime<Utc>>,
}

/// Result of one pass of the worker
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Backend answered 201
    Uploaded { clip_path: PathBuf },
    /// Failed, rescheduled
    Retry {
        clip_path: PathBuf,
        status: Option<u16>,
        next_retry_time: DateTime<Utc>,
    },
    /// Clip file disappeared; entry removed
    Removed { clip_path: PathBuf },
}

struct State {
    queue: ClipQueue,
    stats: UploadStats,
    last_attempt: Option<DateTime<Utc>>,
}

struct Shared {
    config: UploaderConfig,
    store: Arc<ConfigStore>,
    transport: Arc<dyn UploadTransport>,
    state: Mutex<State>,
    running: AtomicBool,
}

/// Clip uploader.
///
/// Owns the upload queue. `queue` may be called from any thread; the
/// worker thread performs at most one upload at a time.
pub struct ClipUploader {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl ClipUploader {
    /// Create the uploader and restore any queue left on disk
    pub fn new(
        config: UploaderConfig,
        store: Arc<ConfigStore>,
        transport: Arc<dyn UploadTransport>,
    ) -> Self {
        let queue = ClipQueue::load(&config.queue_path, config.capacity);
        info!("Clip uploader initialized ({} clips in queue)", queue.len());

        Self {
            shared: Arc::new(Shared {
                config,
                store,
                transport,
                state: Mutex::new(State {
                    queue,
                    stats: UploadStats::default(),
                    last_attempt: None,
                }),
                running: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Queue a finished clip. Returns `false` if it was already queued.
    pub fn queue(&self, clip_path: impl AsRef<Path>, detection_id: &str) -> Result<bool, UploadError> {
        self.queue_at(clip_path, detection_id, Utc::now())
    }

    pub fn queue_at(
        &self,
        clip_path: impl AsRef<Path>,
        detection_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, UploadError> {
        let clip_path = clip_path.as_ref();
        let mut state = self.shared.lock()?;

        match state
            .queue
            .push(ClipQueueEntry::new(clip_path, detection_id, now))
        {
            Err(_) => {
                debug!("Clip already in queue: {}", clip_path.display());
                return Ok(false);
            }
            Ok(Some(dropped)) => {
                state.stats.dropped += 1;
                metrics::counter!("clip_uploads_dropped_total").increment(1);
                warn!(
                    "Queue full, dropping oldest clip: {} (detection {})",
                    dropped.clip_path.display(),
                    dropped.detection_id
                );
            }
            Ok(None) => {}
        }
        info!("Clip queued for upload: {}", clip_path.display());

        self.shared.persist(&state);
        Ok(true)
    }

    pub fn pending_count(&self) -> usize {
        self.shared.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    pub fn stats(&self) -> Result<UploadStats, UploadError> {
        self.stats_at(Utc::now())
    }

    pub fn stats_at(&self, now: DateTime<Utc>) -> Result<UploadStats, UploadError> {
        let state = self.shared.lock()?;
        let mut stats = state.stats.clone();
        stats.pending = state.queue.len();
        stats.retrying = state.queue.iter().filter(|e| !e.is_due(now)).count();
        stats.oldest_pending = state.queue.iter().map(|e| e.queued_time).min();
        Ok(stats)
    }

    /// Snapshot of the queue, oldest first
    pub fn entries(&self) -> Result<Vec<ClipQueueEntry>, UploadError> {
        Ok(self.shared.lock()?.queue.iter().cloned().collect())
    }

    /// Run one worker pass at `now`; `None` when nothing was attempted
    pub fn process_once(&self, now: DateTime<Utc>) -> Result<Option<AttemptOutcome>, UploadError> {
        self.shared.process_once(now)
    }

    /// Start the background worker
    pub fn start(&self) -> Result<(), UploadError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Upload thread already running");
            return Ok(());
        }

        let shared = self.shared.clone();
        let handle = std::thread::Builder::new()
            .name("clip-uploader".into())
            .spawn(move || shared.run())
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                UploadError::Io(e)
            })?;

        *self
            .handle
            .lock()
            .map_err(|e| UploadError::Lock(format!("Lock error: {}", e)))? = Some(handle);
        Ok(())
    }

    /// Stop the worker, join it and checkpoint the queue
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        let handle = self.handle.lock().ok().and_then(|mut h| h.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Upload thread panicked");
            }
            info!("Upload thread stopped");
        }
        if let Ok(state) = self.shared.lock() {
            self.shared.persist(&state);
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }
}

impl Drop for ClipUploader {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Sleep granularity so `stop` is observed promptly
const SLEEP_SLICE: Duration = Duration::from_millis(100);

impl Shared {
    fn run(&self) {
        info!("Upload thread started");
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.process_once(Utc::now()) {
                warn!("Upload pass failed: {}", e);
            }

            let mut waited = Duration::ZERO;
            let interval = Duration::from_millis(self.config.check_interval_ms);
            while waited < interval && self.running.load(Ordering::SeqCst) {
                std::thread::sleep(SLEEP_SLICE);
                waited += SLEEP_SLICE;
            }
        }
        info!("Upload thread exiting");
    }

    fn process_once(&self, now: DateTime<Utc>) -> Result<Option<AttemptOutcome>, UploadError> {
        let entry = {
            let state = self.lock()?;
            if let Some(last) = state.last_attempt {
                let spacing = chrono::Duration::seconds(self.config.min_interval_secs as i64);
                if now - last < spacing {
                    return Ok(None);
                }
            }
            match state.queue.next_due(now) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        };

        let Some((server_url, api_key)) = self.store.server_credentials()? else {
            debug!("No server URL configured, skipping upload");
            return Ok(None);
        };

        if !entry.clip_path.exists() {
            error!("Clip file not found: {}", entry.clip_path.display());
            let mut state = self.lock()?;
            state.queue.remove(&entry.clip_path);
            self.persist(&state);
            return Ok(Some(AttemptOutcome::Removed {
                clip_path: entry.clip_path,
            }));
        }

        // The lock is not held across the network call
        let result = self.transport.upload(&UploadRequest {
            server_url: &server_url,
            api_key: &api_key,
            clip_path: &entry.clip_path,
            detection_id: &entry.detection_id,
        });

        let mut state = self.lock()?;
        state.last_attempt = Some(now);

        let outcome = match result {
            Ok(201) => {
                state.queue.remove(&entry.clip_path);
                state.stats.uploaded += 1;
                state.stats.last_upload_time = Some(now);
                metrics::counter!("clip_uploads_total").increment(1);
                info!("Clip uploaded successfully: {}", entry.clip_path.display());
                AttemptOutcome::Uploaded {
                    clip_path: entry.clip_path,
                }
            }
            other => {
                let status = match &other {
                    Ok(status @ (401 | 403)) => {
                        error!("Upload auth failed (HTTP {})", status);
                        Some(*status)
                    }
                    Ok(status) => {
                        warn!("Upload rejected (HTTP {})", status);
                        Some(*status)
                    }
                    Err(e) => {
                        warn!("Upload failed: {}", e);
                        None
                    }
                };
                state.stats.failed_attempts += 1;
                metrics::counter!("clip_upload_failures_total").increment(1);

                // The entry may have been dropped while the upload was in flight
                match state.queue.get_mut(&entry.clip_path) {
                    Some(queued) => {
                        let delay = retry_delay(queued.retry_count);
                        queued.retry_count += 1;
                        queued.next_retry_time = now
                            + chrono::Duration::from_std(delay)
                                .unwrap_or_else(|_| chrono::Duration::hours(1));
                        info!(
                            "Will retry upload in {} seconds (attempt {})",
                            delay.as_secs(),
                            queued.retry_count
                        );
                        AttemptOutcome::Retry {
                            clip_path: entry.clip_path,
                            status,
                            next_retry_time: queued.next_retry_time,
                        }
                    }
                    None => AttemptOutcome::Removed {
                        clip_path: entry.clip_path,
                    },
                }
            }
        };

        self.persist(&state);
        Ok(Some(outcome))
    }

    /// Checkpoint; failures are logged and the in-memory queue stays authoritative
    fn persist(&self, state: &State) {
        if let Err(e) = state.queue.save(&self.config.queue_path) {
            warn!(
                "Could not write queue file {}: {}",
                self.config.queue_path.display(),
                e
            );
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, UploadError> {
        self.state
            .lock()
            .map_err(|e| UploadError::Lock(format!("Lock error: {}", e)))
    }
}
