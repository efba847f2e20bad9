//! Bounded, persisted upload queue

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::UploadError;

/// Queue file format version
pub const QUEUE_FILE_VERSION: u32 = 1;

/// One clip waiting for upload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipQueueEntry {
    pub clip_path: PathBuf,
    pub detection_id: String,
    /// Failed attempts so far
    pub retry_count: u32,
    /// Earliest time of the next attempt (Unix seconds on disk)
    #[serde(with = "chrono::serde::ts_seconds")]
    pub next_retry_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub queued_time: DateTime<Utc>,
}

impl ClipQueueEntry {
    pub fn new(clip_path: impl Into<PathBuf>, detection_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            clip_path: clip_path.into(),
            detection_id: detection_id.into(),
            retry_count: 0,
            next_retry_time: now,
            queued_time: now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_time <= now
    }
}

#[derive(Serialize, Deserialize)]
struct QueueFile {
    version: u32,
    entries: Vec<ClipQueueEntry>,
}

/// FIFO of pending clips, oldest first
#[derive(Debug, Clone)]
pub struct ClipQueue {
    entries: VecDeque<ClipQueueEntry>,
    capacity: usize,
}

impl ClipQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Read a queue file. A missing or unreadable file gives an empty queue.
    pub fn load(path: &Path, capacity: usize) -> Self {
        let mut queue = Self::new(capacity);

        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(_) => {
                debug!("No queue file at {}", path.display());
                return queue;
            }
        };

        let file: QueueFile = match serde_json::from_str(&contents) {
            Ok(file) => file,
            Err(e) => {
                warn!("Failed to parse queue file {}: {}", path.display(), e);
                return queue;
            }
        };
        if file.version != QUEUE_FILE_VERSION {
            warn!(
                "Queue file version {} (expected {}), loading anyway",
                file.version, QUEUE_FILE_VERSION
            );
        }

        let mut entries = file.entries;
        entries.sort_by_key(|e| e.queued_time);
        for entry in entries {
            queue.push(entry);
        }
        info!("Loaded {} clips from queue file", queue.len());
        queue
    }

    /// Write atomically (temp file + rename)
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        let file = QueueFile {
            version: QUEUE_FILE_VERSION,
            entries: self.entries.iter().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        debug!("Queue persisted ({} entries)", self.entries.len());
        Ok(())
    }

    /// Append an entry.
    ///
    /// Returns `Ok(Some(dropped))` when the queue was full and the oldest
    /// entry had to go, `Err(entry)` when the clip is already queued.
    pub fn push(&mut self, entry: ClipQueueEntry) -> Result<Option<ClipQueueEntry>, ClipQueueEntry> {
        if self.contains(&entry.clip_path) {
            return Err(entry);
        }
        let dropped = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        Ok(dropped)
    }

    /// Oldest-queued entry whose retry time has come; later ones are not
    /// held up by an earlier entry still backing off
    pub fn next_due(&self, now: DateTime<Utc>) -> Option<&ClipQueueEntry> {
        self.entries
            .iter()
            .filter(|e| e.is_due(now))
            .min_by_key(|e| e.queued_time)
    }

    pub fn get_mut(&mut self, clip_path: &Path) -> Option<&mut ClipQueueEntry> {
        self.entries.iter_mut().find(|e| e.clip_path == clip_path)
    }

    pub fn remove(&mut self, clip_path: &Path) -> Option<ClipQueueEntry> {
        let idx = self.entries.iter().position(|e| e.clip_path == clip_path)?;
        self.entries.remove(idx)
    }

    pub fn contains(&self, clip_path: &Path) -> bool {
        self.entries.iter().any(|e| e.clip_path == clip_path)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ClipQueueEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
