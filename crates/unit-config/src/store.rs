//! Lock-guarded configuration store

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use config::{Config, Environment, File, FileFormat};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::schema::{UnitConfig, MASKED_SECRET};
use crate::{ConfigError, ValidationError};

/// Production location of the runtime config
pub const CONFIG_PATH: &str = "/data/apis/config.json";
/// Location used when running from a checkout
pub const CONFIG_PATH_DEV: &str = "./data/apis/config.json";

/// Prefix for environment overrides, e.g. `HORNET__SERVER__URL`
const ENV_PREFIX: &str = "HORNET";

/// Sections a partial update may touch
const UPDATABLE_SECTIONS: [&str; 4] = ["device", "server", "detection", "laser"];

/// Shared runtime configuration.
///
/// Every read-modify-write happens under one mutex; callers only ever see
/// clones, so no reference into the guarded state escapes.
pub struct ConfigStore {
    path: Option<PathBuf>,
    inner: Mutex<UnitConfig>,
}

impl ConfigStore {
    /// Store that never touches disk
    pub fn in_memory(config: UnitConfig) -> Self {
        Self {
            path: None,
            inner: Mutex::new(config),
        }
    }

    /// Load defaults, then the JSON file (if present), then environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref().to_path_buf();

        let settings = Config::builder()
            .add_source(Config::try_from(&UnitConfig::default())?)
            .add_source(
                File::from(path.as_path())
                    .format(FileFormat::Json)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: UnitConfig = settings.try_deserialize()?;

        let config = match loaded.validate() {
            Ok(()) => loaded,
            Err(e) => {
                warn!("Config at {} rejected ({}), using defaults", path.display(), e);
                UnitConfig::default()
            }
        };

        info!(
            "Loaded config: device={} armed={} needs_setup={}",
            config.device.id, config.armed, config.needs_setup
        );

        Ok(Self {
            path: Some(path),
            inner: Mutex::new(config),
        })
    }

    /// Full configuration including secrets
    pub fn snapshot(&self) -> Result<UnitConfig, ConfigError> {
        Ok(self.lock()?.clone())
    }

    /// Configuration with secrets masked
    pub fn public_view(&self) -> Result<UnitConfig, ConfigError> {
        Ok(self.lock()?.public_view())
    }

    pub fn is_armed(&self) -> Result<bool, ConfigError> {
        Ok(self.lock()?.armed)
    }

    /// Set the armed flag and persist it. Returns the previous value.
    pub fn set_armed(&self, armed: bool) -> Result<bool, ConfigError> {
        let (previous, snapshot) = {
            let mut config = self.lock()?;
            let previous = config.armed;
            config.armed = armed;
            config.updated_at = Utc::now().to_rfc3339();
            (previous, config.clone())
        };

        if previous != armed {
            info!("Unit {}", if armed { "armed" } else { "disarmed" });
        }
        self.persist(&snapshot);
        Ok(previous)
    }

    pub fn detection_enabled(&self) -> Result<bool, ConfigError> {
        Ok(self.lock()?.detection.enabled)
    }

    /// Server base URL and API key, `None` when running offline
    pub fn server_credentials(&self) -> Result<Option<(String, String)>, ConfigError> {
        let config = self.lock()?;
        if config.server.url.is_empty() {
            return Ok(None);
        }
        Ok(Some((config.server.url.clone(), config.server.api_key.clone())))
    }

    /// Apply a partial JSON update.
    ///
    /// The update is merged into a copy, validated, and only then committed,
    /// so a rejected update leaves the store untouched.
    pub fn apply_update(&self, body: &str) -> Result<UnitConfig, ConfigError> {
        let update: Value = serde_json::from_str(body)
            .map_err(|_| ValidationError::new("_json", "Invalid JSON"))?;
        let update = update
            .as_object()
            .ok_or_else(|| ValidationError::new("_json", "Expected a JSON object"))?;

        let snapshot = {
            let mut config = self.lock()?;
            let mut candidate = serde_json::to_value(&*config)?;

            for (key, value) in update {
                if key == "armed" {
                    return Err(ValidationError::new(
                        "armed",
                        "Use POST /arm or /disarm to change armed state",
                    )
                    .into());
                }
                if key == "needs_setup" {
                    let flag = value
                        .as_bool()
                        .ok_or_else(|| ValidationError::new("needs_setup", "Expected a boolean"))?;
                    candidate["needs_setup"] = Value::Bool(flag);
                    continue;
                }
                if !UPDATABLE_SECTIONS.contains(&key.as_str()) {
                    debug!("Ignoring unknown config key: {}", key);
                    continue;
                }
                let section = value.as_object().ok_or_else(|| {
                    ValidationError::new(key.as_str(), "Expected a JSON object")
                })?;
                if let Some(target) = candidate.get_mut(key).and_then(Value::as_object_mut) {
                    merge_section(key, target, section)?;
                }
            }

            let mut next: UnitConfig = serde_json::from_value(candidate)?;
            next.validate()?;
            next.updated_at = Utc::now().to_rfc3339();
            *config = next;
            config.clone()
        };

        info!("Runtime configuration updated");
        self.persist(&snapshot);
        Ok(snapshot.public_view())
    }

    /// Mark initial setup as complete
    pub fn complete_setup(&self) -> Result<(), ConfigError> {
        let snapshot = {
            let mut config = self.lock()?;
            config.needs_setup = false;
            config.updated_at = Utc::now().to_rfc3339();
            config.clone()
        };
        self.persist(&snapshot);
        Ok(())
    }

    /// Write the current configuration to disk
    pub fn save(&self) -> Result<(), ConfigError> {
        let snapshot = self.snapshot()?;
        match &self.path {
            Some(path) => write_atomic(path, &snapshot),
            None => Ok(()),
        }
    }

    fn persist(&self, snapshot: &UnitConfig) {
        if let Some(path) = &self.path {
            if let Err(e) = write_atomic(path, snapshot) {
                warn!("Failed to save config (applied in memory only): {}", e);
            }
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, UnitConfig>, ConfigError> {
        self.inner
            .lock()
            .map_err(|e| ConfigError::Lock(format!("Lock error: {}", e)))
    }
}

/// Merge one section, checking each leaf keeps the type it already has
fn merge_section(
    section_name: &str,
    target: &mut Map<String, Value>,
    update: &Map<String, Value>,
) -> Result<(), ValidationError> {
    for (key, value) in update {
        let field = format!("{}.{}", section_name, key);
        let Some(current) = target.get(key) else {
            debug!("Ignoring unknown config key: {}", field);
            continue;
        };

        match current {
            Value::Bool(_) if !value.is_boolean() => {
                return Err(ValidationError::new(field, "Expected a boolean"));
            }
            Value::Number(_) if value.as_u64().map_or(true, |v| v > u32::MAX as u64) => {
                return Err(ValidationError::new(field, "Expected a non-negative integer"));
            }
            Value::String(_) if !value.is_string() => {
                return Err(ValidationError::new(field, "Expected a string"));
            }
            _ => {}
        }

        if field == "server.api_key" && value.as_str() == Some(MASKED_SECRET) {
            continue;
        }
        target.insert(key.clone(), value.clone());
    }
    Ok(())
}

fn write_atomic(path: &Path, config: &UnitConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec_pretty(config)?;
    std::fs::write(&tmp, json)?;
    std::fs::rename(&tmp, path)?;
    debug!("Config saved to {}", path.display());
    Ok(())
}
