//! Runtime configuration schema and validation

use serde::{Deserialize, Serialize};

use crate::ValidationError;

/// Current on-disk schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Placeholder shown instead of a configured API key
pub const MASKED_SECRET: &str = "***";

const MAX_STRING_LEN: usize = 127;
const MAX_URL_LEN: usize = 255;
const MAX_API_KEY_LEN: usize = 63;

/// Device identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub id: String,
    pub name: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: "apis-unknown".to_string(),
            name: "APIS Unit".to_string(),
        }
    }
}

/// Backend server link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Base URL, empty for offline operation
    pub url: String,
    /// API key sent as `X-API-Key`
    pub api_key: String,
    /// Heartbeat period (seconds)
    pub heartbeat_interval_seconds: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: "https://apis.honeybeegood.be".to_string(),
            api_key: String::new(),
            heartbeat_interval_seconds: 60,
        }
    }
}

/// Detection tuning exposed to the operator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub enabled: bool,
    /// Minimum blob size (pixels)
    pub min_size_px: u32,
    /// Hover time before a detection counts (milliseconds)
    pub hover_threshold_ms: u32,
    pub fps: u32,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size_px: 18,
            hover_threshold_ms: 1000,
            fps: 10,
        }
    }
}

/// Laser safety limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    pub enabled: bool,
    /// Maximum continuous on-time (seconds)
    pub max_duration_seconds: u32,
    /// Forced off-time after an activation (seconds)
    pub cooldown_seconds: u32,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_duration_seconds: 10,
            cooldown_seconds: 5,
        }
    }
}

/// Complete runtime configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnitConfig {
    pub schema_version: u32,
    pub device: DeviceConfig,
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub laser: LaserConfig,
    pub armed: bool,
    pub needs_setup: bool,
    /// RFC 3339 timestamp of the last accepted change
    pub updated_at: String,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            device: DeviceConfig::default(),
            server: ServerConfig::default(),
            detection: DetectionConfig::default(),
            laser: LaserConfig::default(),
            armed: false,
            needs_setup: true,
            updated_at: String::new(),
        }
    }
}

impl UnitConfig {
    /// Copy safe to hand out over the network
    pub fn public_view(&self) -> UnitConfig {
        let mut out = self.clone();
        if !out.server.api_key.is_empty() {
            out.server.api_key = MASKED_SECRET.to_string();
        }
        out
    }

    /// Check every field, reporting the first violation
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_len(&self.device.id, MAX_STRING_LEN, "device.id")?;
        check_len(&self.device.name, MAX_STRING_LEN, "device.name")?;

        check_len(&self.server.url, MAX_URL_LEN, "server.url")?;
        if !self.server.url.is_empty()
            && !self.server.url.starts_with("http://")
            && !self.server.url.starts_with("https://")
        {
            return Err(ValidationError::new(
                "server.url",
                "URL must start with http:// or https://",
            ));
        }
        check_len(&self.server.api_key, MAX_API_KEY_LEN, "server.api_key")?;
        check_range(
            self.server.heartbeat_interval_seconds,
            10,
            3600,
            "server.heartbeat_interval_seconds",
        )?;

        check_range(self.detection.min_size_px, 1, 200, "detection.min_size_px")?;
        check_range(
            self.detection.hover_threshold_ms,
            100,
            10_000,
            "detection.hover_threshold_ms",
        )?;
        check_range(self.detection.fps, 1, 30, "detection.fps")?;

        check_range(
            self.laser.max_duration_seconds,
            1,
            30,
            "laser.max_duration_seconds",
        )?;
        check_range(self.laser.cooldown_seconds, 1, 60, "laser.cooldown_seconds")?;

        Ok(())
    }
}

fn check_len(value: &str, max: usize, field: &str) -> Result<(), ValidationError> {
    if value.chars().count() > max {
        return Err(ValidationError::new(
            field,
            format!("Must be at most {} characters", max),
        ));
    }
    Ok(())
}

fn check_range(value: u32, min: u32, max: u32, field: &str) -> Result<(), ValidationError> {
    if value < min || value > max {
        return Err(ValidationError::new(
            field,
            format!("Value must be between {} and {}", min, max),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = UnitConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.armed);
        assert!(config.needs_setup);
        assert_eq!(config.detection.fps, 10);
    }

    #[test]
    fn test_range_violation_names_field() {
        let mut config = UnitConfig::default();
        config.detection.fps = 31;

        let err = config.validate().unwrap_err();
        assert_eq!(err.field, "detection.fps");
        assert_eq!(err.message, "Value must be between 1 and 30");
    }

    #[test]
    fn test_url_scheme() {
        let mut config = UnitConfig::default();
        config.server.url = "ftp://example.com".to_string();
        assert_eq!(config.validate().unwrap_err().field, "server.url");

        // Empty URL means offline mode
        config.server.url.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_public_view_masks_key() {
        let mut config = UnitConfig::default();
        assert_eq!(config.public_view().server.api_key, "");

        config.server.api_key = "secret-key".to_string();
        let public = config.public_view();
        assert_eq!(public.server.api_key, MASKED_SECRET);
        assert_eq!(config.server.api_key, "secret-key");
    }
}
