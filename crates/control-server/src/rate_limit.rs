//! Per-IP rate limiting using the GCRA algorithm
//!
//! Keyed on the peer address so one noisy client on the LAN cannot starve
//! the others. GCRA needs no background task, which suits the small
//! connection budget of the unit.

use std::net::IpAddr;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use serde::{Deserialize, Serialize};

use crate::ServerError;

/// Limiter keyed by peer IP
pub type PeerRateLimiter = DefaultKeyedRateLimiter<IpAddr>;

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Seconds to replenish one request
    pub per_second: u64,
    /// Burst size (max requests that can be made immediately)
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: 2,  // Replenish every 2 seconds
            burst_size: 5,  // Allow burst of 5
        }
    }
}

impl RateLimitConfig {
    /// One request every 4 seconds, burst of 2
    pub fn strict() -> Self {
        Self {
            per_second: 4,
            burst_size: 2,
        }
    }

    /// The dashboard polls `/status`, so the control surface uses this one
    pub fn lenient() -> Self {
        Self {
            per_second: 1,
            burst_size: 10,
        }
    }
}

/// Build the limiter; zero periods or bursts are rejected
pub fn create_limiter(config: &RateLimitConfig) -> Result<Arc<PeerRateLimiter>, ServerError> {
    let burst = NonZeroU32::new(config.burst_size)
        .ok_or_else(|| ServerError::RateLimit("burst_size must be non-zero".to_string()))?;
    let quota = Quota::with_period(Duration::from_secs(config.per_second))
        .ok_or_else(|| ServerError::RateLimit("per_second must be non-zero".to_string()))?
        .allow_burst(burst);
    Ok(Arc::new(RateLimiter::keyed(quota)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn test_default_config() {
        let config = RateLimitConfig::default();
        assert_eq!(config.per_second, 2);
        assert_eq!(config.burst_size, 5);
    }

    #[test]
    fn test_strict_config() {
        let config = RateLimitConfig::strict();
        assert_eq!(config.per_second, 4);
        assert_eq!(config.burst_size, 2);
    }

    #[test]
    fn test_burst_then_limited_per_ip() {
        let limiter = create_limiter(&RateLimitConfig::strict()).unwrap();
        let a = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20));
        let b = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 21));

        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&a).is_err());

        // Other peers keep their own budget
        assert!(limiter.check_key(&b).is_ok());
    }

    #[test]
    fn test_zero_values_rejected() {
        let zero_burst = RateLimitConfig { per_second: 1, burst_size: 0 };
        assert!(create_limiter(&zero_burst).is_err());
        let zero_period = RateLimitConfig { per_second: 0, burst_size: 3 };
        assert!(create_limiter(&zero_period).is_err());
    }
}
