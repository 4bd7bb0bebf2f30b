//! Core configuration types.
//!
//! [`Config`] is the single configuration object consumed by
//! [`bootstrap_services`](crate::bootstrap::bootstrap_services). All fields
//! have sensible defaults; [`Config::validate`] must pass before services
//! are wired.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{
    DEFAULT_PUSH_CHANNEL_CAPACITY, DEFAULT_SEND_TIMEOUT_MS, DEFAULT_SSE_KEEPALIVE_SECS,
    DEFAULT_SWEEP_INTERVAL_SECS,
};
use crate::types::{RadiusMeter, UserId};

// ─────────────────────────────────────────────────────────────────────────────
// Radius Policy
// ─────────────────────────────────────────────────────────────────────────────

/// One step of the likes-to-radius table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadiusTier {
    /// Minimum like count at which this tier applies.
    pub min_likes: u32,
    /// Visibility radius granted by this tier.
    pub radius_meter: RadiusMeter,
}

impl RadiusTier {
    pub const fn new(min_likes: u32, radius_meter: RadiusMeter) -> Self {
        Self {
            min_likes,
            radius_meter,
        }
    }
}

/// Step function from like count to visibility radius.
///
/// The table is validated to be non-decreasing, so more likes can never
/// shrink a broadcaster's audience.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RadiusPolicy {
    tiers: Vec<RadiusTier>,
}

impl RadiusPolicy {
    /// Creates a validated policy.
    ///
    /// # Errors
    ///
    /// Returns an error if the table is empty, does not start at zero likes,
    /// has non-increasing thresholds, a zero radius, or a shrinking radius.
    pub fn new(tiers: Vec<RadiusTier>) -> Result<Self, String> {
        let policy = Self { tiers };
        policy.validate()?;
        Ok(policy)
    }

    /// Validates the tier table.
    pub fn validate(&self) -> Result<(), String> {
        let first = self
            .tiers
            .first()
            .ok_or_else(|| "radius tiers must not be empty".to_string())?;
        if first.min_likes != 0 {
            return Err("first radius tier must start at 0 likes".to_string());
        }
        for tier in &self.tiers {
            if tier.radius_meter == 0 {
                return Err(format!(
                    "radius tier at {} likes has a zero radius",
                    tier.min_likes
                ));
            }
        }
        for pair in self.tiers.windows(2) {
            if pair[1].min_likes <= pair[0].min_likes {
                return Err(format!(
                    "radius tier thresholds must strictly increase ({} after {})",
                    pair[1].min_likes, pair[0].min_likes
                ));
            }
            if pair[1].radius_meter < pair[0].radius_meter {
                return Err(format!(
                    "radius must not shrink as likes grow ({}m at {} likes after {}m)",
                    pair[1].radius_meter, pair[1].min_likes, pair[0].radius_meter
                ));
            }
        }
        Ok(())
    }

    /// Returns the radius for a like count.
    #[must_use]
    pub fn radius_for(&self, like_count: u32) -> RadiusMeter {
        self.tiers
            .iter()
            .take_while(|tier| tier.min_likes <= like_count)
            .last()
            .map(|tier| tier.radius_meter)
            .unwrap_or_else(|| self.base_radius())
    }

    /// Radius granted with zero likes.
    #[must_use]
    pub fn base_radius(&self) -> RadiusMeter {
        self.tiers.first().map(|t| t.radius_meter).unwrap_or(1)
    }

    pub fn tiers(&self) -> &[RadiusTier] {
        &self.tiers
    }
}

impl Default for RadiusPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                RadiusTier::new(0, 200),
                RadiusTier::new(10, 300),
                RadiusTier::new(30, 500),
                RadiusTier::new(60, 800),
                RadiusTier::new(100, 1000),
            ],
        }
    }
}

/// What a like on an inactive broadcast does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InactiveLikePolicy {
    /// Increment the like count and radius, notify nobody.
    #[default]
    Count,
    /// Fail with `NotActive`.
    Reject,
}

// ─────────────────────────────────────────────────────────────────────────────
// Delivery
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for push-channel delivery.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Per-target bound on a single send attempt (milliseconds).
    pub send_timeout_ms: u64,

    /// Capacity of each user's outbound event queue.
    pub channel_capacity: usize,

    /// Interval between SSE keep-alive comments (seconds).
    pub keepalive_secs: u64,

    /// Interval between sweeps of closed connections (seconds).
    pub sweep_interval_secs: u64,
}

impl DeliveryConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if self.send_timeout_ms == 0 {
            return Err("send_timeout_ms must be >= 1".to_string());
        }
        if self.channel_capacity == 0 {
            return Err("channel_capacity must be >= 1 (mpsc::channel panics on 0)".to_string());
        }
        if self.keepalive_secs == 0 {
            return Err("keepalive_secs must be >= 1".to_string());
        }
        if self.sweep_interval_secs == 0 {
            return Err("sweep_interval_secs must be >= 1".to_string());
        }
        Ok(())
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
            channel_capacity: DEFAULT_PUSH_CHANNEL_CAPACITY,
            keepalive_secs: DEFAULT_SSE_KEEPALIVE_SECS,
            sweep_interval_secs: DEFAULT_SWEEP_INTERVAL_SECS,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Application Config
// ─────────────────────────────────────────────────────────────────────────────

/// Configuration for the Nearcast service.
///
/// All fields have sensible defaults.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    // Server
    /// Port for the HTTP server (0 = auto-allocate).
    pub preferred_port: u16,

    // Broadcast policy
    /// Likes-to-radius table.
    #[serde(default)]
    pub radius_policy: RadiusPolicy,

    /// Behaviour of likes on inactive broadcasts.
    #[serde(default)]
    pub inactive_like_policy: InactiveLikePolicy,

    // Delivery
    /// Push-channel delivery configuration.
    #[serde(default)]
    pub delivery: DeliveryConfig,

    // Persistence
    /// Directory for the broadcast journal. `None` keeps state in memory only.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    // Directory
    /// Nicknames loaded into the in-memory user directory. Users missing
    /// here show a `null` nickname in nearby results.
    #[serde(default)]
    pub nicknames: HashMap<UserId, String>,
}

impl Config {
    /// Validates every section of the configuration.
    pub fn validate(&self) -> Result<(), String> {
        self.radius_policy.validate()?;
        self.delivery.validate()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            preferred_port: 0,
            radius_policy: RadiusPolicy::default(),
            inactive_like_policy: InactiveLikePolicy::default(),
            delivery: DeliveryConfig::default(),
            data_dir: None,
            nicknames: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_radius_policy_is_valid() {
        assert!(RadiusPolicy::default().validate().is_ok());
    }

    #[test]
    fn radius_policy_steps_at_thresholds() {
        let policy = RadiusPolicy::default();
        assert_eq!(policy.radius_for(0), 200);
        assert_eq!(policy.radius_for(9), 200);
        assert_eq!(policy.radius_for(10), 300);
        assert_eq!(policy.radius_for(99), 800);
        assert_eq!(policy.radius_for(100), 1000);
        assert_eq!(policy.radius_for(u32::MAX), 1000);
    }

    #[test]
    fn radius_is_non_decreasing_in_likes() {
        let policy = RadiusPolicy::default();
        let mut previous = policy.radius_for(0);
        for likes in 1..=500 {
            let radius = policy.radius_for(likes);
            assert!(radius >= previous, "radius shrank at {} likes", likes);
            previous = radius;
        }
    }

    #[test]
    fn radius_policy_rejects_bad_tables() {
        assert!(RadiusPolicy::new(vec![]).is_err());
        assert!(RadiusPolicy::new(vec![RadiusTier::new(1, 100)]).is_err());
        assert!(RadiusPolicy::new(vec![RadiusTier::new(0, 0)]).is_err());
        assert!(
            RadiusPolicy::new(vec![RadiusTier::new(0, 100), RadiusTier::new(0, 200)]).is_err()
        );
        assert!(
            RadiusPolicy::new(vec![RadiusTier::new(0, 300), RadiusTier::new(5, 200)]).is_err()
        );
        assert!(
            RadiusPolicy::new(vec![RadiusTier::new(0, 300), RadiusTier::new(5, 300)]).is_ok()
        );
    }

    #[test]
    fn radius_policy_deserializes_from_list() {
        let policy: RadiusPolicy =
            serde_json::from_str(r#"[{"minLikes":0,"radiusMeter":100},{"minLikes":3,"radiusMeter":250}]"#)
                .unwrap();
        assert_eq!(policy.radius_for(2), 100);
        assert_eq!(policy.radius_for(3), 250);
    }

    #[test]
    fn delivery_config_rejects_zero_values() {
        let mut config = DeliveryConfig::default();
        assert!(config.validate().is_ok());
        config.channel_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn config_default_is_sensible() {
        let config = Config::default();
        assert_eq!(config.preferred_port, 0);
        assert_eq!(config.inactive_like_policy, InactiveLikePolicy::Count);
        assert!(config.data_dir.is_none());
        assert!(config.validate().is_ok());
    }
}
