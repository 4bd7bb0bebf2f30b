//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use nearcast_core::{
    Config, DeliveryConfig, InactiveLikePolicy, RadiusPolicy, RadiusTier, UserId,
};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port to bind the HTTP server to.
    /// Override: `NEARCAST_BIND_PORT`
    pub bind_port: u16,

    /// Directory for the broadcast journal. Unset keeps state in memory.
    /// Override: `NEARCAST_DATA_DIR`
    pub data_dir: Option<PathBuf>,

    /// Per-listener send window in milliseconds.
    /// Override: `NEARCAST_SEND_TIMEOUT_MS`
    pub send_timeout_ms: u64,

    /// Outbound queue length per connection.
    /// Override: `NEARCAST_CHANNEL_CAPACITY`
    pub channel_capacity: usize,

    /// Seconds between SSE keep-alive comments.
    pub keepalive_secs: u64,

    /// Seconds between sweeps of closed connections.
    pub sweep_interval_secs: u64,

    /// `count` or `reject`.
    /// Override: `NEARCAST_INACTIVE_LIKES`
    pub inactive_like_policy: InactiveLikePolicy,

    /// Likes-to-radius table. Unset uses the built-in tiers.
    pub radius_tiers: Option<Vec<RadiusTier>>,

    /// Display names shown in nearby results, keyed by user id.
    pub nicknames: HashMap<UserId, String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let delivery = DeliveryConfig::default();
        Self {
            bind_port: 8080,
            data_dir: None,
            send_timeout_ms: delivery.send_timeout_ms,
            channel_capacity: delivery.channel_capacity,
            keepalive_secs: delivery.keepalive_secs,
            sweep_interval_secs: delivery.sweep_interval_secs,
            inactive_like_policy: InactiveLikePolicy::default(),
            radius_tiers: None,
            nicknames: HashMap::new(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("NEARCAST_BIND_PORT").and_then(|v| v.parse().ok()) {
            self.bind_port = port;
        }

        if let Some(ms) = lookup("NEARCAST_SEND_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.send_timeout_ms = ms;
        }

        if let Some(cap) = lookup("NEARCAST_CHANNEL_CAPACITY").and_then(|v| v.parse().ok()) {
            self.channel_capacity = cap;
        }

        match lookup("NEARCAST_INACTIVE_LIKES").as_deref() {
            Some("count") => self.inactive_like_policy = InactiveLikePolicy::Count,
            Some("reject") => self.inactive_like_policy = InactiveLikePolicy::Reject,
            Some(other) => log::warn!("Ignoring NEARCAST_INACTIVE_LIKES={}", other),
            None => {}
        }

        // Note: NEARCAST_DATA_DIR is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to nearcast-core's Config type.
    pub fn to_core_config(&self) -> Result<Config> {
        let radius_policy = match &self.radius_tiers {
            Some(tiers) => RadiusPolicy::new(tiers.clone())
                .map_err(|e| anyhow!("Invalid radius_tiers: {}", e))?,
            None => RadiusPolicy::default(),
        };

        let config = Config {
            preferred_port: self.bind_port,
            radius_policy,
            inactive_like_policy: self.inactive_like_policy,
            delivery: DeliveryConfig {
                send_timeout_ms: self.send_timeout_ms,
                channel_capacity: self.channel_capacity,
                keepalive_secs: self.keepalive_secs,
                sweep_interval_secs: self.sweep_interval_secs,
            },
            data_dir: self.data_dir.clone(),
            nicknames: self.nicknames.clone(),
        };
        config
            .validate()
            .map_err(|e| anyhow!("Invalid configuration: {}", e))?;
        Ok(config)
    }
}
