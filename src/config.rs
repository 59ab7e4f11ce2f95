//! Runtime configuration for the sniffer service.

use crate::{Result, SnifferError};
use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for one sniffer instance.
///
/// All durations are carried in seconds so the struct stays trivially
/// deserializable from environment variables and flag values.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnifferConfig {
    /// Bind host for the metric exposition endpoint
    pub host: String,
    /// Bind port for the metric exposition endpoint
    pub metrics_port: u16,
    /// TTL for expiring relation gauges
    pub metric_expiry_secs: u64,
    /// Ceiling on a single wire frame
    pub max_request_size: usize,
    /// Short TTL for per-endpoint auth sessions
    pub auth_endpoint_ttl_secs: u64,
    /// Long TTL for per-ip identity memory
    pub auth_ip_ttl_secs: u64,
    /// Diagnostic logs at request granularity
    pub verbose: bool,
}

impl Default for SnifferConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            metrics_port: 9870,
            metric_expiry_secs: 15 * 60,
            max_request_size: 100 * 1024 * 1024,
            auth_endpoint_ttl_secs: 5 * 60,
            auth_ip_ttl_secs: 30 * 60,
            verbose: false,
        }
    }
}

impl SnifferConfig {
    /// Load configuration from `KAFKA_SNIFFER_*` environment variables,
    /// falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        let settings = Config::builder()
            .add_source(Environment::with_prefix("KAFKA_SNIFFER"))
            .build()
            .map_err(|e| SnifferError::Config(e.to_string()))?;

        settings
            .try_deserialize::<SnifferConfig>()
            .map_err(|e| SnifferError::Config(e.to_string()))
    }

    pub fn metric_expiry(&self) -> Duration {
        Duration::from_secs(self.metric_expiry_secs)
    }

    pub fn auth_endpoint_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_endpoint_ttl_secs)
    }

    pub fn auth_ip_ttl(&self) -> Duration {
        Duration::from_secs(self.auth_ip_ttl_secs)
    }

    /// Validate bounds that would otherwise surface as stalls or unbounded
    /// allocation at runtime.
    pub fn validate(&self) -> Result<()> {
        if self.max_request_size == 0 {
            return Err(SnifferError::Config(
                "max_request_size must be > 0".to_string(),
            ));
        }
        if self.metric_expiry_secs == 0 {
            return Err(SnifferError::Config(
                "metric_expiry_secs must be > 0".to_string(),
            ));
        }
        if self.auth_endpoint_ttl_secs == 0 || self.auth_ip_ttl_secs == 0 {
            return Err(SnifferError::Config(
                "auth session TTLs must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
