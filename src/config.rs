//! Engine configuration.
//!
//! Tuning knobs for the peer lifecycle and routing engine. Everything has
//! a sensible default; embedders usually only touch `endpoint`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("hop_limit must be at least 2")]
    HopLimitTooSmall,
}

/// Network engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Endpoint mode: participate in messaging but never forward for
    /// others and never broadcast routing state.
    #[serde(default)]
    pub endpoint: bool,

    /// How long a negotiation may sit waiting for the next frame before
    /// the peer is aborted, in milliseconds.
    #[serde(default = "NetworkConfig::default_negotiation_timeout_ms")]
    pub negotiation_timeout_ms: u64,

    /// Interval between keep-alive pings on active peers, in milliseconds.
    #[serde(default = "NetworkConfig::default_ping_interval_ms")]
    pub ping_interval_ms: u64,

    /// Interval between failure-detector polls on active peers,
    /// in milliseconds.
    #[serde(default = "NetworkConfig::default_ping_check_interval_ms")]
    pub ping_check_interval_ms: u64,

    /// How long an outbound message waits for an acknowledgement before
    /// rejecting, in milliseconds.
    #[serde(default = "NetworkConfig::default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Coalescing delay between a topology change and the resulting
    /// summary broadcast, in milliseconds.
    #[serde(default = "NetworkConfig::default_broadcast_delay_ms")]
    pub broadcast_delay_ms: u64,

    /// Maximum number of hops a Data frame may traverse.
    #[serde(default = "NetworkConfig::default_hop_limit")]
    pub hop_limit: usize,

    /// Edge weight assumed for a peer before any latency sample exists,
    /// in milliseconds.
    #[serde(default = "NetworkConfig::default_base_latency_ms")]
    pub base_latency_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            endpoint: false,
            negotiation_timeout_ms: 5_000,
            ping_interval_ms: 30_000,
            ping_check_interval_ms: 5_000,
            request_timeout_ms: 30_000,
            broadcast_delay_ms: 100,
            hop_limit: 16,
            base_latency_ms: 100,
        }
    }
}

impl NetworkConfig {
    fn default_negotiation_timeout_ms() -> u64 {
        5_000
    }
    fn default_ping_interval_ms() -> u64 {
        30_000
    }
    fn default_ping_check_interval_ms() -> u64 {
        5_000
    }
    fn default_request_timeout_ms() -> u64 {
        30_000
    }
    fn default_broadcast_delay_ms() -> u64 {
        100
    }
    fn default_hop_limit() -> usize {
        16
    }
    fn default_base_latency_ms() -> u64 {
        100
    }

    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an endpoint configuration.
    pub fn endpoint() -> Self {
        Self {
            endpoint: true,
            ..Self::default()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (value, field) in [
            (self.negotiation_timeout_ms, "negotiation_timeout_ms"),
            (self.ping_interval_ms, "ping_interval_ms"),
            (self.ping_check_interval_ms, "ping_check_interval_ms"),
            (self.request_timeout_ms, "request_timeout_ms"),
            (self.broadcast_delay_ms, "broadcast_delay_ms"),
            (self.base_latency_ms, "base_latency_ms"),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration { field });
            }
        }
        if self.hop_limit < 2 {
            return Err(ConfigError::HopLimitTooSmall);
        }
        Ok(())
    }
}
