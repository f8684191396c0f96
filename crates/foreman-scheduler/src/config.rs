//! Configuration types for the scheduler.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Scheduler configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Diagnostics HTTP API configuration.
    pub api: ApiConfig,
    /// Heartbeat, sweep and broadcast timing.
    pub timing: TimingConfig,
    /// Scheduling policy selection.
    pub policy: PolicyConfig,
    /// Backing store selection.
    pub store: StoreConfig,
}

/// Diagnostics HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8085),
        }
    }
}

/// Timing configuration.
///
/// The heartbeat timeout must exceed the emission interval with margin, so
/// a single missed heartbeat never deregisters an agent.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Heartbeat emission interval advertised to agents.
    #[serde(with = "serde_duration_ms")]
    pub heartbeat_interval: Duration,
    /// Rolling deadline extension granted per heartbeat.
    #[serde(with = "serde_duration_ms")]
    pub heartbeat_timeout: Duration,
    /// Period of the dead-agent sweep. Detection latency is bounded by this,
    /// not by the heartbeat timeout alone.
    #[serde(with = "serde_duration_ms")]
    pub liveness_sweep_interval: Duration,
    /// Quiescence delay before broadcasting newly arrived work, so bursts of
    /// submissions coalesce into one broadcast.
    #[serde(with = "serde_duration_ms")]
    pub broadcast_quiescence: Duration,
    /// Re-broadcast period while unscheduled work remains. Re-broadcasts are
    /// unconditional, trading redundant notices for liveness; tune here.
    #[serde(with = "serde_duration_ms")]
    pub broadcast_retry: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(15),
            liveness_sweep_interval: Duration::from_secs(5),
            broadcast_quiescence: Duration::from_millis(500),
            broadcast_retry: Duration::from_secs(10),
        }
    }
}

/// Scheduling policy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Policy to resolve at startup.
    pub kind: PolicyKind,
    /// Jobs to assign per work request when the request names no capacity
    /// (throttled policy only).
    pub throttle_capacity: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            kind: PolicyKind::Fifo,
            throttle_capacity: 5,
        }
    }
}

/// Scheduling policy kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicyKind {
    /// Assign every matching job in queue order.
    Fifo,
    /// Assign at most the requested capacity per work request.
    Throttled,
}

/// Backing store configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Store backend to use.
    pub kind: StoreKind,
    /// Valkey settings, used when `kind = "valkey"`.
    pub valkey: ValkeyConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::None,
            valkey: ValkeyConfig::default(),
        }
    }
}

/// Backing store kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// No persistence; the scheduler runs purely in memory.
    None,
    /// In-process store, useful for tests and single-node audit.
    Memory,
    /// Durable Valkey/Redis store.
    Valkey,
}

/// Valkey configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValkeyConfig {
    /// Connection URL.
    pub url: String,
    /// Key prefix for job records.
    pub key_prefix: String,
}

impl Default for ValkeyConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_owned(),
            key_prefix: "foreman:".to_owned(),
        }
    }
}

/// Serde helper for Duration as milliseconds.
mod serde_duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
