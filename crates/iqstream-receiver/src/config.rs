//! Receiver configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or none at all) yields a working loopback receiver.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("tick_ms must be greater than zero")]
    ZeroTick,
    #[error("slot_count must be even and at least 4, got {0}")]
    SlotCount(usize),
    #[error("fifo_chunks must be greater than zero")]
    ZeroFifo,
    #[error("event_capacity must be greater than zero")]
    ZeroEvents,
    #[error("socket_timeout_ms must be greater than zero")]
    ZeroSocketTimeout,
    #[error("{0} is not an IPv4 multicast address")]
    NotMulticast(Ipv4Addr),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Local address the UDP socket binds to.
    pub bind_addr: IpAddr,
    pub port: u16,
    /// IPv4 group joined on all interfaces.
    pub multicast_group: Option<Ipv4Addr>,
    /// Nominal playout tick.
    pub tick_ms: u64,
    /// Decoder slots when `auto_slots` is off, and until the first
    /// metadata record arrives when it is on.
    pub slot_count: usize,
    /// Size the slot pool from the sample rate (about four seconds).
    pub auto_slots: bool,
    /// Apply the read/write balance correction on every tick.
    pub auto_correction: bool,
    /// Sample chunks (one per tick) the consumer FIFO holds.
    pub fifo_chunks: usize,
    pub event_capacity: usize,
    /// Socket read timeout; bounds shutdown latency.
    pub socket_timeout_ms: u64,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 9090,
            multicast_group: None,
            tick_ms: 50,
            slot_count: 16,
            auto_slots: true,
            auto_correction: true,
            fifo_chunks: 64,
            event_capacity: 64,
            socket_timeout_ms: 100,
        }
    }
}

impl ReceiverConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ReceiverConfig::default());
        }
        let config: ReceiverConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let input = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml_str(&input)
            .with_context(|| format!("failed to load config file {}", path.display()))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::ZeroTick);
        }
        if self.slot_count < 4 || self.slot_count % 2 != 0 {
            return Err(ConfigError::SlotCount(self.slot_count));
        }
        if self.fifo_chunks == 0 {
            return Err(ConfigError::ZeroFifo);
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::ZeroEvents);
        }
        if self.socket_timeout_ms == 0 {
            return Err(ConfigError::ZeroSocketTimeout);
        }
        if let Some(group) = self.multicast_group {
            if !group.is_multicast() {
                return Err(ConfigError::NotMulticast(group));
            }
        }
        Ok(())
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_millis(self.socket_timeout_ms)
    }
}
