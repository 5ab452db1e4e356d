// MIT License - Copyright (c) 2026 Peter Wright
// Engine configuration

use std::net::Ipv4Addr;
use std::time::Duration;

use crate::constants::{
    DEFAULT_ERROR_PAUSE, DEFAULT_MULTICAST_GROUP, DEFAULT_MULTICAST_TTL, DEFAULT_PORT,
    DEFAULT_RETRY_INTERVAL, DEFAULT_RETRY_MAX,
};
use crate::error::{AirtubError, Result};

/// How the heating circuit is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperateMode {
    /// Boiler follows a room temperature target (`atm` = 1).
    #[default]
    Auto,
    /// Boiler follows a flow temperature target (`atm` = 0).
    Manual,
}

impl OperateMode {
    /// Parse a mode name ("auto" / "manual"), case-insensitively.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Some(Self::Auto),
            "manual" | "man" => Some(Self::Manual),
            _ => None,
        }
    }

    /// Value of the `atm` key matching this mode.
    pub fn atm_value(&self) -> u8 {
        match self {
            Self::Auto => 1,
            Self::Manual => 0,
        }
    }
}

/// Configuration for one engine instance (one boiler, one secret).
#[derive(Clone)]
pub struct EngineConfig {
    /// Target device identifier, matched against inbound payloads
    pub device_id: String,
    /// Shared secret for the XOR cipher
    pub secret: String,
    /// Multicast group to join
    pub multicast_group: Ipv4Addr,
    /// UDP port for the group and for outbound commands
    pub port: u16,
    /// Local interface used to join the group
    pub interface: Ipv4Addr,
    /// Multicast TTL
    pub multicast_ttl: u32,
    /// Attempts per command
    pub retry_max: u32,
    /// Wait between a send and the acknowledgment check, in milliseconds
    pub retry_interval_ms: u64,
    /// Pause after a receive error, in milliseconds
    pub error_pause_ms: u64,
    /// Heating circuit operate mode
    pub operate_mode: OperateMode,
}

impl std::fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineConfig")
            .field("device_id", &self.device_id)
            .field("secret", &"<redacted>")
            .field("multicast_group", &self.multicast_group)
            .field("port", &self.port)
            .field("interface", &self.interface)
            .field("multicast_ttl", &self.multicast_ttl)
            .field("retry_max", &self.retry_max)
            .field("retry_interval_ms", &self.retry_interval_ms)
            .field("error_pause_ms", &self.error_pause_ms)
            .field("operate_mode", &self.operate_mode)
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            secret: String::new(),
            multicast_group: DEFAULT_MULTICAST_GROUP,
            port: DEFAULT_PORT,
            interface: Ipv4Addr::UNSPECIFIED,
            multicast_ttl: DEFAULT_MULTICAST_TTL,
            retry_max: DEFAULT_RETRY_MAX,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL.as_millis() as u64,
            error_pause_ms: DEFAULT_ERROR_PAUSE.as_millis() as u64,
            operate_mode: OperateMode::Auto,
        }
    }
}

impl EngineConfig {
    /// Create a new config builder starting from defaults.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn error_pause(&self) -> Duration {
        Duration::from_millis(self.error_pause_ms)
    }

    /// Check the config can drive an engine.
    pub fn validate(&self) -> Result<()> {
        if self.device_id.is_empty() {
            return Err(AirtubError::InvalidConfig {
                details: "device_id must not be empty".into(),
            });
        }
        if self.secret.is_empty() {
            return Err(AirtubError::InvalidConfig {
                details: "secret must not be empty".into(),
            });
        }
        if !self.secret.is_ascii() {
            return Err(AirtubError::InvalidConfig {
                details: "secret must be ASCII".into(),
            });
        }
        if !self.multicast_group.is_multicast() {
            return Err(AirtubError::InvalidConfig {
                details: format!("{} is not a multicast address", self.multicast_group),
            });
        }
        if self.retry_max == 0 {
            return Err(AirtubError::InvalidConfig {
                details: "retry_max must be at least 1".into(),
            });
        }
        Ok(())
    }
}

/// Builder for EngineConfig.
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn device_id(mut self, id: impl Into<String>) -> Self {
        self.config.device_id = id.into();
        self
    }

    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.config.secret = secret.into();
        self
    }

    pub fn multicast_group(mut self, group: Ipv4Addr) -> Self {
        self.config.multicast_group = group;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn interface(mut self, interface: Ipv4Addr) -> Self {
        self.config.interface = interface;
        self
    }

    pub fn multicast_ttl(mut self, ttl: u32) -> Self {
        self.config.multicast_ttl = ttl;
        self
    }

    pub fn retry_max(mut self, retries: u32) -> Self {
        self.config.retry_max = retries;
        self
    }

    pub fn retry_interval_ms(mut self, ms: u64) -> Self {
        self.config.retry_interval_ms = ms;
        self
    }

    pub fn error_pause_ms(mut self, ms: u64) -> Self {
        self.config.error_pause_ms = ms;
        self
    }

    pub fn operate_mode(mut self, mode: OperateMode) -> Self {
        self.config.operate_mode = mode;
        self
    }

    /// Device identifiers are matched lower-case on the wire.
    pub fn build(mut self) -> EngineConfig {
        self.config.device_id = self.config.device_id.to_lowercase();
        self.config
    }
}
