//! Centralized Configuration Management
//!
//! Every tunable of the routing core lives here and is passed into the router at
//! construction. Nothing is read from ambient global settings.

use core::time::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::codec::MAX_WIRE_TEXT_CHARS;
use crate::errors::{MeshChatError, Result};
use crate::types::Ttl;

// ----------------------------------------------------------------------------
// Router Configuration
// ----------------------------------------------------------------------------

/// Behaviour of the routing state machine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Send a read receipt back when a message for this device arrives
    pub read_receipts_enabled: bool,
    /// Longest text accepted from the local user, in characters
    pub max_message_length: usize,
    /// Relay budget stamped on messages created here
    pub default_ttl: u8,
    /// Forward messages addressed to other devices
    pub relay_enabled: bool,
    /// Hand own messages to every neighbour when the receiver is not directly connected
    pub flood_own_messages: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            read_receipts_enabled: true,
            max_message_length: 260,
            default_ttl: Ttl::DEFAULT.value(),
            relay_enabled: true,
            flood_own_messages: true,
        }
    }
}

impl RouterConfig {
    pub fn ttl(&self) -> Ttl {
        Ttl::new(self.default_ttl)
    }
}

// ----------------------------------------------------------------------------
// Retry Configuration
// ----------------------------------------------------------------------------

/// Store-and-forward policy for messages without a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// An entry with this many failed attempts is expired
    pub max_attempts: u32,
    /// An entry older than this is expired
    pub retry_window_secs: u64,
    /// Period of the background retry sweep
    pub sweep_interval_secs: u64,
    /// A send with no reported outcome after this long counts as failed
    pub send_timeout_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_window_secs: 600,
            sweep_interval_secs: 5,
            send_timeout_secs: 10,
        }
    }
}

impl RetryPolicy {
    pub fn retry_window(&self) -> Duration {
        Duration::from_secs(self.retry_window_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

// ----------------------------------------------------------------------------
// Deduplication Configuration
// ----------------------------------------------------------------------------

/// Bounds of the seen-message ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    /// Entries older than this are forgotten
    pub window_secs: u64,
    /// Maximum number of remembered messages; the oldest is evicted first
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_secs: 900,
            capacity: 4096,
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

// ----------------------------------------------------------------------------
// Channel Configuration
// ----------------------------------------------------------------------------

/// Buffer sizes for the CSP channels between tasks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Buffer size for Command channels (UI → Router)
    pub command_buffer_size: usize,
    /// Buffer size for Event channels (Radio → Router)
    pub event_buffer_size: usize,
    /// Buffer size for Effect channels (Router → Radio)
    pub effect_buffer_size: usize,
    /// Buffer size for AppEvent channels (Router → UI)
    pub app_event_buffer_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer_size: 32,   // UI commands are infrequent
            event_buffer_size: 128,    // Radio traffic can be bursty
            effect_buffer_size: 128,   // Floods fan out to every neighbour
            app_event_buffer_size: 64, // UI updates need responsiveness
        }
    }
}

impl ChannelConfig {
    /// Create configuration optimized for testing
    pub fn testing() -> Self {
        Self {
            command_buffer_size: 100,
            event_buffer_size: 256,
            effect_buffer_size: 256,
            app_event_buffer_size: 256,
        }
    }
}

// ----------------------------------------------------------------------------
// Top-level Configuration
// ----------------------------------------------------------------------------

/// Complete configuration of one MeshChat node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshChatConfig {
    pub router: RouterConfig,
    pub retry: RetryPolicy,
    pub dedup: DedupConfig,
    pub channels: ChannelConfig,
}

impl MeshChatConfig {
    /// Configuration with short timers and roomy channels for tests
    pub fn testing() -> Self {
        Self {
            router: RouterConfig::default(),
            retry: RetryPolicy {
                sweep_interval_secs: 1,
                send_timeout_secs: 2,
                ..RetryPolicy::default()
            },
            dedup: DedupConfig::default(),
            channels: ChannelConfig::testing(),
        }
    }

    /// Reject configurations the router cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.router.max_message_length == 0 {
            return Err(MeshChatError::config_error(
                "router.max_message_length must be positive",
            ));
        }
        if self.router.max_message_length > MAX_WIRE_TEXT_CHARS {
            return Err(MeshChatError::config_error(format!(
                "router.max_message_length exceeds the wire limit of {} characters",
                MAX_WIRE_TEXT_CHARS
            )));
        }
        if self.router.default_ttl == 0 {
            return Err(MeshChatError::config_error("router.default_ttl must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(MeshChatError::config_error("retry.max_attempts must be positive"));
        }
        if self.retry.retry_window_secs == 0
            || self.retry.sweep_interval_secs == 0
            || self.retry.send_timeout_secs == 0
        {
            return Err(MeshChatError::config_error(
                "retry timers must be positive",
            ));
        }
        if self.dedup.capacity == 0 {
            return Err(MeshChatError::config_error("dedup.capacity must be positive"));
        }
        if self.dedup.window_secs < self.retry.retry_window_secs {
            // Retried copies must still be recognised as duplicates
            return Err(MeshChatError::config_error(
                "dedup.window_secs must not be shorter than retry.retry_window_secs",
            ));
        }
        let channels = &self.channels;
        if channels.command_buffer_size == 0
            || channels.event_buffer_size == 0
            || channels.effect_buffer_size == 0
            || channels.app_event_buffer_size == 0
        {
            return Err(MeshChatError::config_error("channel buffers must be positive"));
        }
        Ok(())
    }

    /// Parse and validate a TOML document; missing keys take their defaults
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: MeshChatConfig = toml::from_str(source)
            .map_err(|e| MeshChatError::config_error(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MeshChatError::config_error(format!(
                "failed to read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MeshChatError::config_error(format!("failed to render TOML: {}", e)))
    }
}
