//! # Configuration Management
//!
//! Centralized configuration for the mesh protocol library.
//!
//! ## Configuration Sources
//! - TOML files via `from_file()` / `from_toml()`
//! - Direct instantiation with defaults
//! - Environment-variable overrides via `from_env()`
//!
//! Defaults are tuned for responsiveness on small meshes: a 100 ms poll
//! bound keeps shutdown prompt without busy-waiting, and the placeholder
//! service capacity of 1 matches peers that do not measure load.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::{MeshError, Result};

/// Placeholder capacity advertised for locally hosted services.
pub const DEFAULT_SERVICE_CAPACITY: u16 = 1;

/// Router tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Upper bound on one dispatch-loop wait, in milliseconds. The stop
    /// flag is re-checked at least this often.
    pub poll_timeout_ms: u64,

    /// Capacity advertised for services hosted on this node.
    pub local_service_capacity: u16,

    /// Pause before answering a stale self-withdrawal with a fresh net
    /// state broadcast, letting the withdrawal finish propagating.
    pub readvertise_delay_ms: u64,

    /// Depth of the event bus between channel readers and the dispatch
    /// worker.
    pub event_queue_depth: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            poll_timeout_ms: 100,
            local_service_capacity: DEFAULT_SERVICE_CAPACITY,
            readvertise_delay_ms: 100,
            event_queue_depth: 1024,
        }
    }
}

impl RouterConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| MeshError::Config(format!("failed to read config file: {e}")))?;
        Self::from_toml(&contents)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| MeshError::Config(format!("failed to parse TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables, starting from
    /// defaults.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(value) = std::env::var("MESH_PROTOCOL_POLL_TIMEOUT_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                config.poll_timeout_ms = ms;
            }
        }
        if let Ok(value) = std::env::var("MESH_PROTOCOL_SERVICE_CAPACITY") {
            if let Ok(capacity) = value.parse::<u16>() {
                config.local_service_capacity = capacity;
            }
        }
        if let Ok(value) = std::env::var("MESH_PROTOCOL_READVERTISE_DELAY_MS") {
            if let Ok(ms) = value.parse::<u64>() {
                config.readvertise_delay_ms = ms;
            }
        }
        if let Ok(value) = std::env::var("MESH_PROTOCOL_EVENT_QUEUE_DEPTH") {
            if let Ok(depth) = value.parse::<usize>() {
                config.event_queue_depth = depth;
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides to the default configuration.
    pub fn default_with_overrides<F>(mutator: F) -> Self
    where
        F: FnOnce(&mut Self),
    {
        let mut config = Self::default();
        mutator(&mut config);
        config
    }

    /// Reject values the router cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll_timeout_ms == 0 {
            return Err(MeshError::Config("poll_timeout_ms must be non-zero".into()));
        }
        if self.event_queue_depth == 0 {
            return Err(MeshError::Config("event_queue_depth must be non-zero".into()));
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn readvertise_delay(&self) -> Duration {
        Duration::from_millis(self.readvertise_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RouterConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.poll_timeout(), Duration::from_millis(100));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = RouterConfig::from_toml("poll_timeout_ms = 25\n").unwrap();
        assert_eq!(config.poll_timeout_ms, 25);
        assert_eq!(config.event_queue_depth, 1024);
    }

    #[test]
    fn zero_poll_timeout_rejected() {
        assert!(RouterConfig::from_toml("poll_timeout_ms = 0\n").is_err());
    }

    #[test]
    fn malformed_toml_rejected() {
        assert!(RouterConfig::from_toml("poll_timeout_ms = \"soon\"\n").is_err());
    }

    #[test]
    fn overrides_apply() {
        let config = RouterConfig::default_with_overrides(|c| {
            c.local_service_capacity = 9;
        });
        assert_eq!(config.local_service_capacity, 9);
        assert_eq!(config.poll_timeout_ms, 100);
    }
}
