//! Bridge configuration

use crate::{types::ParseFlags, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration shared by every media and player created from an instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Flags passed to the native parse when the caller gives none
    pub parse_flags: ParseFlags,
    /// Parse timeout used when the caller gives none (milliseconds)
    pub default_parse_timeout_ms: Option<u64>,
    /// Also hand the timeout to the native start-parse call.
    /// The local timer is armed either way.
    pub forward_timeout_to_engine: bool,
    /// Name of the UI dispatch thread started by [`crate::DispatchQueue`]
    pub dispatch_thread_name: String,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            parse_flags: ParseFlags::LOCAL,
            default_parse_timeout_ms: None,
            forward_timeout_to_engine: true,
            dispatch_thread_name: "mediabridge-ui".to_string(),
        }
    }
}

impl CoreConfig {
    /// Load configuration from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_parse_timeout_ms == Some(0) {
            return Err(Error::InvalidConfig(
                "default_parse_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.dispatch_thread_name.trim().is_empty() {
            return Err(Error::InvalidConfig(
                "dispatch_thread_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn default_parse_timeout(&self) -> Option<Duration> {
        self.default_parse_timeout_ms.map(Duration::from_millis)
    }
}
