//! Coordinator configuration.
//!
//! ```toml
//! [shared]
//! service_name = "faultline"
//! log_level = "info"
//!
//! [relay]
//! enabled = true
//! capture_native_stack = true
//!
//! [policy]
//! native_corrupted_state = "fatal"
//!
//! [sink]
//! kind = "stderr"
//! max_frames = 32
//! ```
//!
//! Every table is optional; an empty file yields [`CoordinatorConfig::default`].

use faultline_common::config::{ConfigError, ConfigLoader, SharedConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::policy::PolicyConfig;
use crate::sink::SinkConfig;

/// `[relay]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelayConfig {
    /// Relay state right after `initialize()`.
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Capture a call stack inside the signal handler.
    #[serde(default = "enabled_by_default")]
    pub capture_native_stack: bool,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capture_native_stack: true,
        }
    }
}

/// Complete coordinator configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CoordinatorConfig {
    /// Fields common to every faultline service.
    #[serde(default)]
    pub shared: SharedConfig,
    /// Native relay settings.
    #[serde(default)]
    pub relay: RelayConfig,
    /// Per-channel disposition overrides.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Diagnostic sink selection.
    #[serde(default)]
    pub sink: SinkConfig,
}

impl CoordinatorConfig {
    /// Load and validate `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic checks serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        if self.sink.max_frames == 0 {
            return Err(ConfigError::ValidationError(
                "sink.max_frames must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
