//! Prelude module for common re-exports.
//!
//! ```rust
//! use faultline_common::prelude::*;
//! ```

// ─── Logging ────────────────────────────────────────────────────────
pub use crate::config::LogLevel;

// ─── Configuration ──────────────────────────────────────────────────
pub use crate::config::{ConfigError, ConfigLoader, SharedConfig};

// ─── Constants ──────────────────────────────────────────────────────
pub use crate::consts::{DEFAULT_CONFIG_PATH, DEFAULT_SERVICE_NAME, LOG_ENV_VAR};
