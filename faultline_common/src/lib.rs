//! faultline common library
//!
//! Shared constants and configuration loading utilities for all faultline
//! workspace crates.
//!
//! # Module Structure
//!
//! - [`config`] - Configuration loading traits and types
//! - [`consts`] - Workspace-wide constants
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use faultline_common::config::{ConfigLoader, SharedConfig};
//! use faultline_common::consts::DEFAULT_SERVICE_NAME;
//! ```

pub mod config;
pub mod consts;
pub mod prelude;
