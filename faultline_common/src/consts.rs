//! Workspace-wide constants.
//!
//! Single source of truth for default names and paths.

/// Default service name reported in logs when no config is supplied.
pub const DEFAULT_SERVICE_NAME: &str = "faultline";

/// Default configuration file path.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/faultline/faultline.toml";

/// Environment variable consulted for log filter directives.
pub const LOG_ENV_VAR: &str = "RUST_LOG";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_path_is_toml() {
        assert!(DEFAULT_CONFIG_PATH.ends_with(".toml"));
        assert!(!DEFAULT_SERVICE_NAME.is_empty());
    }
}
