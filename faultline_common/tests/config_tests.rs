//! Config loading tests against files on disk.

use faultline_common::config::{ConfigError, ConfigLoader, LogLevel, SharedConfig};
use serde::Deserialize;
use std::fs;
use tempfile::TempDir;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HostConfig {
    shared: SharedConfig,
    #[serde(default)]
    port: Option<u16>,
}

#[test]
fn loads_shared_table_from_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("faultline.toml");
    fs::write(
        &path,
        r#"
port = 9000

[shared]
log_level = "warn"
service_name = "crash-host"
"#,
    )
    .unwrap();

    let config = HostConfig::load(&path).unwrap();
    assert_eq!(config.shared.log_level, LogLevel::Warn);
    assert_eq!(config.shared.service_name, "crash-host");
    assert_eq!(config.port, Some(9000));
    assert!(config.shared.validate().is_ok());
}

#[test]
fn unknown_fields_surface_as_parse_errors() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("faultline.toml");
    fs::write(
        &path,
        r#"
bogus = true

[shared]
service_name = "crash-host"
"#,
    )
    .unwrap();

    let result = HostConfig::load(&path);
    assert!(matches!(result, Err(ConfigError::ParseError(_))));
}

#[test]
fn missing_file_is_reported_as_not_found() {
    let dir = TempDir::new().unwrap();
    let result = HostConfig::load(&dir.path().join("absent.toml"));
    assert!(matches!(result, Err(ConfigError::FileNotFound)));
}
