//! Tests for error handling

use cappuccino_config::ConfigError;
use std::io;
use std::path::PathBuf;

#[test]
fn test_io_error_display() {
    let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
    let err = ConfigError::Io(io_err);

    let display = format!("{}", err);
    assert!(display.contains("config io error"));
    assert!(display.contains("file not found"));
}

#[test]
fn test_json_error_display() {
    let json_err: serde_json::Error =
        serde_json::from_str::<serde_json::Value>("{invalid").unwrap_err();
    let err = ConfigError::Json(json_err);

    assert!(err.to_string().starts_with("invalid config json"));
}

#[test]
fn test_not_found_error_display() {
    let err = ConfigError::NotFound(PathBuf::from("/some/path"));
    let display = format!("{}", err);
    assert!(display.contains("config not found"));
    assert!(display.contains("/some/path"));
}

#[test]
fn test_io_error_from_conversion() {
    let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
    let err: ConfigError = io_err.into();
    assert!(matches!(err, ConfigError::Io(_)));
}
