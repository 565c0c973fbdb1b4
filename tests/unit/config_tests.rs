//! Unit tests for TOML configuration loading and validation.

use std::io::Write;
use std::time::Duration;

use mcp_engine::config::GlobalConfig;
use mcp_engine::AppError;

#[test]
fn empty_file_yields_defaults() {
    let config = GlobalConfig::from_toml_str("").expect("defaults");
    assert_eq!(config, GlobalConfig::default());
    assert_eq!(config.http.host, "127.0.0.1");
    assert_eq!(config.http.port, 3000);
    assert_eq!(config.http.path, "/");
    assert_eq!(config.http.keepalive(), Duration::from_secs(30));
    assert_eq!(config.server.request_timeout_ms, 60_000);
    assert!(!config.server.strict);
}

#[test]
fn full_file_parses() {
    let raw = r#"
        [server]
        name = "demo"
        version = "2.0.0"
        instructions = "Use the echo tool."
        strict = true
        protocol_version = "2025-03-26"
        request_timeout_ms = 5000

        [http]
        host = "0.0.0.0"
        port = 8080
        path = "/mcp"
        keepalive_seconds = 10
    "#;
    let config = GlobalConfig::from_toml_str(raw).expect("parse");
    assert_eq!(config.server.name, "demo");
    assert_eq!(config.server.instructions.as_deref(), Some("Use the echo tool."));
    assert_eq!(config.http.port, 8080);

    let engine = config.engine_config();
    assert!(engine.strict());
    assert_eq!(engine.request_timeout(), Duration::from_millis(5000));
    assert_eq!(engine.preferred_protocol_version(), "2025-03-26");
}

#[test]
fn load_from_path_reads_file() {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    writeln!(file, "[http]\nport = 4321").expect("write");
    let config = GlobalConfig::load_from_path(file.path()).expect("load");
    assert_eq!(config.http.port, 4321);
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = GlobalConfig::load_from_path(dir.path().join("absent.toml")).expect_err("missing");
    assert!(matches!(err, AppError::Config(ref m) if m.contains("failed to read config")));
}

#[test]
fn invalid_toml_is_a_config_error() {
    let err = GlobalConfig::from_toml_str("[server\nname=").expect_err("invalid");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn unsupported_protocol_version_is_rejected() {
    let err = GlobalConfig::from_toml_str("[server]\nprotocol_version = \"1999-01-01\"")
        .expect_err("version");
    assert!(matches!(err, AppError::Config(ref m) if m.contains("1999-01-01")));
}

#[test]
fn zero_timeout_is_rejected() {
    let err =
        GlobalConfig::from_toml_str("[server]\nrequest_timeout_ms = 0").expect_err("timeout");
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn relative_http_path_is_rejected() {
    let err = GlobalConfig::from_toml_str("[http]\npath = \"mcp\"").expect_err("path");
    assert!(matches!(err, AppError::Config(ref m) if m.contains("http.path")));
}
