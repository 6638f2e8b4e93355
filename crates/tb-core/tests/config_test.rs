use std::fs;
use std::path::PathBuf;

use tb_core::config::{Config, ConfigError, LogFormat};

/// Generate a unique temporary path for each test to avoid collisions.
fn tmp_config_path() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tb-config-test-{}", uuid::Uuid::new_v4()));
    fs::create_dir_all(&dir).unwrap();
    dir.join("config.toml")
}

fn cleanup(path: &PathBuf) {
    if let Some(parent) = path.parent() {
        let _ = fs::remove_dir_all(parent);
    }
}

#[test]
fn test_load_partial_file_fills_defaults() {
    let path = tmp_config_path();
    fs::write(
        &path,
        r#"
[server]
port = 4000

[cli]
command = "python3"
args = ["cli.py"]
cwd = "/opt/arcade"

[cli.env]
PYTHONUNBUFFERED = "1"
"#,
    )
    .unwrap();

    let cfg = Config::load_from(&path).unwrap();
    assert_eq!(cfg.server.port, 4000);
    assert_eq!(cfg.server.host, "0.0.0.0");
    assert_eq!(cfg.cli.command, "python3");
    assert_eq!(cfg.cli.args, vec!["cli.py"]);
    assert_eq!(cfg.cli.cwd.as_deref(), Some("/opt/arcade"));
    assert_eq!(cfg.cli.env.get("PYTHONUNBUFFERED").map(String::as_str), Some("1"));
    assert_eq!(cfg.cli.term, "xterm-256color");
    assert_eq!(cfg.terminal.min_cols, 20);
    assert_eq!(cfg.general.log_format, LogFormat::Pretty);

    cleanup(&path);
}

#[test]
fn test_load_missing_file_is_io_error() {
    let path = tmp_config_path();
    cleanup(&path);
    match Config::load_from(&path) {
        Err(ConfigError::Io(_)) => {}
        other => panic!("expected Io error, got: {other:?}"),
    }
}

#[test]
fn test_malformed_toml_is_parse_error() {
    match Config::from_toml("[server\nport = ") {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected Parse error, got: {other:?}"),
    }
}

#[test]
fn test_invalid_values_fail_validation() {
    let result = Config::from_toml("[terminal]\nmin_rows = 0\n");
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}

#[test]
fn test_toml_roundtrip() {
    let mut cfg = Config::default();
    cfg.server.static_dir = Some("public".into());
    cfg.general.log_format = LogFormat::Json;
    cfg.terminal.max_sessions = 8;

    let text = cfg.to_toml().unwrap();
    let parsed = Config::from_toml(&text).unwrap();
    assert_eq!(parsed, cfg);
}
