//! Configuration resolution tests
//!
//! Tests that touch CIVITAS_* environment variables are marked #[serial] so
//! they never run concurrently.

use civitas_common::config::{load_toml_config, resolve_root_folder, TomlConfig, ENV_ROOT_FOLDER};
use serial_test::serial;
use std::env;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

#[test]
#[serial]
fn test_cli_argument_has_highest_priority() {
    env::set_var(ENV_ROOT_FOLDER, "/from/env");
    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/from/toml"));

    let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &config);
    assert_eq!(resolved, PathBuf::from("/from/cli"));

    env::remove_var(ENV_ROOT_FOLDER);
}

#[test]
#[serial]
fn test_env_beats_toml() {
    env::set_var(ENV_ROOT_FOLDER, "/from/env");
    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/from/toml"));

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/env"));

    env::remove_var(ENV_ROOT_FOLDER);
}

#[test]
#[serial]
fn test_toml_beats_default() {
    env::remove_var(ENV_ROOT_FOLDER);
    let mut config = TomlConfig::default();
    config.root_folder = Some(PathBuf::from("/from/toml"));

    assert_eq!(resolve_root_folder(None, &config), PathBuf::from("/from/toml"));
}

#[test]
#[serial]
fn test_default_root_folder_used_last() {
    env::remove_var(ENV_ROOT_FOLDER);
    let resolved = resolve_root_folder(None, &TomlConfig::default());
    assert!(resolved.to_string_lossy().contains("civitas"));
}

#[test]
fn test_explicit_config_file_loaded() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
root_folder = "/srv/civitas"

[server]
bind = "0.0.0.0:8080"

[auth]
session_ttl_hours = 8
"#
    )
    .unwrap();

    let config = load_toml_config(Some(file.path())).unwrap();
    assert_eq!(config.root_folder, Some(PathBuf::from("/srv/civitas")));
    assert_eq!(config.server.bind, "0.0.0.0:8080");
    assert_eq!(config.auth.session_ttl_hours, 8);
    assert_eq!(config.logging.level, "info");
}

#[test]
fn test_missing_explicit_config_is_error() {
    let result = load_toml_config(Some(Path::new("/definitely/not/here/civitas.toml")));
    assert!(result.is_err());
}

#[test]
fn test_malformed_config_is_error() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[server\nbind = ").unwrap();
    assert!(load_toml_config(Some(file.path())).is_err());
}

#[test]
#[serial]
fn test_env_overrides_apply() {
    env::set_var("CIVITAS_BIND", "0.0.0.0:9000");
    env::set_var("CIVITAS_WEBHOOK_SECRET", "hook-secret");
    env::set_var("CIVITAS_MAX_DISTANCE_KM", "12.5");
    env::set_var("CIVITAS_SESSION_TTL_HOURS", "not-a-number");

    let mut config = TomlConfig::default();
    config.apply_env_overrides();

    assert_eq!(config.server.bind, "0.0.0.0:9000");
    assert_eq!(config.whatsapp.webhook_secret.as_deref(), Some("hook-secret"));
    assert_eq!(config.routing.max_distance_km, Some(12.5));
    // Unparseable values are ignored, defaults kept
    assert_eq!(config.auth.session_ttl_hours, 24);

    env::remove_var("CIVITAS_BIND");
    env::remove_var("CIVITAS_WEBHOOK_SECRET");
    env::remove_var("CIVITAS_MAX_DISTANCE_KM");
    env::remove_var("CIVITAS_SESSION_TTL_HOURS");
}
