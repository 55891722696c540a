use std::fs;
use std::path::PathBuf;

use halconfig::{ConfigError, EngineConfig};
use tempfile::TempDir;

#[test]
fn relative_include_paths_follow_the_config_file() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("engine.toml");
    fs::write(
        &path,
        "version = 1\n[shaders]\ninclude_paths = [\"include\", \"/opt/shaders\"]\n",
    )
    .expect("write config");

    let config = EngineConfig::from_path(&path).expect("load config");
    assert_eq!(config.shaders.include_paths[0], dir.path().join("include"));
    assert_eq!(config.shaders.include_paths[1], PathBuf::from("/opt/shaders"));
}

#[test]
fn missing_files_report_their_path() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("absent.toml");
    let err = EngineConfig::from_path(&path).unwrap_err();
    match err {
        ConfigError::Io { path: reported, .. } => assert_eq!(reported, path),
        other => panic!("unexpected error {other:?}"),
    }
}
