//! File-level tests for pulsar-config.

use std::path::PathBuf;

use pulsar_config::{BackendConfig, ConfigError, VmConfig};
use tempfile::TempDir;

#[test]
fn test_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested/dir/pulsar.toml");

    let config = VmConfig {
        sample_rate: 48000,
        frame_size: 256,
        seed: 99,
        backend: BackendConfig::Wav {
            path: PathBuf::from("/tmp/out.wav"),
            max_frames: Some(500),
        },
    };
    config.save(&path).unwrap();
    assert!(path.exists());

    let loaded = VmConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    let err = VmConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFile { .. }));
}

#[test]
fn test_load_or_default_with_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    std::fs::write(&path, "frame_size = 32\n").unwrap();

    let config = VmConfig::load_or_default(Some(&path)).unwrap();
    assert_eq!(config.frame_size, 32);

    // An explicit path that does not exist is an error, not a silent default.
    let missing = dir.path().join("missing.toml");
    assert!(VmConfig::load_or_default(Some(&missing)).is_err());
}

#[test]
fn test_load_rejects_invalid_values() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "sample_rate = 0\n").unwrap();
    let err = VmConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid { field: "sample_rate", .. }));
}

#[test]
fn test_malformed_toml() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.toml");
    std::fs::write(&path, "frame_size = [").unwrap();
    assert!(matches!(
        VmConfig::load(&path).unwrap_err(),
        ConfigError::TomlParse(_)
    ));
}
