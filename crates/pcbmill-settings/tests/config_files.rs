use pcbmill_settings::{Config, ConfigError, SettingsError};
use std::fs;

#[test]
fn toml_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.toml");

    let mut config = Config::new();
    config.machine.auto_reset = true;
    config.machine.safe_z = 8.5;
    config.fabrication.copper_policy = "rotate-center-all".to_string();
    config.fabrication.toolpath_command = Some("pcb2gcode".to_string());
    config.save_to_file(&path).unwrap();

    let loaded = Config::load_from_file(&path).unwrap();
    assert_eq!(loaded, config);
}

#[test]
fn json_save_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let mut config = Config::new();
    config.bridge.port = 9001;
    config.fabrication.mirror_x = true;
    config.save_to_file(&path).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert!(text.contains("\"port\": 9001"));
    assert_eq!(Config::load_from_file(&path).unwrap(), config);
}

#[test]
fn invalid_file_is_rejected_on_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    fs::write(&path, "[machine]\nsafe_z = -2.0\n").unwrap();

    let err = Config::load_from_file(&path).unwrap_err();
    assert!(matches!(
        err,
        SettingsError::Config(ConfigError::ValueOutOfRange { ref key, .. }) if key == "machine.safe_z"
    ));
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    assert_eq!(Config::load_or_default(&path).unwrap(), Config::default());
    assert!(matches!(
        Config::load_from_file(&path),
        Err(SettingsError::LoadError { .. })
    ));
}
