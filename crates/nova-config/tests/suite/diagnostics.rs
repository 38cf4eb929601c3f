use nova_config::{
    CompressionSetting, ConfigValidationError, ConfigWarning, NovaIndexConfig,
    ValueValidationSetting,
};
use tempfile::tempdir;

#[test]
fn reports_unknown_keys_with_full_paths() {
    let text = r#"
typo = 1

[index]
shard_cuont = 4

[logging]
levle = "debug"
"#;

    let (_config, diagnostics) =
        NovaIndexConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert_eq!(
        diagnostics.unknown_keys,
        vec!["index.shard_cuont", "logging.levle", "typo"]
    );
}

#[test]
fn parses_index_section() {
    let text = r#"
[index]
root = "/tmp/nova-indexes"
shard_count = 8
compression = "zstd"
value_validation = "off"
"#;

    let (config, diagnostics) =
        NovaIndexConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert!(diagnostics.is_ok());
    assert_eq!(config.index.shard_count, 8);
    assert_eq!(config.index.compression, CompressionSetting::Zstd);
    assert_eq!(
        config.index.effective_value_validation(),
        ValueValidationSetting::Off
    );
}

#[test]
fn zero_shards_is_a_validation_error() {
    let text = r#"
[index]
shard_count = 0
"#;

    let (_config, diagnostics) =
        NovaIndexConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert!(!diagnostics.is_ok());
    assert!(matches!(
        diagnostics.errors.as_slice(),
        [ConfigValidationError::InvalidValue { toml_path, .. }] if toml_path == "index.shard_count"
    ));
}

#[test]
fn index_root_pointing_at_a_file_warns() {
    let dir = tempdir().expect("tempdir");
    let file = dir.path().join("not-a-dir");
    std::fs::write(&file, b"").expect("write file");

    let text = format!("[index]\nroot = {:?}\n", file.display().to_string());
    let (_config, diagnostics) =
        NovaIndexConfig::load_from_str_with_diagnostics(&text).expect("config should parse");

    assert!(diagnostics.is_ok());
    assert!(matches!(
        diagnostics.warnings.as_slice(),
        [ConfigWarning::IndexRootNotDirectory { .. }]
    ));
}

#[test]
fn invalid_logging_level_warns() {
    let text = r#"
[logging]
level = "nova.index=loud"
"#;

    let (_config, diagnostics) =
        NovaIndexConfig::load_from_str_with_diagnostics(text).expect("config should parse");

    assert!(matches!(
        diagnostics.warnings.as_slice(),
        [ConfigWarning::LoggingLevelInvalid { .. }]
    ));
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nova-index.toml");
    std::fs::write(&path, "[index]\nshard_count = 2\n").expect("write config");

    let config = NovaIndexConfig::load_from_path(&path).expect("load config");
    assert_eq!(config.index.shard_count, 2);

    let missing = NovaIndexConfig::load_from_path(dir.path().join("missing.toml"));
    assert!(matches!(missing, Err(nova_config::ConfigError::Io { .. })));
}
