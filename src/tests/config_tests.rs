use super::*;
use tempfile::tempdir;

#[test]
fn test_missing_file_yields_defaults() {
    let dir = tempdir().unwrap();
    let config = RuntimeConfig::load(&dir.path().join("no-such.yaml")).unwrap();
    assert_eq!(config.store, StoreBackend::File);
    assert_eq!(config.max_cascade_depth, 16);
    assert_eq!(config.chat_context, 10);
    assert!(config.hot_reload);
    assert_eq!(config.llm.endpoint, "http://localhost:11434");
    assert_eq!(config.llm.model, "qwen3");
}

#[test]
fn test_partial_yaml_fills_in_defaults() {
    let yaml = r#"
data_dir: /tmp/hearth-test
store: sqlite
"#;
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, yaml).unwrap();

    let config = RuntimeConfig::load(&path).unwrap();
    assert_eq!(config.data_dir, PathBuf::from("/tmp/hearth-test"));
    assert_eq!(config.store, StoreBackend::Sqlite);
    assert_eq!(config.max_cascade_depth, 16);
    assert_eq!(config.llm.model, "qwen3");
}

#[test]
fn test_invalid_yaml_is_an_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "store: [not, a, backend").unwrap();
    assert!(RuntimeConfig::load(&path).is_err());
}

#[test]
fn test_zero_cascade_depth_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, "max_cascade_depth: 0").unwrap();
    assert!(RuntimeConfig::load(&path).is_err());
}

#[test]
fn test_path_helpers_hang_off_data_dir() {
    let config = RuntimeConfig {
        data_dir: PathBuf::from("/var/lib/hearth"),
        ..RuntimeConfig::default()
    };
    assert_eq!(
        config.event_log_path(),
        PathBuf::from("/var/lib/hearth/events.jsonl")
    );
    assert_eq!(
        config.sqlite_path(),
        PathBuf::from("/var/lib/hearth/events.db")
    );
    assert_eq!(config.logs_dir(), PathBuf::from("/var/lib/hearth/logs"));
    assert_eq!(
        config.resolved_modules_dir(),
        PathBuf::from("/var/lib/hearth/modules")
    );
}

#[test]
fn test_absolute_modules_dir_wins() {
    let yaml = r#"
data_dir: /var/lib/hearth
modules_dir: /etc/hearth/modules
"#;
    let dir = tempdir().unwrap();
    let path = dir.path().join("config.yaml");
    std::fs::write(&path, yaml).unwrap();

    let config = RuntimeConfig::load(&path).unwrap();
    assert_eq!(
        config.resolved_modules_dir(),
        PathBuf::from("/etc/hearth/modules")
    );
}
