use orphanq::config::{Config, WorkloadConfig};

#[test]
fn config_from_env_uses_defaults() {
    unsafe {
        std::env::remove_var("ORPHANQ_DIR");
        std::env::remove_var("LOG_LEVEL");
    }

    let config = Config::from_env().unwrap();
    assert_eq!(config.workload_dir, std::path::PathBuf::from("workload_dir"));
    assert!(!config.log_level.is_empty());
}

#[test]
fn workload_config_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("workload.toml");
    std::fs::write(&path, "restarts = 2\nreads = 7\nwrites = 3\nprobability = 0.5\n").unwrap();

    let config = WorkloadConfig::from_toml_file(&path).unwrap();
    assert_eq!(config.restarts, 2);
    assert_eq!(config.reads, 7);
    assert_eq!(config.writes, 3);
    assert_eq!(config.probability, 0.5);
    assert_eq!(config.empty_backoff_ms, 1);
}

#[test]
fn workload_config_file_errors_name_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "restarts = \"many\"\n").unwrap();

    let err = WorkloadConfig::from_toml_file(&path).unwrap_err();
    assert!(err.to_string().contains("bad.toml"), "got {err}");
}
