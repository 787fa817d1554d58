use std::io::Write;

use omnid::config::Config;

#[test]
fn test_missing_file_yields_defaults() {
    let config = Config::from_file("/definitely/not/here.toml").unwrap();
    assert_eq!(config.log_level, "info");
    assert!(config.compression.enabled);
    assert_eq!(config.compression.min_threshold, 2048);
    assert_eq!(config.siderolink.api_url, "https://localhost:8090");
    assert!(!config.metrics.enabled);
}

#[test]
fn test_parse_toml_overrides() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(
        file,
        r#"
log_level = "debug"

[compression]
enabled = false
min_threshold = 4096

[siderolink]
api_url = "https://omnid.example:8090"
events_port = 9090

[store]
snapshot_path = "/var/lib/omnid/state.snapshot"
snapshot_interval = "10m"

[metrics]
enabled = true
port = 9999
"#
    )
    .unwrap();

    let config = Config::from_file(file.path().to_str().unwrap()).unwrap();
    assert_eq!(config.log_level, "debug");
    assert!(!config.compression.enabled);
    assert_eq!(config.compression.min_threshold, 4096);
    assert_eq!(config.siderolink.api_url, "https://omnid.example:8090");
    assert_eq!(config.siderolink.events_port, 9090);
    // Unset fields keep their defaults.
    assert_eq!(config.siderolink.logs_port, 8092);
    assert_eq!(
        config.store.snapshot_path.to_str().unwrap(),
        "/var/lib/omnid/state.snapshot"
    );
    assert_eq!(config.store.snapshot_interval.as_secs(), 600);
    assert!(config.metrics.enabled);
    assert_eq!(config.metrics.port, 9999);
}

#[test]
fn test_validation_rejects_bad_compression_level() {
    let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
    write!(file, "[compression]\nlevel = 99\n").unwrap();
    assert!(Config::from_file(file.path().to_str().unwrap()).is_err());
}
