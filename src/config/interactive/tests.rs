use super::load_existing_config as load_existing_config_impl;
use tempfile::TempDir;

#[test]
fn load_existing_config() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = load_existing_config_impl(temp_dir.path());
    assert!(!config.embedding.host.is_empty());
    assert!(config.embedding.port > 0);
    assert!(!config.embedding.model.is_empty());
    assert!(config.embedding.batch_size > 0);
    assert_eq!(config.base_dir, temp_dir.path());
}

#[test]
fn load_existing_config_falls_back_on_invalid_file() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    std::fs::write(temp_dir.path().join("config.toml"), "[embedding\n")
        .expect("should write config");

    let config = load_existing_config_impl(temp_dir.path());
    assert_eq!(config.embedding.model, "all-minilm:latest");
    assert_eq!(config.base_dir, temp_dir.path());
}
