//! Integration test: Configuration utilities
//!
//! Tests the bin_common configuration loading functionality.

use peerhub_suite::bin_common::{load_config_from_env, ConfigType};
use std::env;

#[test]
fn test_hub_config_default() {
    // Clear env var to test default
    env::remove_var("HUB_CONFIG_PATH");

    let config_path = load_config_from_env(ConfigType::Hub);
    assert_eq!(config_path.to_str().unwrap(), "config/hub_config.yaml");
}

#[test]
fn test_custom_config() {
    let custom = ConfigType::Custom("custom/path.yaml".to_string());
    let config_path = load_config_from_env(custom);

    assert_eq!(config_path.to_str().unwrap(), "custom/path.yaml");
}

#[test]
fn test_config_type_env_var_names() {
    assert_eq!(ConfigType::Hub.env_var_name(), "HUB_CONFIG_PATH");
    assert_eq!(
        ConfigType::Custom("x.yaml".to_string()).env_var_name(),
        "CONFIG_PATH"
    );
}

#[test]
fn test_sample_config_parses() {
    let config = peerhub::HubConfig::from_yaml_file("config/hub_config.yaml").unwrap();
    assert_eq!(config.listen_addr, "127.0.0.1:9190");
    assert_eq!(config.ping_interval_ms, 10_000);
}
