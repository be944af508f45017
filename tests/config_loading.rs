use std::io::Write;

use lattix_core::config::AppConfig;

#[test]
fn test_load_full_config_from_file() {
    let toml_content = r#"
[engine]
max_delegation_depth = 3
workers = 2
queue_capacity = 16
invoke_timeout_secs = 30
max_invocations = 40

[store]
path = "/tmp/lattix-test/flows.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.max_delegation_depth, 3);
    assert_eq!(config.engine.workers, 2);
    assert_eq!(config.engine.queue_capacity, 16);
    assert_eq!(config.engine.invoke_timeout_secs, 30);
    assert_eq!(config.engine.max_invocations, 40);
    assert_eq!(config.store.path, "/tmp/lattix-test/flows.db");
}

#[test]
fn test_env_var_expansion_in_config() {
    std::env::set_var("LATTIX_TEST_DATA_DIR", "/var/lib/lattix");

    let toml_content = r#"
[store]
path = "${LATTIX_TEST_DATA_DIR}/flows.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "/var/lib/lattix/flows.db");

    std::env::remove_var("LATTIX_TEST_DATA_DIR");
}

#[test]
fn test_unset_env_var_is_left_verbatim() {
    let toml_content = r#"
[store]
path = "${LATTIX_UNSET_DATA_DIR}/flows.db"
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");
    assert_eq!(config.store.path, "${LATTIX_UNSET_DATA_DIR}/flows.db");
}

#[test]
fn test_minimal_config_uses_defaults() {
    let toml_content = r#"
[engine]
workers = 1
"#;

    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(toml_content.as_bytes()).expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.workers, 1);
    assert_eq!(config.engine.max_delegation_depth, 5);
    assert_eq!(config.engine.queue_capacity, 64);
    assert_eq!(config.engine.invoke_timeout_secs, 120);
    assert_eq!(config.engine.max_invocations, 0);
    assert_eq!(config.store.path, "lattix.db");
}

#[test]
fn test_empty_config_file_is_all_defaults() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"").expect("write toml");

    let config = AppConfig::load(tmp.path()).expect("load config");

    assert_eq!(config.engine.workers, 4);
    assert_eq!(config.engine.max_delegation_depth, 5);
    assert_eq!(config.store.path, "lattix.db");
}

#[test]
fn test_malformed_toml_is_a_config_error() {
    let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
    tmp.write_all(b"[engine\nworkers = ").expect("write toml");

    let err = AppConfig::load(tmp.path()).expect_err("load should fail");
    assert!(err.to_string().contains("Config error"));
}
