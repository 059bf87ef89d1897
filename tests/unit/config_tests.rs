//! Unit tests for factory configuration parsing and validation.

use std::time::Duration;

use cluster_session::{FactoryConfig, SessionError};

#[test]
fn empty_file_uses_defaults() {
    let config = FactoryConfig::from_toml_str("").expect("empty config is valid");
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.retry.max_credential_prompts, 3);
    assert_eq!(config.retry.legacy_max_attempts, 3);
    assert_eq!(config.default_timeout(), Duration::from_secs(60));
    assert!(config.iaas.domain_suffix.is_none());
    assert!(config.session.is_none());
}

#[test]
fn parses_all_sections() {
    let toml = r#"
[retry]
max_attempts = 5
max_credential_prompts = 1
legacy_max_attempts = 2
initial_backoff_millis = 100
max_backoff_millis = 1000

[timeouts]
session_seconds = 120

[iaas]
domain_suffix = "cloud.contoso.com"

[session]
head_node = "hn.contoso.com"
service_name = "echo"
transport_scheme = 3
use_session_pool = true
"#;
    let config = FactoryConfig::from_toml_str(toml).expect("valid config");
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.legacy_max_attempts, 2);
    assert_eq!(config.default_timeout(), Duration::from_secs(120));
    assert_eq!(config.iaas.domain_suffix.as_deref(), Some("cloud.contoso.com"));

    let session = config.session.expect("session section");
    assert_eq!(session.target.head_node, "hn.contoso.com");
    assert_eq!(session.target.transport_scheme.0, 3);
    assert!(session.use_session_pool);
    assert!(session.target.credential.is_none());
}

#[test]
fn zero_attempts_is_rejected() {
    let err = FactoryConfig::from_toml_str("[retry]\nmax_attempts = 0\n").unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
    assert!(err.to_string().contains("max_attempts"));
}

#[test]
fn zero_legacy_attempts_is_rejected() {
    let err = FactoryConfig::from_toml_str("[retry]\nlegacy_max_attempts = 0\n").unwrap_err();
    assert!(err.to_string().contains("legacy_max_attempts"));
}

#[test]
fn zero_timeout_is_rejected() {
    let err = FactoryConfig::from_toml_str("[timeouts]\nsession_seconds = 0\n").unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
}

#[test]
fn inverted_backoff_is_rejected() {
    let toml = "[retry]\ninitial_backoff_millis = 900\nmax_backoff_millis = 100\n";
    let err = FactoryConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("initial_backoff_millis"));
}

#[test]
fn invalid_default_session_is_rejected() {
    let toml = "[session]\nhead_node = \"\"\nservice_name = \"echo\"\n";
    let err = FactoryConfig::from_toml_str(toml).unwrap_err();
    assert!(err.to_string().contains("head_node"));
}

#[test]
fn malformed_toml_is_a_config_error() {
    let err = FactoryConfig::from_toml_str("[retry\nmax_attempts = 1").unwrap_err();
    assert!(matches!(err, SessionError::Config(_)));
    assert!(err.to_string().starts_with("config: invalid config"));
}

#[test]
fn loads_from_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("cluster-session.toml");
    std::fs::write(&path, "[timeouts]\nsession_seconds = 7\n").expect("write config");

    let config = FactoryConfig::load_from_path(&path).expect("load");
    assert_eq!(config.default_timeout(), Duration::from_secs(7));
}

#[test]
fn missing_file_is_a_config_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = FactoryConfig::load_from_path(dir.path().join("absent.toml")).unwrap_err();
    assert!(err.to_string().contains("failed to read config"));
}

#[test]
fn backoff_doubles_up_to_cap() {
    let toml = "[retry]\ninitial_backoff_millis = 100\nmax_backoff_millis = 350\n";
    let config = FactoryConfig::from_toml_str(toml).expect("valid config");
    assert_eq!(config.backoff(1), Duration::from_millis(100));
    assert_eq!(config.backoff(2), Duration::from_millis(200));
    assert_eq!(config.backoff(3), Duration::from_millis(350));
    assert_eq!(config.backoff(60), Duration::from_millis(350));
}
