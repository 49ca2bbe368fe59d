//! Unit tests for config module

use memtriage::analysis::Severity;
use memtriage::Settings;
use tempfile::TempDir;

use super::helpers::write_config;

#[test]
fn default_config_has_expected_values() {
    let config = Settings::default();
    assert_eq!(config.analysis.max_chunk_tokens, 20_000);
    assert_eq!(config.analysis.chars_per_token, 4.0);
    assert_eq!(config.retry.base_delay_ms, 1_000);
    assert_eq!(config.retry.max_delay_ms, 60_000);
    assert_eq!(config.storage.evidence_directory, "~/memtriage_evidence");
    assert!(config.pipeline.escalate_on_severity.is_none());
}

#[test]
fn config_serialization_roundtrip() {
    let mut config = Settings::default();
    config.pipeline.escalate_on_severity = Some(Severity::Critical);
    let toml_str = toml::to_string(&config).unwrap();
    let parsed: Settings = toml::from_str(&toml_str).unwrap();
    assert_eq!(parsed, config);
}

#[test]
fn partial_config_fills_defaults() {
    let toml_str = r#"
[analysis]
concurrency = 4

[pipeline]
threat_threshold = 6.5
escalate_on_severity = "high"
"#;
    let config: Settings = toml::from_str(toml_str).unwrap();
    assert_eq!(config.analysis.concurrency, 4);
    assert_eq!(config.analysis.max_chunk_tokens, 20_000);
    assert_eq!(config.pipeline.threat_threshold, 6.5);
    assert_eq!(config.pipeline.escalate_on_severity, Some(Severity::High));
    assert_eq!(config.retry.max_attempts, 5);
}

#[test]
fn load_from_missing_file_returns_defaults() {
    let temp = TempDir::new().unwrap();
    let config = Settings::load_from(&temp.path().join("nope.toml")).unwrap();
    assert_eq!(config, Settings::default());
}

#[test]
fn load_from_reads_file() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[retry]\nmax_attempts = 2\n");
    let config = Settings::load_from(&path).unwrap();
    assert_eq!(config.retry.max_attempts, 2);
}

#[test]
fn load_from_rejects_invalid_values() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[analysis]\nconcurrency = 0\n");
    let err = Settings::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("analysis.concurrency must be > 0"));
}

#[test]
fn load_from_reports_parse_errors_with_path() {
    let temp = TempDir::new().unwrap();
    let path = write_config(&temp, "[analysis\n");
    let err = Settings::load_from(&path).unwrap_err();
    assert!(err.to_string().contains("Failed to parse config file"));
}

#[test]
fn save_to_creates_parent_directories() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("nested").join("dir").join("config.toml");
    let mut config = Settings::default();
    config.analysis.max_chunk_tokens = 8_000;

    config.save_to(&path).unwrap();
    let loaded = Settings::load_from(&path).unwrap();
    assert_eq!(loaded.analysis.max_chunk_tokens, 8_000);
}
