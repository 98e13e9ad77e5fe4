// Test module - relaxed lint rules
#![allow(clippy::indexing_slicing)]
#![allow(clippy::panic)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(missing_docs)]

//! Suite file loading tests.

use pushbox::error::ErrorCode;
use pushbox::model::{OutputPattern, ScenarioTarget};
use pushbox::suite::{load_suite_file, validate_suite};
use std::fs;

#[test]
fn yaml_suite_overrides_defaults_and_resolves_work_dir() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.yaml");
    fs::write(
        &path,
        r"
name: smoke
work_dir: fixtures
runtime:
  port: 2299
scenarios:
  - name: direct
    target:
      kind: direct
      destination: user@nonexistent-host:2223
    expect:
      type: contains
      text: Could not resolve
    timeout_ms: 5000
",
    )
    .unwrap();

    let config = load_suite_file(&path).unwrap();

    assert_eq!(config.name, "smoke");
    assert_eq!(config.work_dir, dir.path().join("fixtures"));
    assert_eq!(config.runtime.port, 2299);
    assert_eq!(config.runtime.program, "docker");
    assert_eq!(config.scenarios.len(), 1);
    assert_eq!(
        config.scenarios[0].target,
        ScenarioTarget::Direct {
            destination: "user@nonexistent-host:2223".to_string()
        }
    );
    assert_eq!(
        config.scenarios[0].expect,
        OutputPattern::contains("Could not resolve")
    );
    assert!(validate_suite(&config).is_ok());
}

#[test]
fn json_suite_is_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.json");
    fs::write(
        &path,
        r#"{
  "work_dir": "/srv/e2e",
  "scenarios": [
    {
      "name": "remote-tool-missing",
      "target": { "kind": "sandbox", "image": "revlay-test-env:base", "sandbox": "revlay-e2e-server-base" },
      "expect": { "type": "regex", "pattern": "command not found|error", "case_insensitive": true }
    }
  ]
}"#,
    )
    .unwrap();

    let config = load_suite_file(&path).unwrap();

    assert_eq!(config.work_dir, std::path::PathBuf::from("/srv/e2e"));
    assert_eq!(config.scenarios[0].timeout_ms, 60_000);
    assert_eq!(
        config.scenarios[0].expect.to_string(),
        "/command not found|error/i"
    );
}

#[test]
fn malformed_suite_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.yml");
    fs::write(&path, "scenarios: [ { name: 1 ").unwrap();
    let err = load_suite_file(&path).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
}

#[test]
fn missing_suite_is_an_io_error() {
    let err = load_suite_file(std::path::Path::new("/nonexistent/suite.yaml")).unwrap_err();
    assert_eq!(err.code, ErrorCode::Io);
}

#[test]
fn sandbox_names_must_carry_the_cleanup_prefix() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.yaml");
    fs::write(
        &path,
        r"
scenarios:
  - name: stray
    target:
      kind: sandbox
      image: revlay-test-env:base
      sandbox: somebody-elses-container
    expect:
      type: contains
      text: error
",
    )
    .unwrap();
    let config = load_suite_file(&path).unwrap();
    let err = validate_suite(&config).unwrap_err();
    assert_eq!(err.code, ErrorCode::Config);
    assert!(err.message.contains("somebody-elses-container"));
}

#[test]
fn invalid_expectation_names_the_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("suite.yaml");
    fs::write(
        &path,
        r"
scenarios:
  - name: broken
    target: { kind: direct, destination: nowhere }
    expect: { type: regex, pattern: '(unclosed' }
",
    )
    .unwrap();
    let config = load_suite_file(&path).unwrap();
    let err = validate_suite(&config).unwrap_err();
    assert!(err.message.starts_with("scenario 'broken'"));
}
