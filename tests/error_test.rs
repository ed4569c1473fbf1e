//! Tests for error types

use trueno_eval::store::Status;
use trueno_eval::Error;

#[test]
fn test_configuration_error() {
    let error = Error::Configuration("No algorithms given for evaluation".to_string());
    let error_str = format!("{error}");
    assert!(error_str.contains("Configuration error"));
    assert!(error_str.contains("No algorithms given"));
    assert!(error.is_fatal());
    assert!(!error.is_timeout());
}

#[test]
fn test_adapter_messages_are_verbatim() {
    let timeout = Error::AdapterTimeout("test-exception-timeout".to_string());
    let failure = Error::AdapterExecution("test-exception".to_string());
    assert_eq!(timeout.to_string(), "test-exception-timeout");
    assert_eq!(failure.to_string(), "test-exception");
    assert!(timeout.is_timeout());
    assert!(!failure.is_timeout());
    assert!(!failure.is_fatal());
}

#[test]
fn test_reconciliation_error() {
    let error = Error::Reconciliation {
        host: "remote-1".to_string(),
        message: "connection refused".to_string(),
    };
    let error_str = format!("{error}");
    assert!(error_str.contains("remote-1"));
    assert!(error_str.contains("connection refused"));
    assert!(!error.is_fatal());
}

#[test]
fn test_invalid_transition_error() {
    let error = Error::InvalidTransition {
        key: "alg on c/d #1".to_string(),
        from: Status::Ok,
        to: Status::Running,
    };
    assert_eq!(
        error.to_string(),
        "Invalid status transition for alg on c/d #1: OK -> RUNNING"
    );
}

#[test]
fn test_io_error_conversion() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
    let error: Error = io_error.into();
    assert!(format!("{error}").contains("IO error"));
}

#[test]
fn test_serde_error_conversion() {
    let parse = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let error: Error = parse.into();
    assert!(format!("{error}").contains("Serialization error"));
}

#[test]
fn test_user_error_chain_is_kept() {
    let err = anyhow::anyhow!("disk full").context("writing scores");
    let error = Error::from_user(err);
    assert_eq!(error.to_string(), "writing scores: disk full");
}

#[test]
fn test_other_error() {
    let error = Error::Other("custom error message".to_string());
    assert_eq!(format!("{error}"), "custom error message");
}
