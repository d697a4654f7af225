//! Tests for configuration validation

use parvi::config::WorkerPoolConfig;
use std::time::Duration;

#[test]
fn test_default_config_validation() {
    assert!(WorkerPoolConfig::new().validate().is_ok());
}

#[test]
fn test_invalid_worker_count() {
    let cfg = WorkerPoolConfig::new().with_worker_count(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_invalid_queue_depth() {
    let cfg = WorkerPoolConfig::new().with_max_queue_depth(0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_invalid_shutdown_timeout() {
    let cfg = WorkerPoolConfig::new().with_shutdown_timeout(Duration::ZERO);
    assert_eq!(cfg.shutdown_timeout_ms, 0);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_sub_second_shutdown_timeout_is_kept() {
    let cfg = WorkerPoolConfig::new().with_shutdown_timeout(Duration::from_millis(500));
    assert_eq!(cfg.shutdown_timeout_ms, 500);
    assert_eq!(cfg.shutdown_timeout(), Duration::from_millis(500));
    assert!(cfg.validate().is_ok());

    let tiny = WorkerPoolConfig::new().with_shutdown_timeout(Duration::from_micros(300));
    assert_eq!(tiny.shutdown_timeout_ms, 1);
    assert!(tiny.validate().is_ok());
}

#[test]
fn test_invalid_stack_size() {
    let cfg = WorkerPoolConfig::new().with_thread_stack_size(1024);
    assert!(cfg.validate().is_err());
}

#[test]
fn test_invalid_thread_name_prefix() {
    let cfg = WorkerPoolConfig::new().with_thread_name_prefix("  ");
    assert!(cfg.validate().is_err());
}

#[test]
fn test_builder_methods() {
    let cfg = WorkerPoolConfig::new()
        .with_worker_count(6)
        .with_max_queue_depth(32)
        .with_max_retries(9)
        .with_retry_backoff(Duration::from_millis(250))
        .with_shutdown_timeout(Duration::from_secs(30))
        .with_thread_name_prefix("http");

    assert_eq!(cfg.worker_count, 6);
    assert_eq!(cfg.max_queue_depth, 32);
    assert_eq!(cfg.max_retries, 9);
    assert_eq!(cfg.retry_backoff(), Duration::from_millis(250));
    assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
    assert_eq!(cfg.thread_name_prefix, "http");

    assert_eq!(WorkerPoolConfig::new().with_unlimited_retries().max_retries, u32::MAX);
}

#[test]
fn test_config_from_json() {
    let json = r#"{
        "worker_count": 4,
        "max_queue_depth": 50,
        "max_retries": 5,
        "retry_backoff_ms": 100
    }"#;

    let cfg = WorkerPoolConfig::from_json_str(json).unwrap();
    assert_eq!(cfg.worker_count, 4);
    assert_eq!(cfg.max_queue_depth, 50);
    assert_eq!(cfg.max_retries, 5);
    assert_eq!(cfg.retry_backoff(), Duration::from_millis(100));
    assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(5));
}

#[test]
fn test_config_from_json_rejects_invalid_values() {
    assert!(WorkerPoolConfig::from_json_str(r#"{ "max_queue_depth": 0 }"#).is_err());
    assert!(WorkerPoolConfig::from_json_str("not json").is_err());
}

#[test]
fn test_config_json_round_trip_preserves_prefix() {
    let cfg = WorkerPoolConfig::new().with_thread_name_prefix("reader");
    let json = serde_json::to_string(&cfg).unwrap();
    assert_eq!(WorkerPoolConfig::from_json_str(&json).unwrap(), cfg);
}
