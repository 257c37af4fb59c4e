//! Common test utilities for approval client testing

#![allow(dead_code)]

pub mod mock_approval_server;

use std::sync::Once;
use std::time::Duration;

use hitl_client::{ApprovalClient, RetryPolicy};
use hitl_common::{ClientConfig, ContactChannel, FunctionCallSpec};
use serde_json::{json, Map, Value};

pub use mock_approval_server::MockApprovalServer;

static INIT: Once = Once::new();

pub const TEST_API_KEY: &str = "sk-test-123";
pub const TEST_RUN_ID: &str = "test-run";

/// Initialize logging for tests
pub fn init_test_logging() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter("hitl_client=debug")
            .try_init();
    });
}

pub fn test_config(base_url: &str) -> ClientConfig {
    ClientConfig {
        api_base_url: base_url.to_string(),
        api_key: Some(TEST_API_KEY.to_string()),
        run_id: Some(TEST_RUN_ID.to_string()),
        poll_interval_ms: 20,
        ..Default::default()
    }
}

pub fn test_client(server: &MockApprovalServer) -> ApprovalClient {
    init_test_logging();
    ApprovalClient::new(&test_config(&server.base_url())).expect("client builds")
}

/// Client with fast exponential retries
pub fn retrying_client(server: &MockApprovalServer, attempts: u32) -> ApprovalClient {
    test_client(server).with_retry(
        RetryPolicy::exponential(attempts)
            .with_base_delay(Duration::from_millis(5))
            .with_max_delay(Duration::from_millis(20)),
    )
}

pub fn kwargs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("kwargs must be an object, got {}", other),
    }
}

/// `multiply` with foo=bar, sent to a@example.com
pub fn multiply_spec() -> FunctionCallSpec {
    FunctionCallSpec::builder()
        .fn_name("multiply")
        .kwargs(kwargs(json!({"foo": "bar"})))
        .channel(ContactChannel::email("a@example.com"))
        .build()
        .expect("valid spec")
}
