//! Approval-gated tools backed by the remote service

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use common::mock_approval_server::{approved_status, function_call_from_path, rejected_status};
use common::{test_client, MockApprovalServer};
use hitl_client::{ApprovalError, ToolFunction};
use hitl_common::ContactChannel;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{body_partial_json, method, path, path_regex};
use wiremock::{Mock, ResponseTemplate};

#[derive(Debug, Default)]
struct Multiply {
    calls: AtomicUsize,
}

#[async_trait]
impl ToolFunction for Multiply {
    fn name(&self) -> &str {
        "multiply"
    }

    async fn call(&self, args: Value) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let x = args["x"].as_i64().unwrap_or_default();
        let y = args["y"].as_i64().unwrap_or_default();
        Ok((x * y).to_string())
    }
}

async fn setup_decided(server: &MockApprovalServer, status: Value) {
    server
        .mount(
            Mock::given(method("POST"))
                .and(path("/function_calls"))
                .and(body_partial_json(json!({
                    "spec": {
                        "fn": "multiply",
                        "kwargs": {"x": 2, "y": 5},
                        "channel": {"email": {"address": "a@example.com"}}
                    }
                })))
                .respond_with(common::mock_approval_server::echo_created())
                .expect(1),
        )
        .await;
    server
        .mount(
            Mock::given(method("GET"))
                .and(path_regex(r"^/function_calls/call-.+$"))
                .respond_with(function_call_from_path(status)),
        )
        .await;
}

#[tokio::test]
async fn test_approved_call_runs_tool() {
    let server = MockApprovalServer::start().await;
    setup_decided(&server, approved_status(None)).await;

    let gated = test_client(&server)
        .require_approval(Multiply::default(), Some(ContactChannel::email("a@example.com")));
    let result = gated.call(json!({"x": 2, "y": 5})).await.unwrap();

    assert_eq!(result, "10");
    assert_eq!(gated.inner().calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_denied_call_returns_feedback() {
    let server = MockApprovalServer::start().await;
    setup_decided(&server, rejected_status("use smaller numbers")).await;

    let gated = test_client(&server)
        .require_approval(Multiply::default(), Some(ContactChannel::email("a@example.com")));
    let result = gated.call(json!({"x": 2, "y": 5})).await.unwrap();

    assert_eq!(result, "User denied multiply with message: use smaller numbers");
    assert_eq!(gated.inner().calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_service_failure_is_an_error_not_a_denial() {
    let server = MockApprovalServer::start().await;
    server
        .mount(
            Mock::given(method("POST"))
                .and(path("/function_calls"))
                .respond_with(ResponseTemplate::new(500)),
        )
        .await;

    let gated = test_client(&server)
        .require_approval(Multiply::default(), Some(ContactChannel::email("a@example.com")));
    let err = gated.call(json!({"x": 2, "y": 5})).await.unwrap_err();

    assert_eq!(err.downcast_ref::<ApprovalError>().unwrap().kind(), "ServiceError");
    assert_eq!(gated.inner().calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_cancelled_while_waiting() {
    let server = MockApprovalServer::start().await;
    setup_decided(&server, common::mock_approval_server::pending_status()).await;
    let cancel = CancellationToken::new();

    let gated = test_client(&server)
        .require_approval(Multiply::default(), Some(ContactChannel::email("a@example.com")))
        .with_cancellation(cancel.clone());

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        canceller.cancel();
    });

    let err = gated.call(json!({"x": 2, "y": 5})).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ApprovalError>(),
        Some(ApprovalError::Cancelled)
    ));
    assert_eq!(gated.inner().calls.load(Ordering::SeqCst), 0);
}
