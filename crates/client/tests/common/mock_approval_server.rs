//! Mock approval service for testing the client against real HTTP

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Mock approval service
pub struct MockApprovalServer {
    server: MockServer,
}

impl MockApprovalServer {
    /// Start a new mock approval service
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Self { server }
    }

    pub fn base_url(&self) -> String {
        self.server.uri()
    }

    pub fn inner(&self) -> &MockServer {
        &self.server
    }

    pub async fn mount(&self, mock: Mock) {
        mock.mount(&self.server).await;
    }

    /// `POST /function_calls` stores nothing and echoes the request back as a pending call
    pub async fn setup_create_function_call(&self) {
        Mock::given(method("POST"))
            .and(path("/function_calls"))
            .respond_with(echo_created())
            .mount(&self.server)
            .await;
    }

    /// `GET /function_calls/{id}` returns a `multiply` call with the given status
    pub async fn setup_function_call(&self, call_id: &str, status: Value) {
        Mock::given(method("GET"))
            .and(path(format!("/function_calls/{}", call_id)))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(function_call_json(call_id, status)),
            )
            .mount(&self.server)
            .await;
    }

    /// `POST /contact_requests` echoes the request back as an unanswered contact
    pub async fn setup_create_human_contact(&self) {
        Mock::given(method("POST"))
            .and(path("/contact_requests"))
            .respond_with(echo_created())
            .mount(&self.server)
            .await;
    }

    pub async fn setup_not_found(&self, http_method: &str, endpoint: &str) {
        Mock::given(method(http_method))
            .and(path(endpoint))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "error": {"code": "not_found", "message": "no such record"}
            })))
            .mount(&self.server)
            .await;
    }

    /// Number of received requests with the given method and path
    pub async fn request_count(&self, http_method: &str, endpoint: &str) -> usize {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path() == endpoint)
            .count()
    }

    /// Requests whose path starts with `prefix`
    pub async fn requests_with_prefix(&self, http_method: &str, prefix: &str) -> Vec<Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == http_method && r.url.path().starts_with(prefix))
            .collect()
    }
}

/// Record for a `multiply` function call as the service returns it
pub fn function_call_json(call_id: &str, status: Value) -> Value {
    json!({
        "run_id": super::TEST_RUN_ID,
        "call_id": call_id,
        "spec": {
            "fn": "multiply",
            "kwargs": {"foo": "bar"},
            "channel": {"email": {"address": "a@example.com"}}
        },
        "status": status
    })
}

pub fn pending_status() -> Value {
    json!({"requested_at": "2024-05-01T12:00:00Z"})
}

pub fn escalated_status() -> Value {
    json!({
        "requested_at": "2024-05-01T12:00:00Z",
        "last_escalated_at": "2024-05-01T12:05:00Z"
    })
}

pub fn approved_status(comment: Option<&str>) -> Value {
    json!({
        "requested_at": "2024-05-01T12:00:00Z",
        "responded_at": "2024-05-01T12:10:00Z",
        "approved": true,
        "comment": comment
    })
}

pub fn rejected_status(comment: &str) -> Value {
    json!({
        "requested_at": "2024-05-01T12:00:00Z",
        "responded_at": "2024-05-01T12:10:00Z",
        "approved": false,
        "comment": comment
    })
}

/// 201 with the posted `{run_id, call_id, spec}` plus a fresh status
pub fn echo_created() -> impl Respond {
    |request: &Request| {
        let mut body: Value = match request.body_json() {
            Ok(body) => body,
            Err(_) => return ResponseTemplate::new(400),
        };
        body["status"] = pending_status();
        ResponseTemplate::new(201).set_body_json(body)
    }
}

/// 200 with a `multiply` record whose id is the path segment after `/function_calls/`
pub fn function_call_from_path(status: Value) -> impl Respond {
    move |request: &Request| {
        let id = request
            .url
            .path()
            .trim_start_matches("/function_calls/")
            .split('/')
            .next()
            .unwrap_or_default()
            .to_string();
        ResponseTemplate::new(200).set_body_json(function_call_json(&id, status.clone()))
    }
}
