//! End-to-end command runs against a mock approval service

use clap::Parser;
use hitl_cli::{commands, display, Cli};
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

struct Harness {
    server: MockServer,
    dir: TempDir,
}

impl Harness {
    async fn start() -> Self {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.toml"), "").unwrap();
        Self {
            server: MockServer::start().await,
            dir,
        }
    }

    /// Parse and run `hitl <args>`, returning stdout
    async fn run(&self, args: &[&str]) -> anyhow::Result<String> {
        let config_path = self.dir.path().join("config.toml");
        let base = self.server.uri();
        let mut argv = vec![
            "hitl",
            "--config",
            config_path.to_str().unwrap(),
            "--api-base",
            base.as_str(),
            "--api-key",
            "sk-cli",
            "--run-id",
            "cli-run",
        ];
        argv.extend_from_slice(args);

        let cli = Cli::try_parse_from(argv)?;
        let config = commands::load_config(&cli)?;
        let mut out = Vec::new();
        commands::run(cli, config, &mut out).await?;
        Ok(String::from_utf8(out)?)
    }
}

fn call_json(call_id: &str, status: Value) -> Value {
    json!({
        "run_id": "cli-run",
        "call_id": call_id,
        "spec": {"fn": "multiply", "kwargs": {"x": 2}, "channel": {"email": {"address": "a@example.com"}}},
        "status": status
    })
}

#[tokio::test]
async fn test_create_prints_call_json() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/function_calls"))
        .and(body_partial_json(json!({
            "run_id": "cli-run",
            "spec": {"fn": "multiply", "kwargs": {"x": 2, "label": "q3"}}
        })))
        .respond_with(|request: &Request| {
            let mut body: Value = request.body_json().unwrap();
            body["status"] = json!({"requested_at": "2024-05-01T12:00:00Z"});
            ResponseTemplate::new(201).set_body_json(body)
        })
        .expect(1)
        .mount(&harness.server)
        .await;

    let output = harness
        .run(&["create", "--fn", "multiply", "-a", "x=2", "-a", "label=q3", "--email", "a@example.com"])
        .await
        .unwrap();

    let printed: Value = serde_json::from_str(&output).unwrap();
    assert!(printed["call_id"].as_str().unwrap().starts_with("call-"));
    assert_eq!(printed["spec"]["fn"], "multiply");
}

#[tokio::test]
async fn test_decision_prints_state() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/function_calls/call-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(call_json(
            "call-1",
            json!({"approved": false, "comment": "no"}),
        )))
        .mount(&harness.server)
        .await;

    let output = harness.run(&["decision", "call-1"]).await.unwrap();
    let printed: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(printed["state"], "decided");
    assert_eq!(printed["approved"], false);
    assert_eq!(printed["comment"], "no");
}

#[tokio::test]
async fn test_escalate_sends_recipients() {
    let harness = Harness::start().await;
    Mock::given(method("POST"))
        .and(path("/function_calls/call-1/escalate/email"))
        .and(body_partial_json(json!({
            "escalation_msg": "please look",
            "additional_recipients": [{"address": "boss@example.com", "field": "cc"}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(call_json(
            "call-1",
            json!({"last_escalated_at": "2024-05-01T12:05:00Z"}),
        )))
        .expect(1)
        .mount(&harness.server)
        .await;

    harness
        .run(&["escalate", "call-1", "--msg", "please look", "--cc", "boss@example.com"])
        .await
        .unwrap();
}

#[tokio::test]
async fn test_not_found_maps_to_failure_exit() {
    let harness = Harness::start().await;
    Mock::given(method("GET"))
        .and(path("/function_calls/call-x"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&harness.server)
        .await;

    let err = harness.run(&["get", "call-x"]).await.unwrap_err();
    let (message, code) = display::describe_error(&err);
    assert!(message.starts_with("NotFoundError: "));
    assert_eq!(code, display::EXIT_FAILURE);
}

#[tokio::test]
async fn test_invalid_input_maps_to_usage_exit() {
    let harness = Harness::start().await;

    // no channel and no default configured
    let err = harness.run(&["create", "--fn", "multiply"]).await.unwrap_err();
    let (message, code) = display::describe_error(&err);
    assert!(message.starts_with("ValidationError: "));
    assert_eq!(code, display::EXIT_USAGE);
}

#[tokio::test]
async fn test_config_show_hides_api_key() {
    let harness = Harness::start().await;
    let output = harness.run(&["config", "show"]).await.unwrap();
    assert!(output.contains("run_id = \"cli-run\""));
    assert!(!output.contains("sk-cli"));
}
