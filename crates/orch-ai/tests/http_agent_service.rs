use std::time::Duration;

use futures::StreamExt;
use orch_ai::{AgentService, ExecuteRequest, HttpAgentService, ModelRef};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn request() -> ExecuteRequest {
    ExecuteRequest {
        agent_name: "architect".into(),
        prompt: "design the thing".into(),
        model: ModelRef {
            provider_id: "anthropic".into(),
            model_id: "claude".into(),
        },
        working_dir: "/tmp/work".into(),
        env_vars: Default::default(),
    }
}

#[tokio::test]
async fn health_check_succeeds_on_200() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let svc = HttpAgentService::new("test", server.uri());
    svc.health_check(Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn health_check_reports_server_unreachable_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/health"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let svc = HttpAgentService::new("test", server.uri());
    let err = svc.health_check(Duration::from_secs(1)).await.unwrap_err();
    assert!(matches!(err, orch_ai::AgentServiceError::ServerUnreachable(_)));
}

#[tokio::test]
async fn spawn_and_stream_events_to_completion() {
    let server = MockServer::start().await;
    let session_id = uuid::Uuid::new_v4();

    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "session_id": session_id,
        })))
        .mount(&server)
        .await;

    let ndjson = format!(
        "{}\n{}\n{}\n",
        serde_json::json!({"type": "message", "text": "working on it"}),
        serde_json::json!({"type": "tool_completed", "tool": "bash"}),
        serde_json::json!({"type": "completed", "response": "done", "attempts": 1, "tools_executed": 1}),
    );

    Mock::given(method("GET"))
        .and(path(format!("/v1/sessions/{session_id}/events")))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(ndjson, "application/x-ndjson"),
        )
        .mount(&server)
        .await;

    let svc = HttpAgentService::new("test", server.uri());
    let handle = svc.spawn(&request()).await.unwrap();

    let events: Vec<_> = svc.events(&handle).collect().await;
    assert_eq!(events.len(), 3);
    assert!(matches!(events[2], orch_ai::AgentEvent::Completed { .. }));
}

#[tokio::test]
async fn spawn_classifies_rate_limit() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/sessions"))
        .respond_with(ResponseTemplate::new(429).set_body_string("rate limit exceeded"))
        .mount(&server)
        .await;

    let svc = HttpAgentService::new("test", server.uri());
    let err = svc.spawn(&request()).await.unwrap_err();
    assert!(matches!(err, orch_ai::AgentServiceError::RateLimited(_)));
    assert!(!err.is_retryable());
}
