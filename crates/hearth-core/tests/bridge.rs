use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use uuid::Uuid;

use hearth_core::testing::{RecordingPublisher, ScriptedAgent};
use hearth_core::{
    ApprovalRegistry, Bridge, BridgeConfig, CommandHandler, Dispatcher, ToolDecision,
};

const COMMAND_TOPIC: &str = "claude/command";
const RESPONSE_TOPIC: &str = "claude/home/response";
const APPROVAL_REQUEST_TOPIC: &str = "claude/approval-request";
const APPROVAL_RESPONSE_TOPIC: &str = "claude/approval-response";

// ── Helpers ──────────────────────────────────────────────────────────

struct Harness {
    publisher: Arc<RecordingPublisher>,
    agent: Arc<ScriptedAgent>,
    dispatcher: Dispatcher,
}

fn credentials_file() -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hearth-e2e-{}", Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(".credentials.json");
    std::fs::write(&path, "{}").unwrap();
    path
}

fn harness(agent: ScriptedAgent) -> Harness {
    harness_with(agent, BridgeConfig::default())
}

fn harness_with(agent: ScriptedAgent, config: BridgeConfig) -> Harness {
    let publisher = RecordingPublisher::new();
    let registry = Arc::new(ApprovalRegistry::new());
    let agent = Arc::new(agent);
    let config = Arc::new(config);
    let handler = Arc::new(
        CommandHandler::new(
            publisher.clone(),
            registry.clone(),
            agent.clone(),
            config.clone(),
        )
        .with_credentials_path(credentials_file()),
    );
    let dispatcher = Dispatcher::new(config, registry, handler);
    Harness {
        publisher,
        agent,
        dispatcher,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within deadline"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn result_event(text: &str) -> Value {
    json!({"data": {"type": "result", "result": text}})
}

// ── Command round trips ──────────────────────────────────────────────

#[tokio::test]
async fn batched_command_publishes_one_complete_with_buffered_events() {
    let event = result_event("4");
    let h = harness(ScriptedAgent::emitting(vec![event.clone()]));

    h.dispatcher.dispatch(
        COMMAND_TOPIC,
        br#"{"source":"t","message":"2+2?","stream":false}"#,
    );
    wait_for(|| !h.publisher.on_topic(RESPONSE_TOPIC).is_empty()).await;

    let events = h.publisher.on_topic(RESPONSE_TOPIC);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "complete");
    assert_eq!(events[0]["content"], json!([event]));
    assert_eq!(events[0]["source_device"], "t");
    assert!(events[0]["duration_ms"].is_u64());
}

#[tokio::test]
async fn streaming_command_publishes_answer_chunk_complete() {
    let h = harness(ScriptedAgent::emitting(vec![result_event("4")]));

    h.dispatcher.dispatch(
        COMMAND_TOPIC,
        br#"{"source":"t","message":"2+2?","stream":true}"#,
    );
    wait_for(|| h.publisher.on_topic(RESPONSE_TOPIC).len() >= 3).await;

    let events = h.publisher.on_topic(RESPONSE_TOPIC);
    assert_eq!(events.len(), 3);
    assert_eq!(events[0]["type"], "answer");
    assert_eq!(events[0]["text"], "4");
    assert_eq!(events[0]["source_device"], "t");
    assert_eq!(events[1]["type"], "chunk");
    assert_eq!(events[1]["content"], result_event("4"));
    assert_eq!(events[2]["type"], "complete");
    assert!(events[2].get("content").is_none());
}

#[tokio::test]
async fn streaming_preserves_event_order() {
    let events: Vec<Value> = (1..=3).map(|n| json!({"data": {"n": n}})).collect();
    let h = harness(ScriptedAgent::emitting(events.clone()));

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"message":"go"}"#);
    wait_for(|| h.publisher.on_topic(RESPONSE_TOPIC).len() >= 4).await;

    let published = h.publisher.on_topic(RESPONSE_TOPIC);
    for (i, event) in events.iter().enumerate() {
        assert_eq!(published[i]["type"], "chunk");
        assert_eq!(&published[i]["content"], event);
    }
    assert_eq!(published[3]["type"], "complete");
}

// ── Approval round trips ─────────────────────────────────────────────

#[tokio::test]
async fn approved_tool_use_lets_the_command_finish() {
    let agent = ScriptedAgent::emitting(vec![result_event("done")])
        .with_tool_call("Bash", json!({"command": "touch x", "description": "make x"}));
    let h = harness(agent);

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"source":"t","message":"touch x"}"#);
    wait_for(|| !h.publisher.on_topic(APPROVAL_REQUEST_TOPIC).is_empty()).await;

    let requests = h.publisher.on_topic(APPROVAL_REQUEST_TOPIC);
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["toolName"], "Bash");
    assert_eq!(requests[0]["input"]["command"], "touch x");
    assert_eq!(requests[0]["sourceDevice"], "t");
    let request_id = requests[0]["requestId"].as_str().unwrap().to_string();
    assert!(Uuid::parse_str(&request_id).is_ok());

    let response = format!(r#"{{"requestId":"{request_id}","approved":true}}"#);
    h.dispatcher
        .dispatch(APPROVAL_RESPONSE_TOPIC, response.as_bytes());

    wait_for(|| h.publisher.on_topic(RESPONSE_TOPIC).len() >= 3).await;
    let decisions = h.agent.decisions();
    assert_eq!(decisions.len(), 1);
    assert!(decisions[0].is_allow());

    let events = h.publisher.on_topic(RESPONSE_TOPIC);
    assert_eq!(events.last().unwrap()["type"], "complete");
}

#[tokio::test]
async fn denied_tool_use_reports_the_reason() {
    let agent = ScriptedAgent::emitting(vec![result_event("stopped")])
        .with_tool_call("Bash", json!({"command": "rm -rf /"}));
    let h = harness(agent);

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"message":"clean up"}"#);
    wait_for(|| !h.publisher.on_topic(APPROVAL_REQUEST_TOPIC).is_empty()).await;

    let request_id = h.publisher.on_topic(APPROVAL_REQUEST_TOPIC)[0]["requestId"]
        .as_str()
        .unwrap()
        .to_string();
    let response = format!(r#"{{"requestId":"{request_id}","approved":false,"reason":"no"}}"#);
    h.dispatcher
        .dispatch(APPROVAL_RESPONSE_TOPIC, response.as_bytes());

    wait_for(|| !h.agent.decisions().is_empty()).await;
    assert_eq!(
        h.agent.decisions()[0],
        ToolDecision::Deny {
            message: "no".into()
        }
    );
}

#[tokio::test]
async fn non_boolean_approval_denies() {
    let agent = ScriptedAgent::emitting(vec![]).with_tool_call("Bash", json!({"command": "ls"}));
    let h = harness(agent);

    h.dispatcher.dispatch(COMMAND_TOPIC, br#"{"message":"ls"}"#);
    wait_for(|| !h.publisher.on_topic(APPROVAL_REQUEST_TOPIC).is_empty()).await;

    let request_id = h.publisher.on_topic(APPROVAL_REQUEST_TOPIC)[0]["requestId"]
        .as_str()
        .unwrap()
        .to_string();
    // A string "true" is not an approval.
    let response = format!(r#"{{"requestId":"{request_id}","approved":"true"}}"#);
    h.dispatcher
        .dispatch(APPROVAL_RESPONSE_TOPIC, response.as_bytes());

    wait_for(|| !h.agent.decisions().is_empty()).await;
    assert_eq!(
        h.agent.decisions()[0],
        ToolDecision::Deny {
            message: "Denied by user".into()
        }
    );
}

#[tokio::test]
async fn unanswered_approval_times_out_into_deny() {
    let agent = ScriptedAgent::emitting(vec![result_event("gave up")])
        .with_tool_call("Write", json!({"description": "edit config"}));
    let mut config = BridgeConfig::default();
    config.approval_timeout = Duration::from_millis(100);
    let h = harness_with(agent, config);

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"message":"edit"}"#);
    wait_for(|| !h.agent.decisions().is_empty()).await;

    match &h.agent.decisions()[0] {
        ToolDecision::Deny { message } => {
            assert!(message.starts_with("Approval timeout:"), "{message}");
        }
        other => panic!("expected deny, got {other:?}"),
    }

    // The timeout stays inside the arbiter: the run still ends with a
    // normal terminal event, not an extra error.
    wait_for(|| {
        h.publisher
            .on_topic(RESPONSE_TOPIC)
            .last()
            .is_some_and(|e| e["type"] == "complete")
    })
    .await;
    assert!(h
        .publisher
        .on_topic(RESPONSE_TOPIC)
        .iter()
        .all(|e| e["type"] != "error"));
}

#[tokio::test]
async fn new_command_preempts_outstanding_approval() {
    let agent = ScriptedAgent::emitting(vec![]).with_tool_call("Bash", json!({"command": "ls"}));
    let h = harness(agent);

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"source":"a","message":"first"}"#);
    wait_for(|| !h.publisher.on_topic(APPROVAL_REQUEST_TOPIC).is_empty()).await;
    let first_request = h.publisher.on_topic(APPROVAL_REQUEST_TOPIC)[0]["requestId"]
        .as_str()
        .unwrap()
        .to_string();

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"source":"b","message":"second"}"#);
    wait_for(|| !h.agent.decisions().is_empty()).await;
    assert_eq!(
        h.agent.decisions()[0],
        ToolDecision::Deny {
            message: "Approval timeout: New command received".into()
        }
    );

    // The late answer for the first request is an orphan with no effect.
    let late = format!(r#"{{"requestId":"{first_request}","approved":true}}"#);
    h.dispatcher
        .dispatch(APPROVAL_RESPONSE_TOPIC, late.as_bytes());

    // The second command raised its own request; approve it and let it
    // finish.
    wait_for(|| h.publisher.on_topic(APPROVAL_REQUEST_TOPIC).len() >= 2).await;
    let second_request = h.publisher.on_topic(APPROVAL_REQUEST_TOPIC)[1]["requestId"]
        .as_str()
        .unwrap()
        .to_string();
    assert_ne!(first_request, second_request);

    let response = format!(r#"{{"requestId":"{second_request}","approved":true}}"#);
    h.dispatcher
        .dispatch(APPROVAL_RESPONSE_TOPIC, response.as_bytes());

    wait_for(|| h.agent.decisions().len() >= 2).await;
    assert!(h.agent.decisions()[1].is_allow());
}

// ── Dispatcher robustness ────────────────────────────────────────────

#[tokio::test]
async fn malformed_payloads_never_kill_the_dispatcher() {
    let h = harness(ScriptedAgent::emitting(vec![result_event("ok")]));

    h.dispatcher.dispatch(COMMAND_TOPIC, b"not json");
    h.dispatcher.dispatch(APPROVAL_RESPONSE_TOPIC, b"{broken");
    h.dispatcher.dispatch("claude/unrelated", b"{}");

    // Still routes a valid command afterwards.
    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"message":"still alive"}"#);
    wait_for(|| !h.publisher.on_topic(RESPONSE_TOPIC).is_empty()).await;
}

#[tokio::test]
async fn orphan_approval_response_has_no_effect() {
    let h = harness(ScriptedAgent::emitting(vec![]));

    h.dispatcher.dispatch(
        APPROVAL_RESPONSE_TOPIC,
        br#"{"requestId":"never-issued","approved":true}"#,
    );

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(h.publisher.messages().is_empty());
}

#[tokio::test]
async fn missing_message_surfaces_error_envelope() {
    let h = harness(ScriptedAgent::emitting(vec![]));

    h.dispatcher
        .dispatch(COMMAND_TOPIC, br#"{"source":"t","stream":true}"#);
    wait_for(|| !h.publisher.on_topic(RESPONSE_TOPIC).is_empty()).await;

    let events = h.publisher.on_topic(RESPONSE_TOPIC);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["error"], "Missing required field: message");
}

// ── Lifecycle ────────────────────────────────────────────────────────

#[tokio::test]
async fn bridge_stays_down_when_disabled() {
    let config = BridgeConfig::default();
    assert!(!config.enabled);
    let agent = Arc::new(ScriptedAgent::emitting(vec![]));
    let bridge = Bridge::start(config, agent).unwrap();
    assert!(bridge.is_none());
}
