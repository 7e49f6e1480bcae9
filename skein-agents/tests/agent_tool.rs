mod common;

use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::json;

use common::{CapturingAgent, ScriptedAgent};
use skein_agents::agent_tool::{react_chat_history, AgentState, AgentTool, Tool, ToolError};
use skein_agents::event::AgentEvent;
use skein_agents::message::{Message, ToolCall};

fn assistant_with_call(id: &str, name: &str, arguments: &str) -> Message {
    Message {
        role: Message::ASSISTANT.to_string(),
        tool_calls: vec![ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            arguments: arguments.to_string(),
        }],
        ..Default::default()
    }
}

#[test]
fn tool_info_exposes_agent_identity_and_schema() {
    let agent = ScriptedAgent::new("TestAgent", "Test agent description", vec![]);
    let tool = AgentTool::new(agent);
    let info = tool.info();
    assert_eq!(info.name, "TestAgent");
    assert_eq!(info.description, "Test agent description");
    assert!(info.params_schema["properties"]["request"].is_object());
}

#[tokio::test]
async fn invokable_run_returns_final_message_content() {
    let agent = ScriptedAgent::new(
        "TestAgent",
        "desc",
        vec![AgentEvent::from_message(
            "TestAgent",
            Message::assistant("Test response"),
        )],
    );
    let tool = AgentTool::new(agent);
    let out = tool
        .invokable_run(None, r#"{"request":"Test request"}"#)
        .await
        .unwrap();
    assert_eq!(out, "Test response");
}

#[tokio::test]
async fn invokable_run_accepts_tool_role_output() {
    let agent = ScriptedAgent::new(
        "TestAgent",
        "desc",
        vec![AgentEvent::from_message(
            "TestAgent",
            Message::tool("Tool response", "test-id", "lookup"),
        )],
    );
    let tool = AgentTool::new(agent);
    let out = tool
        .invokable_run(None, r#"{"request":"Test tool request"}"#)
        .await
        .unwrap();
    assert_eq!(out, "Tool response");
}

#[tokio::test]
async fn invalid_json_arguments_fail() {
    let agent = ScriptedAgent::new("TestAgent", "desc", vec![]);
    let tool = AgentTool::new(agent);
    let err = tool.invokable_run(None, "invalid json").await.unwrap_err();
    assert!(matches!(err, ToolError::InvalidArguments(_)));
}

#[tokio::test]
async fn no_events_is_an_error() {
    let agent = ScriptedAgent::new("TestAgent", "desc", vec![]);
    let tool = AgentTool::new(agent);
    let err = tool
        .invokable_run(None, r#"{"request":"Test request"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::NoEvents));
}

#[tokio::test]
async fn event_error_propagates() {
    let agent = ScriptedAgent::new(
        "TestAgent",
        "desc",
        vec![AgentEvent::error("TestAgent", "model unavailable")],
    );
    let tool = AgentTool::new(agent);
    let err = tool
        .invokable_run(None, r#"{"request":"Test request"}"#)
        .await
        .unwrap_err();
    assert!(matches!(err, ToolError::AgentFailed(message) if message.contains("unavailable")));
}

#[tokio::test]
async fn full_chat_history_drops_the_in_flight_tool_call() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let agent = CapturingAgent::new(
        "test-agent",
        "a test agent",
        captured.clone(),
        vec![AgentEvent::from_message(
            "test-agent",
            Message::assistant("done"),
        )],
    );
    let tool = AgentTool::new(agent).with_full_chat_history();

    // The trailing assistant message is the unresolved tool call this
    // hand-off replaces; it must not survive the rewrite.
    let state = AgentState {
        agent_name: "react-agent".to_string(),
        messages: vec![
            Message::user("first user message"),
            Message::assistant("first assistant response"),
            assistant_with_call("call-1", "test-agent", r#"{"request":"q"}"#),
        ],
    };
    let out = tool
        .invokable_run(Some(&state), r#"{"request":"some ignored input"}"#)
        .await
        .unwrap();
    assert_eq!(out, "done");

    let received = captured.lock().clone();
    assert_eq!(received.len(), 4);
    assert_eq!(received[0].content, "first user message");
    assert_eq!(
        received[1].content,
        "For context: [react-agent] said: first assistant response."
    );
    assert_eq!(
        received[2].content,
        "For context: [react-agent] called tool: `transfer_to_agent` with arguments: test-agent."
    );
    assert_eq!(
        received[3].content,
        "For context: [react-agent] `transfer_to_agent` tool returned result: successfully transferred to agent [test-agent]."
    );
    assert!(received.iter().all(|m| m.role == Message::USER));
}

#[tokio::test]
async fn full_chat_history_keeps_a_completed_assistant_utterance() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let agent = CapturingAgent::new(
        "test-agent",
        "a test agent",
        captured.clone(),
        vec![AgentEvent::from_message(
            "test-agent",
            Message::assistant("done"),
        )],
    );
    let tool = AgentTool::new(agent).with_full_chat_history();

    let state = AgentState {
        agent_name: "react-agent".to_string(),
        messages: vec![Message::user("prev"), Message::assistant("resp")],
    };
    let out = tool
        .invokable_run(Some(&state), r#"{"query":"current"}"#)
        .await
        .unwrap();
    assert_eq!(out, "done");

    let received = captured.lock().clone();
    assert_eq!(received.len(), 4);
    assert_eq!(received[0].content, "prev");
    assert_eq!(
        received[1].content,
        "For context: [react-agent] said: resp."
    );
    assert_eq!(
        received[2].content,
        "For context: [react-agent] called tool: `transfer_to_agent` with arguments: test-agent."
    );
    assert_eq!(
        received[3].content,
        "For context: [react-agent] `transfer_to_agent` tool returned result: successfully transferred to agent [test-agent]."
    );
    assert!(received.iter().all(|m| m.role == Message::USER));
}

#[test]
fn react_history_rewrites_tool_calls_and_results() {
    let state = AgentState {
        agent_name: "MyAgent".to_string(),
        messages: vec![
            Message::user("user query"),
            assistant_with_call("tool call id 1", "tool1", "arguments1"),
            Message::tool("tool result 1", "tool call id 1", "tool1"),
            assistant_with_call("tool call id 2", "tool2", "arguments2"),
        ],
    };
    let history = react_chat_history(&state, "DestAgentName");
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "user query",
            "For context: [MyAgent] called tool: `tool1` with arguments: arguments1.",
            "For context: [MyAgent] `tool1` tool returned result: tool result 1.",
            "For context: [MyAgent] called tool: `transfer_to_agent` with arguments: DestAgentName.",
            "For context: [MyAgent] `transfer_to_agent` tool returned result: successfully transferred to agent [DestAgentName].",
        ]
    );
}

#[test]
fn react_history_keeps_a_trailing_plain_assistant_message() {
    let state = AgentState {
        agent_name: "MyAgent".to_string(),
        messages: vec![
            Message::user("user query"),
            assistant_with_call("tool call id 1", "tool1", "arguments1"),
            Message::tool("tool result 1", "tool call id 1", "tool1"),
            Message::assistant("final answer"),
        ],
    };
    let history = react_chat_history(&state, "DestAgentName");
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "user query",
            "For context: [MyAgent] called tool: `tool1` with arguments: arguments1.",
            "For context: [MyAgent] `tool1` tool returned result: tool result 1.",
            "For context: [MyAgent] said: final answer.",
            "For context: [MyAgent] called tool: `transfer_to_agent` with arguments: DestAgentName.",
            "For context: [MyAgent] `transfer_to_agent` tool returned result: successfully transferred to agent [DestAgentName].",
        ]
    );
}

#[tokio::test]
async fn custom_input_schema_passes_arguments_through() {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let agent = CapturingAgent::new(
        "schema-agent",
        "agent with custom schema",
        captured.clone(),
        vec![AgentEvent::from_message(
            "schema-agent",
            Message::assistant("schema processed"),
        )],
    );
    let schema = json!({
        "type": "object",
        "properties": {
            "custom_arg": {"type": "string", "description": "a custom argument"}
        },
        "required": ["custom_arg"]
    });
    let tool = AgentTool::new(agent).with_input_schema(schema.clone());
    assert_eq!(tool.info().params_schema, schema);

    let out = tool
        .invokable_run(None, r#"{"custom_arg":"hello world"}"#)
        .await
        .unwrap();
    assert_eq!(out, "schema processed");

    let received = captured.lock().clone();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].content, r#"{"custom_arg":"hello world"}"#);
}
