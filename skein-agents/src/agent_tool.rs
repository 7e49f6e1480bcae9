//! Expose an agent as a tool another agent can call.
//!
//! The tool's default schema accepts `{"request": "..."}`; with a custom
//! input schema the raw JSON arguments pass straight through to the inner
//! agent. With [`with_full_chat_history`](AgentTool::with_full_chat_history)
//! the inner agent instead receives the calling agent's chat history
//! rewritten as third-person context messages, followed by the synthesized
//! `transfer_to_agent` call/result pair.

use std::sync::Arc;

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::{json, Value};
use thiserror::Error;

use crate::agent::{Agent, AgentInput};
use crate::message::Message;
use crate::session::{RunContext, Session};
use crate::transfer::gen_transfer_messages;

/// Description of a tool as presented to a model.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub params_schema: Value,
}

/// Errors surfaced by tool invocation.
#[derive(Debug, Error, Diagnostic)]
pub enum ToolError {
    #[error("invalid tool arguments: {0}")]
    #[diagnostic(code(skein_agents::tool::invalid_arguments))]
    InvalidArguments(String),

    #[error("agent produced no events")]
    #[diagnostic(code(skein_agents::tool::no_events))]
    NoEvents,

    #[error("agent failed: {0}")]
    #[diagnostic(code(skein_agents::tool::agent_failed))]
    AgentFailed(String),
}

/// The calling agent's state, as visible to an agent-tool invocation.
#[derive(Clone, Debug, Default)]
pub struct AgentState {
    pub agent_name: String,
    pub messages: Vec<Message>,
}

/// An invokable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    fn info(&self) -> ToolInfo;

    /// Run with JSON-encoded arguments; `state` is the calling agent's
    /// current state, when it runs inside one.
    async fn invokable_run(
        &self,
        state: Option<&AgentState>,
        arguments: &str,
    ) -> Result<String, ToolError>;
}

/// Wraps an inner [`Agent`] as a [`Tool`].
pub struct AgentTool {
    agent: Arc<dyn Agent>,
    full_chat_history: bool,
    input_schema: Option<Value>,
}

impl AgentTool {
    #[must_use]
    pub fn new(agent: Arc<dyn Agent>) -> Self {
        Self {
            agent,
            full_chat_history: false,
            input_schema: None,
        }
    }

    /// Feed the calling agent's full chat history (rewritten as context
    /// messages) to the inner agent instead of just the request string.
    #[must_use]
    pub fn with_full_chat_history(mut self) -> Self {
        self.full_chat_history = true;
        self
    }

    /// Replace the default `{"request": string}` schema; arguments are then
    /// passed through verbatim as the inner agent's input.
    #[must_use]
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    fn request_messages(
        &self,
        state: Option<&AgentState>,
        arguments: &str,
    ) -> Result<Vec<Message>, ToolError> {
        if let Some(state) = state {
            if self.full_chat_history {
                return Ok(react_chat_history(state, self.agent.name()));
            }
        }
        if self.input_schema.is_some() {
            return Ok(vec![Message::user(arguments)]);
        }
        let parsed: Value = serde_json::from_str(arguments)
            .map_err(|err| ToolError::InvalidArguments(err.to_string()))?;
        let request = parsed
            .get("request")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments("missing `request` field".to_string()))?;
        Ok(vec![Message::user(request)])
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn info(&self) -> ToolInfo {
        let params_schema = self.input_schema.clone().unwrap_or_else(|| {
            json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "string",
                        "description": "the request to send to the agent"
                    }
                },
                "required": ["request"]
            })
        });
        ToolInfo {
            name: self.agent.name().to_string(),
            description: self.agent.description().to_string(),
            params_schema,
        }
    }

    async fn invokable_run(
        &self,
        state: Option<&AgentState>,
        arguments: &str,
    ) -> Result<String, ToolError> {
        // Validate arguments even when the history path ignores them.
        if self.input_schema.is_none() {
            serde_json::from_str::<Value>(arguments)
                .map_err(|err| ToolError::InvalidArguments(err.to_string()))?;
        }
        let messages = self.request_messages(state, arguments)?;
        let input = AgentInput::from_messages(messages);
        let ctx = RunContext::new(Session::new(), input.clone()).descend(self.agent.name());

        let iter = self.agent.run(ctx, input).await;
        let mut final_message: Option<Message> = None;
        let mut seen_any = false;
        while let Some(event) = iter.next().await {
            seen_any = true;
            if let Some(err) = event.err {
                return Err(ToolError::AgentFailed(err));
            }
            if let Some(output) = &event.output {
                if let Some(message) = output.message_output.materialize().await {
                    final_message = Some(message);
                }
            }
        }
        if !seen_any {
            return Err(ToolError::NoEvents);
        }
        final_message
            .map(|message| message.content)
            .ok_or(ToolError::NoEvents)
    }
}

/// Rewrite a calling agent's chat history for hand-off to `dest_agent`.
///
/// User messages pass through; everything the calling agent said or did
/// becomes third-person context lines; a trailing assistant message is
/// dropped only when it carries an unresolved tool call (the in-flight
/// invocation this hand-off replaces), while a completed utterance is kept
/// and rewritten like any other; the synthesized transfer call/result pair
/// closes the sequence.
#[must_use]
pub fn react_chat_history(state: &AgentState, dest_agent: &str) -> Vec<Message> {
    let name = &state.agent_name;
    let mut messages = state.messages.clone();
    if messages
        .last()
        .is_some_and(|m| m.role == Message::ASSISTANT && m.has_tool_calls())
    {
        messages.pop();
    }

    let mut history = Vec::with_capacity(messages.len() + 2);
    for message in &messages {
        match message.role.as_str() {
            Message::USER => history.push(message.clone()),
            Message::ASSISTANT => {
                if message.has_tool_calls() {
                    for call in &message.tool_calls {
                        history.push(Message::user(&format!(
                            "For context: [{name}] called tool: `{}` with arguments: {}.",
                            call.name, call.arguments
                        )));
                    }
                } else if !message.content.is_empty() {
                    history.push(Message::user(&format!(
                        "For context: [{name}] said: {}.",
                        message.content
                    )));
                }
            }
            Message::TOOL => {
                let tool_name = message.tool_name.as_deref().unwrap_or_default();
                history.push(Message::user(&format!(
                    "For context: [{name}] `{tool_name}` tool returned result: {}.",
                    message.content
                )));
            }
            _ => history.push(message.clone()),
        }
    }

    let (transfer_call, transfer_result) = gen_transfer_messages(dest_agent);
    let call = &transfer_call.tool_calls[0];
    history.push(Message::user(&format!(
        "For context: [{name}] called tool: `{}` with arguments: {}.",
        call.name, call.arguments
    )));
    history.push(Message::user(&format!(
        "For context: [{name}] `{}` tool returned result: {}.",
        transfer_result.tool_name.as_deref().unwrap_or_default(),
        transfer_result.content
    )));
    history
}
