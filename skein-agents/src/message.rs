//! Chat messages exchanged with agents.
//!
//! A message carries a role and text content, plus the tool-call fields
//! used by agent hand-off: an assistant message may request tool calls, and
//! a tool message carries the result of one.
//!
//! # Examples
//!
//! ```
//! use skein_agents::message::Message;
//!
//! let user = Message::user("What's the weather?");
//! assert_eq!(user.role, Message::USER);
//!
//! let call = Message::assistant_tool_call("get_weather", "{\"city\":\"Oslo\"}");
//! assert_eq!(call.tool_calls[0].name, "get_weather");
//! ```

use serde::{Deserialize, Serialize};

/// One tool invocation requested by an assistant message.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A message in a conversation.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Message {
    /// The role of the sender; use the constants on [`Message`].
    pub role: String,
    /// Text content.
    pub content: String,
    /// Tool calls requested by an assistant message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    /// For tool messages: the id of the call being answered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// For tool messages: the name of the tool that produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    /// User input message role.
    pub const USER: &'static str = "user";
    /// AI assistant response message role.
    pub const ASSISTANT: &'static str = "assistant";
    /// System prompt or instruction message role.
    pub const SYSTEM: &'static str = "system";
    /// Tool result message role.
    pub const TOOL: &'static str = "tool";

    /// Creates a new message with the specified role and content.
    #[must_use]
    pub fn new(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            ..Default::default()
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: &str) -> Self {
        Self::new(Self::USER, content)
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: &str) -> Self {
        Self::new(Self::ASSISTANT, content)
    }

    /// Creates a system message.
    #[must_use]
    pub fn system(content: &str) -> Self {
        Self::new(Self::SYSTEM, content)
    }

    /// Creates a tool-result message.
    #[must_use]
    pub fn tool(content: &str, tool_call_id: &str, tool_name: &str) -> Self {
        Self {
            role: Self::TOOL.to_string(),
            content: content.to_string(),
            tool_call_id: Some(tool_call_id.to_string()),
            tool_name: Some(tool_name.to_string()),
            ..Default::default()
        }
    }

    /// Creates an assistant message carrying a single tool call.
    #[must_use]
    pub fn assistant_tool_call(tool_name: &str, arguments: &str) -> Self {
        Self {
            role: Self::ASSISTANT.to_string(),
            tool_calls: vec![ToolCall {
                id: String::new(),
                name: tool_name.to_string(),
                arguments: arguments.to_string(),
            }],
            ..Default::default()
        }
    }

    /// Returns `true` for assistant messages that request tool calls.
    #[must_use]
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

impl From<&str> for Message {
    fn from(content: &str) -> Self {
        Message::user(content)
    }
}

impl From<(&str, &str)> for Message {
    fn from((role, content): (&str, &str)) -> Self {
        Message::new(role, content)
    }
}
