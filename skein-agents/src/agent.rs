//! Agent contracts.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::event::{AgentEvent, AgentInterrupt};
use crate::iterator::AsyncIterator;
use crate::message::Message;
use crate::session::RunContext;

/// Input handed to an agent run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AgentInput {
    pub messages: Vec<Message>,
}

impl AgentInput {
    #[must_use]
    pub fn from_messages(messages: Vec<Message>) -> Self {
        Self { messages }
    }
}

/// Saved interruption handed back to a resumable agent.
#[derive(Clone, Debug)]
pub struct ResumeInfo {
    /// The interrupt being resumed; its `state` restores the agent's own
    /// layer, its `inner` belongs to whatever it wrapped.
    pub interrupt: AgentInterrupt,
    /// Optional payload supplied by the caller at resume time.
    pub data: Option<serde_json::Value>,
}

/// An asynchronous, event-producing agent.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Start a run; events arrive on the returned iterator. The iterator
    /// ends after a terminal event (exit, interruption, error) or natural
    /// completion. Consumers must keep draining even after a termination
    /// signal, because a composite interrupt may still follow internal
    /// events.
    async fn run(&self, ctx: RunContext, input: AgentInput) -> AsyncIterator<AgentEvent>;
}

/// An agent whose interrupted runs can be re-entered.
#[async_trait]
pub trait ResumableAgent: Agent {
    async fn resume(&self, ctx: RunContext, info: ResumeInfo) -> AsyncIterator<AgentEvent>;
}
