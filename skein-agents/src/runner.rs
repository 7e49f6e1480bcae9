//! The run entry point: session creation, event collection, error mapping.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::agent::{Agent, AgentInput, ResumableAgent, ResumeInfo};
use crate::event::{AgentAction, AgentEvent};
use crate::iterator::{async_iterator_pair, spawn_event_producer, AsyncIterator};
use crate::message::Message;
use crate::session::{RunContext, Session};

/// Configuration for a [`Runner`].
pub struct RunnerConfig {
    pub agent: Arc<dyn Agent>,
}

/// Options for one run.
#[derive(Default)]
pub struct RunOptions {
    session_values: FxHashMap<String, Value>,
    tool_options: FxHashMap<String, Value>,
}

impl RunOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the root session's shared values.
    #[must_use]
    pub fn with_session_values(mut self, values: FxHashMap<String, Value>) -> Self {
        self.session_values.extend(values);
        self
    }

    /// Attach options addressed to tools invoked during the run.
    #[must_use]
    pub fn with_tool_options(mut self, options: FxHashMap<String, Value>) -> Self {
        self.tool_options.extend(options);
        self
    }
}

/// Wraps an agent with session management and event collection.
pub struct Runner {
    agent: Arc<dyn Agent>,
}

impl Runner {
    #[must_use]
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            agent: config.agent,
        }
    }

    /// Start a run from the given messages.
    ///
    /// Creates the root session, forwards the agent's events (recording each
    /// in the session), and lifts any internal interruption that reaches
    /// this boundary into a user-visible one; user iterators never observe
    /// internal interrupts.
    pub async fn run(&self, messages: Vec<Message>, options: RunOptions) -> AsyncIterator<AgentEvent> {
        tracing::debug!(agent = %self.agent.name(), messages = messages.len(), "starting agent run");
        let session = Session::new();
        session.set_values(options.session_values);
        let input = AgentInput::from_messages(messages);
        let ctx = RunContext::new(session.clone(), input.clone())
            .with_tool_options(options.tool_options)
            .descend(self.agent.name());

        let inner = self.agent.run(ctx, input).await;
        self.forward(inner, session)
    }

    /// Re-enter an interrupted run of a resumable agent.
    pub async fn resume(
        &self,
        agent: Arc<dyn ResumableAgent>,
        info: ResumeInfo,
        options: RunOptions,
    ) -> AsyncIterator<AgentEvent> {
        tracing::debug!(agent = %agent.name(), "resuming agent run");
        let session = Session::new();
        session.set_values(options.session_values);
        let ctx = RunContext::new(session.clone(), AgentInput::default())
            .with_tool_options(options.tool_options)
            .descend(agent.name());

        let inner = agent.resume(ctx, info).await;
        self.forward(inner, session)
    }

    fn forward(
        &self,
        inner: AsyncIterator<AgentEvent>,
        session: Arc<Session>,
    ) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        let producer = generator.clone();
        spawn_event_producer(self.agent.name().to_string(), generator, async move {
            while let Some(event) = inner.next().await {
                let event = match event.action.as_ref().and_then(|a| a.internal_interrupted.clone())
                {
                    Some(internal) => {
                        AgentEvent::from_action(&event.agent_name, AgentAction::interrupted(internal))
                    }
                    None => event,
                };
                session.add_event(event.clone());
                if !producer.send(event).await {
                    break;
                }
            }
        });
        iter
    }
}
