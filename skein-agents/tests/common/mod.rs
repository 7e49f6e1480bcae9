#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use skein_agents::agent::{Agent, AgentInput, ResumableAgent, ResumeInfo};
use skein_agents::event::{AgentAction, AgentEvent, AgentInterrupt};
use skein_agents::iterator::{async_iterator_pair, spawn_event_producer, AsyncIterator};
use skein_agents::message::Message;
use skein_agents::session::RunContext;

/// Route test-run tracing through the env-filtered subscriber once.
pub fn init_tracing() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Replays a fixed list of events, stopping after an exit action.
pub struct ScriptedAgent {
    name: String,
    description: String,
    responses: Vec<AgentEvent>,
}

impl ScriptedAgent {
    pub fn new(name: &str, description: &str, responses: Vec<AgentEvent>) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            description: description.to_string(),
            responses,
        })
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, _ctx: RunContext, _input: AgentInput) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        let responses = self.responses.clone();
        let producer = generator.clone();
        spawn_event_producer(self.name.clone(), generator, async move {
            for event in responses {
                let exit = event.action.as_ref().is_some_and(|a| a.exit);
                if !producer.send(event).await {
                    break;
                }
                if exit {
                    break;
                }
            }
        });
        iter
    }
}

/// Replays fixed events and records the input it received.
pub struct CapturingAgent {
    name: String,
    description: String,
    pub captured: Arc<Mutex<Vec<Message>>>,
    responses: Vec<AgentEvent>,
}

impl CapturingAgent {
    pub fn new(
        name: &str,
        description: &str,
        captured: Arc<Mutex<Vec<Message>>>,
        responses: Vec<AgentEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            description: description.to_string(),
            captured,
            responses,
        })
    }
}

#[async_trait]
impl Agent for CapturingAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn run(&self, _ctx: RunContext, input: AgentInput) -> AsyncIterator<AgentEvent> {
        *self.captured.lock() = input.messages;
        let (iter, generator) = async_iterator_pair();
        let responses = self.responses.clone();
        let producer = generator.clone();
        spawn_event_producer(self.name.clone(), generator, async move {
            for event in responses {
                if !producer.send(event).await {
                    break;
                }
            }
        });
        iter
    }
}

/// Interrupts on first run, completes on resume.
pub struct PausingAgent;

#[async_trait]
impl Agent for PausingAgent {
    fn name(&self) -> &str {
        "pauser"
    }

    fn description(&self) -> &str {
        "pauses for human input"
    }

    async fn run(&self, _ctx: RunContext, _input: AgentInput) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        spawn_event_producer("pauser".to_string(), generator.clone(), async move {
            let event = AgentEvent::from_action(
                "pauser",
                AgentAction::interrupted(AgentInterrupt::new("needs human input")),
            );
            let _ = generator.send(event).await;
        });
        iter
    }
}

#[async_trait]
impl ResumableAgent for PausingAgent {
    async fn resume(&self, _ctx: RunContext, _info: ResumeInfo) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        spawn_event_producer("pauser".to_string(), generator.clone(), async move {
            let event = AgentEvent::from_message("pauser", Message::assistant("resumed"));
            let _ = generator.send(event).await;
        });
        iter
    }
}

/// Message content of an event, if it carries a complete message.
pub fn content_of(event: &AgentEvent) -> Option<String> {
    event
        .output
        .as_ref()
        .and_then(|o| o.message_output.message.as_ref())
        .map(|m| m.content.clone())
}
