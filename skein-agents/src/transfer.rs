//! Deterministic transfer: post-run hand-off to a fixed list of agents.
//!
//! The wrapper forwards every event of its inner agent; iff the terminal
//! event carried neither `exit` nor a user-visible interruption, it appends
//! a synthesized assistant tool-call plus tool-result pair per destination,
//! in declared order.
//!
//! Wrapping a [`FlowAgent`] changes the mechanics: the flow runs inside an
//! isolated session whose events mirror back to the parent (marked for
//! automatic close), and an internal interrupt raised by the flow is lifted
//! into a composite interrupt that captures the isolated event list. On
//! resume, that list is re-injected into a fresh isolated session before
//! the flow re-enters.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use skein::registry;

use crate::agent::{Agent, AgentInput, ResumableAgent, ResumeInfo};
use crate::event::{composite_interrupt, AgentAction, AgentEvent};
use crate::flow::FlowAgent;
use crate::iterator::{async_iterator_pair, spawn_event_producer, AsyncGenerator, AsyncIterator};
use crate::message::Message;
use crate::session::{RunContext, Session};

const TRANSFER_STATE_NAME: &str = "skein_agents.deterministic_transfer_state";

/// Saved wrapper state: the isolated session's event list at interruption.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeterministicTransferState {
    pub event_list: Vec<AgentEvent>,
}

fn register_transfer_state() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| registry::register_name::<DeterministicTransferState>(TRANSFER_STATE_NAME));
}

/// Configuration for [`agent_with_deterministic_transfer`].
pub struct DeterministicTransferConfig {
    pub agent: Arc<dyn Agent>,
    pub to_agent_names: Vec<String>,
}

enum TransferTarget {
    Plain(Arc<dyn Agent>),
    Resumable(Arc<dyn ResumableAgent>),
    Flow(Arc<FlowAgent>),
}

/// Wraps an agent to transfer to the given agents deterministically.
pub struct AgentWithDeterministicTransfer {
    inner: TransferTarget,
    to_agent_names: Vec<String>,
}

/// Wrap a plain agent.
#[must_use]
pub fn agent_with_deterministic_transfer(
    config: DeterministicTransferConfig,
) -> AgentWithDeterministicTransfer {
    register_transfer_state();
    AgentWithDeterministicTransfer {
        inner: TransferTarget::Plain(config.agent),
        to_agent_names: config.to_agent_names,
    }
}

impl AgentWithDeterministicTransfer {
    /// Wrap a resumable agent; `resume` re-enters it directly.
    #[must_use]
    pub fn for_resumable(agent: Arc<dyn ResumableAgent>, to_agent_names: Vec<String>) -> Self {
        register_transfer_state();
        Self {
            inner: TransferTarget::Resumable(agent),
            to_agent_names,
        }
    }

    /// Wrap a flow agent; it runs inside an isolated session and interrupts
    /// compose through the wrapper.
    #[must_use]
    pub fn for_flow(flow: Arc<FlowAgent>, to_agent_names: Vec<String>) -> Self {
        register_transfer_state();
        Self {
            inner: TransferTarget::Flow(flow),
            to_agent_names,
        }
    }

    fn inner_agent(&self) -> &dyn Agent {
        match &self.inner {
            TransferTarget::Plain(agent) => agent.as_ref(),
            TransferTarget::Resumable(agent) => agent.as_ref() as &dyn Agent,
            TransferTarget::Flow(flow) => flow.as_ref(),
        }
    }
}

#[async_trait]
impl Agent for AgentWithDeterministicTransfer {
    fn name(&self) -> &str {
        self.inner_agent().name()
    }

    fn description(&self) -> &str {
        self.inner_agent().description()
    }

    async fn run(&self, ctx: RunContext, input: AgentInput) -> AsyncIterator<AgentEvent> {
        match &self.inner {
            TransferTarget::Flow(flow) => {
                let isolated_ctx = ctx.with_isolated_session();
                let inner = flow.run(isolated_ctx.clone(), input).await;
                self.spawn_flow_forwarder(inner, isolated_ctx.session, ctx.session)
            }
            _ => {
                let inner = self.inner_agent().run(ctx, input).await;
                self.spawn_plain_forwarder(inner)
            }
        }
    }
}

#[async_trait]
impl ResumableAgent for AgentWithDeterministicTransfer {
    async fn resume(&self, ctx: RunContext, info: ResumeInfo) -> AsyncIterator<AgentEvent> {
        match &self.inner {
            TransferTarget::Flow(flow) => {
                let state = info
                    .interrupt
                    .state
                    .as_ref()
                    .filter(|typed| typed.type_name == TRANSFER_STATE_NAME)
                    .and_then(|typed| {
                        serde_json::from_value::<DeterministicTransferState>(typed.payload.clone())
                            .ok()
                    });
                let (Some(state), Some(inner_interrupt)) = (state, info.interrupt.inner.clone())
                else {
                    return error_iter(
                        self.name(),
                        "invalid interrupt state for flow agent resume in deterministic transfer",
                    );
                };
                let isolated_ctx = ctx.with_isolated_session_events(state.event_list);
                let leaf_info = ResumeInfo {
                    interrupt: *inner_interrupt,
                    data: info.data,
                };
                let inner = flow.resume(isolated_ctx.clone(), leaf_info).await;
                self.spawn_flow_forwarder(inner, isolated_ctx.session, ctx.session)
            }
            TransferTarget::Resumable(agent) => {
                let inner = agent.resume(ctx, info).await;
                self.spawn_plain_forwarder(inner)
            }
            TransferTarget::Plain(_) => {
                error_iter(self.name(), "wrapped agent does not support resume")
            }
        }
    }
}

impl AgentWithDeterministicTransfer {
    fn spawn_plain_forwarder(&self, inner: AsyncIterator<AgentEvent>) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        let producer = generator.clone();
        let names = self.to_agent_names.clone();
        let agent_name = self.name().to_string();
        spawn_event_producer(agent_name.clone(), generator, async move {
            forward_events_and_append_transfer(inner, producer, agent_name, names).await;
        });
        iter
    }

    fn spawn_flow_forwarder(
        &self,
        inner: AsyncIterator<AgentEvent>,
        isolated: Arc<Session>,
        parent: Arc<Session>,
    ) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        let producer = generator.clone();
        let names = self.to_agent_names.clone();
        let agent_name = self.name().to_string();
        spawn_event_producer(agent_name.clone(), generator, async move {
            handle_flow_agent_events(inner, producer, isolated, parent, agent_name, names).await;
        });
        iter
    }
}

async fn forward_events_and_append_transfer(
    inner: AsyncIterator<AgentEvent>,
    generator: AsyncGenerator<AgentEvent>,
    agent_name: String,
    to_agent_names: Vec<String>,
) {
    let mut last: Option<AgentEvent> = None;
    while let Some(event) = inner.next().await {
        last = Some(event.clone());
        if !generator.send(event).await {
            return;
        }
    }

    if let Some(last) = &last {
        if let Some(action) = &last.action {
            if action.exit || action.interrupted.is_some() {
                return;
            }
        }
    }

    send_transfer_events(&generator, &agent_name, &to_agent_names).await;
}

async fn handle_flow_agent_events(
    inner: AsyncIterator<AgentEvent>,
    generator: AsyncGenerator<AgentEvent>,
    isolated: Arc<Session>,
    parent: Arc<Session>,
    agent_name: String,
    to_agent_names: Vec<String>,
) {
    let mut last: Option<AgentEvent> = None;
    while let Some(event) = inner.next().await {
        if event.interrupted().is_none() {
            let copied = event.clone();
            copied.set_automatic_close();
            event.set_automatic_close();
            parent.add_event(copied);
        }

        if event.internal_interrupt().is_some() {
            last = Some(event);
            continue;
        }

        last = Some(event.clone());
        if !generator.send(event).await {
            return;
        }
    }

    if let Some(last) = &last {
        if let Some(internal) = last.internal_interrupt() {
            let state = DeterministicTransferState {
                event_list: isolated.events(),
            };
            let Some(typed) = registry::encode(&state) else {
                let _ = generator
                    .send(AgentEvent::error(
                        &agent_name,
                        "failed to encode deterministic transfer state",
                    ))
                    .await;
                return;
            };
            let composite = composite_interrupt(
                &agent_name,
                "deterministic transfer wrapper interrupted",
                typed,
                internal.clone(),
            );
            let _ = generator.send(composite).await;
            return;
        }
        if last.action.as_ref().is_some_and(|a| a.exit) {
            return;
        }
    }

    send_transfer_events(&generator, &agent_name, &to_agent_names).await;
}

/// The synthesized `(assistant tool-call, tool result)` pair for one
/// destination.
#[must_use]
pub fn gen_transfer_messages(dest_agent_name: &str) -> (Message, Message) {
    let assistant = Message::assistant_tool_call("transfer_to_agent", dest_agent_name);
    let tool = Message::tool(
        &format!("successfully transferred to agent [{dest_agent_name}]"),
        "",
        "transfer_to_agent",
    );
    (assistant, tool)
}

async fn send_transfer_events(
    generator: &AsyncGenerator<AgentEvent>,
    agent_name: &str,
    to_agent_names: &[String],
) {
    for dest in to_agent_names {
        let (assistant_msg, tool_msg) = gen_transfer_messages(dest);

        let assistant_event = AgentEvent::from_message(agent_name, assistant_msg);
        if !generator.send(assistant_event).await {
            return;
        }

        let mut tool_event = AgentEvent::from_message(agent_name, tool_msg);
        tool_event.action = Some(AgentAction::transfer(dest.clone()));
        if !generator.send(tool_event).await {
            return;
        }
    }
}

fn error_iter(agent_name: &str, message: &str) -> AsyncIterator<AgentEvent> {
    let (iter, generator) = async_iterator_pair();
    let event = AgentEvent::error(agent_name, message);
    tokio::spawn(async move {
        let _ = generator.send(event).await;
        generator.close();
    });
    iter
}
