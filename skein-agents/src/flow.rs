//! Sequential multi-agent flow driven by transfer actions.
//!
//! A [`FlowAgent`] runs its root agent and follows every
//! `transfer_to_agent` action to the named sub-agent, forwarding events and
//! recording them in the session as it goes. When a sub-agent pauses with a
//! user-visible interrupt, the flow wraps it into an *internal* interrupt
//! tagged with its own position state, so an enclosing wrapper (or the
//! runner boundary) can lift it into a user-visible interrupt and later
//! route the resume back to the right sub-agent.

use std::sync::Arc;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use skein::registry;

use crate::agent::{Agent, AgentInput, ResumableAgent, ResumeInfo};
use crate::event::{AgentAction, AgentEvent, AgentInterrupt};
use crate::iterator::{async_iterator_pair, spawn_event_producer, AsyncGenerator, AsyncIterator};
use crate::session::RunContext;

const FLOW_STATE_NAME: &str = "skein_agents.flow_interrupt_state";

/// Position of a paused flow: which sub-agent was active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowInterruptState {
    pub active_agent: String,
}

fn register_flow_state() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| registry::register_name::<FlowInterruptState>(FLOW_STATE_NAME));
}

/// Drives a root agent plus named sub-agents through transfer hand-offs.
#[derive(Clone)]
pub struct FlowAgent {
    root: Arc<dyn Agent>,
    agents: FxHashMap<String, Arc<dyn Agent>>,
    resumable: FxHashMap<String, Arc<dyn ResumableAgent>>,
}

impl FlowAgent {
    #[must_use]
    pub fn new(root: Arc<dyn Agent>) -> Self {
        register_flow_state();
        Self {
            root,
            agents: FxHashMap::default(),
            resumable: FxHashMap::default(),
        }
    }

    /// Register a transfer destination.
    #[must_use]
    pub fn with_sub_agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.insert(agent.name().to_string(), agent);
        self
    }

    /// Register a transfer destination whose interrupted runs can resume.
    #[must_use]
    pub fn with_resumable_sub_agent(mut self, agent: Arc<dyn ResumableAgent>) -> Self {
        self.agents
            .insert(agent.name().to_string(), agent.clone() as Arc<dyn Agent>);
        self.resumable.insert(agent.name().to_string(), agent);
        self
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Agent>> {
        if name == self.root.name() {
            return Some(self.root.clone());
        }
        self.agents.get(name).cloned()
    }

    async fn drive(
        self,
        ctx: RunContext,
        input: AgentInput,
        resume: Option<(String, ResumeInfo)>,
        generator: AsyncGenerator<AgentEvent>,
    ) {
        let flow_name = self.root.name().to_string();
        let mut pending_resume = resume;
        let mut current: Arc<dyn Agent> = match &pending_resume {
            Some((agent_name, _)) => match self.lookup(agent_name) {
                Some(agent) => agent,
                None => {
                    let _ = generator
                        .send(AgentEvent::error(
                            &flow_name,
                            format!("cannot resume: unknown flow agent `{agent_name}`"),
                        ))
                        .await;
                    return;
                }
            },
            None => self.root.clone(),
        };

        loop {
            let sub_ctx = ctx.descend(current.name());
            let iter = match pending_resume.take() {
                Some((agent_name, info)) => {
                    match self.resumable.get(&agent_name) {
                        Some(agent) => agent.resume(sub_ctx, info).await,
                        None => {
                            let _ = generator
                                .send(AgentEvent::error(
                                    &flow_name,
                                    format!("flow agent `{agent_name}` is not resumable"),
                                ))
                                .await;
                            return;
                        }
                    }
                }
                None => current.run(sub_ctx, input.clone()).await,
            };

            let mut transfer: Option<String> = None;
            while let Some(event) = iter.next().await {
                if let Some(interrupt) = event.interrupted() {
                    // Wrap into an internal interrupt carrying the flow
                    // position, swallowing the sub-agent's own event.
                    let state = registry::encode(&FlowInterruptState {
                        active_agent: current.name().to_string(),
                    });
                    let internal = AgentInterrupt {
                        reason: format!("flow paused in `{}`", current.name()),
                        state,
                        inner: Some(Box::new(interrupt.clone())),
                    };
                    let lifted = AgentEvent::from_action(
                        &flow_name,
                        AgentAction::internal_interrupted(internal),
                    );
                    ctx.add_event(lifted.clone());
                    let _ = generator.send(lifted).await;
                    return;
                }

                ctx.add_event(event.clone());
                let mut exit = false;
                if let Some(action) = &event.action {
                    if let Some(target) = &action.transfer_to_agent {
                        transfer = Some(target.dest_agent_name.clone());
                    }
                    exit = action.exit;
                }
                let is_error = event.err.is_some();
                if !generator.send(event).await || exit || is_error {
                    return;
                }
            }

            match transfer {
                Some(target) => match self.agents.get(&target) {
                    Some(next) => current = next.clone(),
                    None => {
                        let _ = generator
                            .send(AgentEvent::error(
                                &flow_name,
                                format!("transfer to unknown agent `{target}`"),
                            ))
                            .await;
                        return;
                    }
                },
                None => return,
            }
        }
    }
}

#[async_trait]
impl Agent for FlowAgent {
    fn name(&self) -> &str {
        self.root.name()
    }

    fn description(&self) -> &str {
        self.root.description()
    }

    async fn run(&self, ctx: RunContext, input: AgentInput) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();
        let flow = self.clone();
        let producer = generator.clone();
        spawn_event_producer(self.name().to_string(), generator, async move {
            flow.drive(ctx, input, None, producer).await;
        });
        iter
    }
}

#[async_trait]
impl ResumableAgent for FlowAgent {
    async fn resume(&self, ctx: RunContext, info: ResumeInfo) -> AsyncIterator<AgentEvent> {
        let (iter, generator) = async_iterator_pair();

        let state = info
            .interrupt
            .state
            .as_ref()
            .filter(|typed| typed.type_name == FLOW_STATE_NAME)
            .and_then(|typed| {
                serde_json::from_value::<FlowInterruptState>(typed.payload.clone()).ok()
            });
        let Some(state) = state else {
            let name = self.name().to_string();
            let _ = generator
                .send(AgentEvent::error(
                    &name,
                    "invalid interrupt state for flow agent resume",
                ))
                .await;
            generator.close();
            return iter;
        };
        let Some(inner) = info.interrupt.inner.clone() else {
            let name = self.name().to_string();
            let _ = generator
                .send(AgentEvent::error(
                    &name,
                    "flow interrupt carries no inner interrupt to resume",
                ))
                .await;
            generator.close();
            return iter;
        };

        let leaf_info = ResumeInfo {
            interrupt: *inner,
            data: info.data,
        };
        let flow = self.clone();
        let producer = generator.clone();
        let input = AgentInput::from_messages(ctx.root_input.messages.clone());
        spawn_event_producer(self.name().to_string(), generator, async move {
            flow.drive(ctx, input, Some((state.active_agent, leaf_info)), producer)
                .await;
        });
        iter
    }
}
