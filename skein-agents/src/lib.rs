//! ```text
//! Runner ─► Agent::run ─► AsyncIterator<AgentEvent>
//!   │          │
//!   │          ├─► FlowAgent ─► sub-agents (transfer_to_agent)
//!   │          ├─► AgentWithDeterministicTransfer ─► isolated Session
//!   │          └─► AgentTool (agent-as-tool)
//!   │
//!   └─► Session { Values (shared), Events (per run) }
//! ```
//!
//! Agent runtime built on the [`skein`] graph engine: an asynchronous
//! event-producing iterator model, multi-agent transfer, session state with
//! isolated sub-sessions, sub-agent-as-tool, and resumable multi-level
//! interrupts that compose into a single interrupt chain.

pub mod agent;
pub mod agent_tool;
pub mod event;
pub mod flow;
pub mod iterator;
pub mod message;
pub mod runner;
pub mod session;
pub mod transfer;

pub use agent::{Agent, AgentInput, ResumableAgent, ResumeInfo};
pub use agent_tool::{AgentState, AgentTool, Tool, ToolError, ToolInfo};
pub use event::{
    composite_interrupt, AgentAction, AgentEvent, AgentInterrupt, AgentOutput, MessageVariant,
    TransferToAgent,
};
pub use flow::{FlowAgent, FlowInterruptState};
pub use iterator::{async_iterator_pair, spawn_event_producer, AsyncGenerator, AsyncIterator};
pub use message::{Message, ToolCall};
pub use runner::{RunOptions, Runner, RunnerConfig};
pub use session::{RunContext, Session};
pub use transfer::{
    agent_with_deterministic_transfer, gen_transfer_messages, AgentWithDeterministicTransfer,
    DeterministicTransferConfig, DeterministicTransferState,
};
