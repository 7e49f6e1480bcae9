//! ```text
//! Graph ─┬─► compile ─► Runnable ─► invoke / stream
//!        │                │
//!        │                ├─► Scheduler ─► Nodes ─► inboxes / branches
//!        │                │                │
//!        │                │                ├─► sub-graphs (nested Runnables)
//!        │                │                └─► GraphCallbacks
//!        │                │
//!        │                └─► CheckPointStore ─► InterruptInfo / InterruptCtx
//!        │
//!        └─► CompileOptions & NodeOptions wire behaviour end-to-end
//! ```
//!
//! Skein is a compute-graph execution engine for composable, resumable
//! pipelines: typed nodes wired into pregel-style or dag-style graphs, with
//! streaming fan-in/fan-out, cooperative interrupts, checkpoint persistence,
//! and hierarchical addressing of paused sub-graphs.

pub mod callback;
pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod interrupt;
pub mod registry;
pub mod runnable;
pub mod stream;
pub mod types;
pub mod value;

mod node;
mod scheduler;

pub use callback::{Component, GraphCallbacks, RunInfo};
pub use checkpoint::{CheckPointStore, CheckpointError, InMemoryStore};
pub use error::{GraphError, ValidationError};
pub use graph::{CallOptions, CompileOptions, Graph, NodeOptions};
pub use interrupt::{
    extract_interrupt_info, interrupt_and_rerun, Address, AddressSegment, InterruptCtx,
    InterruptInfo, SegmentKind,
};
pub use runnable::Runnable;
pub use stream::{stream_pipe, StreamError, StreamReader, StreamWriter};
pub use types::{NodeId, TriggerMode};
