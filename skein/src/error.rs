//! Error taxonomy for graph compilation and execution.

use miette::Diagnostic;
use thiserror::Error;

use crate::checkpoint::CheckpointError;
use crate::interrupt::InterruptInfo;
use crate::stream::StreamError;

/// Structural problems detected when compiling a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum ValidationError {
    #[error("duplicate node id: {0}")]
    #[diagnostic(code(skein::graph::duplicate_node))]
    DuplicateNode(String),

    #[error("`start` and `end` are virtual endpoints and cannot be registered as nodes")]
    #[diagnostic(
        code(skein::graph::reserved_node_id),
        help("Pick a different node name; edges may still reference start/end.")
    )]
    ReservedNodeId,

    #[error("edge references unknown node: {0}")]
    #[diagnostic(code(skein::graph::unknown_edge_endpoint))]
    UnknownEdgeEndpoint(String),

    #[error("invalid edge: {0}")]
    #[diagnostic(
        code(skein::graph::invalid_edge),
        help("Edges cannot terminate at start or originate at end.")
    )]
    InvalidEdge(String),

    #[error("no entry edge from start")]
    #[diagnostic(
        code(skein::graph::missing_entry),
        help("Add an edge (or branch) from NodeId::Start to define the entry point.")
    )]
    MissingEntry,

    #[error("node `{0}` is not reachable from start")]
    #[diagnostic(code(skein::graph::unreachable_node))]
    UnreachableNode(String),

    #[error("node `{0}` cannot reach end")]
    #[diagnostic(
        code(skein::graph::dead_end),
        help("Every node must lie on a path to NodeId::End.")
    )]
    DeadEnd(String),

    #[error("branch from `{branch_source}` targets unknown destination `{destination}`")]
    #[diagnostic(code(skein::graph::unknown_branch_destination))]
    UnknownBranchDestination {
        branch_source: String,
        destination: String,
    },

    #[error("node `{node}` joins multiple predecessors but `{predecessor}` declares no output key")]
    #[diagnostic(
        code(skein::graph::missing_output_key),
        help("Give each predecessor a distinct output key so the join can merge by key.")
    )]
    MissingOutputKey { node: String, predecessor: String },

    #[error("predecessors of `{node}` collide on output key `{key}`")]
    #[diagnostic(code(skein::graph::output_key_collision))]
    OutputKeyCollision { node: String, key: String },

    #[error("checkpointing requested but no checkpoint store was configured")]
    #[diagnostic(
        code(skein::graph::missing_store),
        help("Compile the graph with CompileOptions::with_checkpoint_store.")
    )]
    MissingStore,
}

/// Errors produced while running a compiled graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    /// Compile-time validation failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Validation(#[from] ValidationError),

    /// A node task failed.
    #[error("node `{node}` failed: {message}")]
    #[diagnostic(code(skein::run::node_failed))]
    NodeRun { node: String, message: String },

    /// Cooperative interrupt; the run can be resumed from its checkpoint.
    ///
    /// Recover the payload with
    /// [`extract_interrupt_info`](crate::interrupt::extract_interrupt_info).
    #[error("run interrupted")]
    #[diagnostic(
        code(skein::run::interrupted),
        help("Persisted state can be resumed via a checkpoint id and resume data.")
    )]
    Interrupt(Box<InterruptInfo>),

    /// The ambient cancellation signal fired.
    #[error("run cancelled")]
    #[diagnostic(code(skein::run::cancelled))]
    Cancelled,

    /// A node task panicked; the payload is the panic text.
    #[error("node task panicked: {0}")]
    #[diagnostic(code(skein::run::panic))]
    Panic(String),

    /// Checkpoint load/save failure.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Checkpoint(#[from] CheckpointError),

    /// A stream terminated with an error while the engine consumed it.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Stream(#[from] StreamError),

    /// Value (de)serialization at a node boundary failed.
    #[error("serialization failed: {source}")]
    #[diagnostic(code(skein::run::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

impl GraphError {
    /// Shorthand for a node failure with a formatted message.
    #[must_use]
    pub fn node_failed(node: impl Into<String>, message: impl Into<String>) -> Self {
        GraphError::NodeRun {
            node: node.into(),
            message: message.into(),
        }
    }

    /// Returns `true` for the cooperative interrupt variant.
    #[must_use]
    pub fn is_interrupt(&self) -> bool {
        matches!(self, GraphError::Interrupt(_))
    }
}
