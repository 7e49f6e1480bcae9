//! Lifecycle hooks fired around graph executions.
//!
//! A [`GraphCallbacks`] implementation observes every graph level in a run:
//! nested sub-graphs fire their own start/end/error pairs on each entry.
//! Hooks are invoked synchronously on the executing task and must not block
//! indefinitely.
//!
//! Error accounting follows the engine's observable contract: an
//! unsuccessful graph level (interrupt or failure) reports `on_error` both
//! from the level's own run and from the wrapper embedding it (the
//! sub-graph node, or the runnable facade at the root).

use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::GraphError;
use crate::stream::StreamReader;

/// The kind of component a callback fires for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Graph,
    Node,
    Tool,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::Graph => write!(f, "graph"),
            Component::Node => write!(f, "node"),
            Component::Tool => write!(f, "tool"),
        }
    }
}

/// Identity of the component a hook is firing for.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub name: String,
    pub component: Component,
}

impl RunInfo {
    #[must_use]
    pub fn graph(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            component: Component::Graph,
        }
    }
}

/// Before/after hooks for graph executions. All methods default to no-ops.
pub trait GraphCallbacks: Send + Sync {
    /// A component is about to run.
    fn on_start(&self, info: &RunInfo) {
        let _ = info;
    }

    /// A component completed successfully.
    fn on_end(&self, info: &RunInfo) {
        let _ = info;
    }

    /// A component ended unsuccessfully (failure or interrupt).
    fn on_error(&self, info: &RunInfo, error: &GraphError) {
        let _ = (info, error);
    }

    /// Streaming entry: the hook owns the stream and must close (drop) it if
    /// it does not consume it.
    fn on_start_with_stream_input(&self, info: &RunInfo, input: StreamReader<Value>) {
        let _ = info;
        drop(input);
    }

    /// Streaming exit: the hook owns the stream and must close (drop) it if
    /// it does not consume it.
    fn on_end_with_stream_output(&self, info: &RunInfo, output: StreamReader<Value>) {
        let _ = info;
        drop(output);
    }
}

/// Shared list of callback handlers.
pub type CallbackList = Vec<Arc<dyn GraphCallbacks>>;

pub(crate) fn fire_start(callbacks: &[Arc<dyn GraphCallbacks>], info: &RunInfo) {
    for cb in callbacks {
        cb.on_start(info);
    }
}

pub(crate) fn fire_end(callbacks: &[Arc<dyn GraphCallbacks>], info: &RunInfo) {
    for cb in callbacks {
        cb.on_end(info);
    }
}

pub(crate) fn fire_error(callbacks: &[Arc<dyn GraphCallbacks>], info: &RunInfo, error: &GraphError) {
    for cb in callbacks {
        cb.on_error(info, error);
    }
}
