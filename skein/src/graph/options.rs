//! Option builders for nodes, compilation, and individual calls.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;

use crate::callback::{CallbackList, GraphCallbacks};
use crate::checkpoint::CheckPointStore;
use crate::error::GraphError;
use crate::node::{erase_state_handler, StateHandler};
use crate::registry::{self, TypedValue};
use crate::types::TriggerMode;

/// Per-node configuration supplied when adding a node to a graph.
///
/// # Examples
///
/// ```rust
/// use skein::graph::NodeOptions;
///
/// let opts = NodeOptions::new().with_output_key("summary");
/// ```
#[derive(Default)]
pub struct NodeOptions {
    pub(crate) input_key: Option<String>,
    pub(crate) output_key: Option<String>,
    pub(crate) pre_handler: Option<StateHandler>,
    pub(crate) post_handler: Option<StateHandler>,
    pub(crate) graph_compile_options: Option<CompileOptions>,
}

impl NodeOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this node's output as `{key: output}` before delivery.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }

    /// Extract `input[key]` before invoking this node.
    #[must_use]
    pub fn with_input_key(mut self, key: impl Into<String>) -> Self {
        self.input_key = Some(key.into());
        self
    }

    /// Run `handler` on the node input with exclusive access to the graph's
    /// local state, before the node executes.
    #[must_use]
    pub fn with_state_pre_handler<V, S, F>(mut self, handler: F) -> Self
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        S: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(V, &mut S) -> Result<V, GraphError> + Send + Sync + 'static,
    {
        self.pre_handler = Some(erase_state_handler(handler));
        self
    }

    /// Run `handler` on the node output with exclusive access to the graph's
    /// local state, after the node executes.
    #[must_use]
    pub fn with_state_post_handler<V, S, F>(mut self, handler: F) -> Self
    where
        V: Serialize + DeserializeOwned + Send + 'static,
        S: Serialize + DeserializeOwned + Send + 'static,
        F: Fn(V, &mut S) -> Result<V, GraphError> + Send + Sync + 'static,
    {
        self.post_handler = Some(erase_state_handler(handler));
        self
    }

    /// Compile options applied to an embedded sub-graph node (notably its
    /// interrupt policy). Ignored on other node kinds.
    #[must_use]
    pub fn with_graph_compile_options(mut self, options: CompileOptions) -> Self {
        self.graph_compile_options = Some(options);
        self
    }
}

/// Options fixed at compile time for one graph.
#[derive(Default, Clone)]
pub struct CompileOptions {
    pub(crate) trigger_mode: TriggerMode,
    pub(crate) store: Option<Arc<dyn CheckPointStore>>,
    pub(crate) interrupt_before: Vec<String>,
    pub(crate) interrupt_after: Vec<String>,
    pub(crate) graph_name: Option<String>,
    pub(crate) callbacks: CallbackList,
}

impl CompileOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Select pregel (`AnyPredecessor`, the default) or dag
    /// (`AllPredecessor`) scheduling.
    #[must_use]
    pub fn with_node_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.trigger_mode = mode;
        self
    }

    /// Attach a checkpoint store; required for runs that pass a checkpoint
    /// id.
    #[must_use]
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckPointStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Interrupt before dispatching any of these nodes.
    #[must_use]
    pub fn with_interrupt_before_nodes<S: Into<String>>(
        mut self,
        nodes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.interrupt_before = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Interrupt after any of these nodes complete.
    #[must_use]
    pub fn with_interrupt_after_nodes<S: Into<String>>(
        mut self,
        nodes: impl IntoIterator<Item = S>,
    ) -> Self {
        self.interrupt_after = nodes.into_iter().map(Into::into).collect();
        self
    }

    /// Name the compiled graph; used in interrupt addresses and checkpoint
    /// validation.
    #[must_use]
    pub fn with_graph_name(mut self, name: impl Into<String>) -> Self {
        self.graph_name = Some(name.into());
        self
    }

    /// Attach callbacks fired on every run of this graph.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Arc<dyn GraphCallbacks>) -> Self {
        self.callbacks.push(callbacks);
        self
    }
}

/// Options for one invocation of a compiled runnable.
#[derive(Default, Clone)]
pub struct CallOptions {
    pub(crate) checkpoint_id: Option<String>,
    pub(crate) callbacks: CallbackList,
    pub(crate) session_values: FxHashMap<String, Value>,
    pub(crate) resume_data: FxHashMap<String, TypedValue>,
    pub(crate) cancel: Option<watch::Receiver<bool>>,
}

impl CallOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist/restore this run under the given checkpoint id.
    ///
    /// When a checkpoint already exists under the id, the run resumes from
    /// it; otherwise the run starts fresh and writes a checkpoint on
    /// interruption.
    #[must_use]
    pub fn with_checkpoint_id(mut self, id: impl Into<String>) -> Self {
        self.checkpoint_id = Some(id.into());
        self
    }

    /// Attach callbacks for this call only.
    #[must_use]
    pub fn with_callbacks(mut self, callbacks: Arc<dyn GraphCallbacks>) -> Self {
        self.callbacks.push(callbacks);
        self
    }

    /// Seed ambient session values visible to the embedding runtime.
    #[must_use]
    pub fn with_session_values(mut self, values: FxHashMap<String, Value>) -> Self {
        self.session_values.extend(values);
        self
    }

    /// The ambient session values attached to this call.
    #[must_use]
    pub fn session_values(&self) -> &FxHashMap<String, Value> {
        &self.session_values
    }

    /// Attach resume data for the interrupt context with the given id.
    ///
    /// The payload type is registered with the [type
    /// registry](crate::registry) so it can be validated against the saved
    /// checkpoint.
    #[must_use]
    pub fn with_resume_data<T>(mut self, interrupt_ctx_id: impl Into<String>, data: T) -> Self
    where
        T: Serialize + DeserializeOwned + 'static,
    {
        registry::register::<T>();
        if let Some(typed) = registry::encode(&data) {
            self.resume_data.insert(interrupt_ctx_id.into(), typed);
        }
        self
    }

    /// Observe a cancellation signal between supersteps.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
