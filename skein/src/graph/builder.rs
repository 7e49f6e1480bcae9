//! Declarative graph construction.
//!
//! [`Graph`] is a fluent builder for a typed compute graph: add nodes,
//! edges, and branches, then [`compile`](Graph::compile) into an immutable
//! [`Runnable`](crate::runnable::Runnable). The input/output types `I`/`O`
//! apply at the graph boundary; interior values are erased through serde at
//! each node.
//!
//! # Examples
//!
//! ```rust,no_run
//! use skein::graph::{CompileOptions, Graph};
//! use skein::error::GraphError;
//!
//! # async fn example() -> Result<(), GraphError> {
//! let runnable = Graph::<String, String>::new()
//!     .add_lambda_node("shout", |input: String| async move {
//!         Ok(input.to_uppercase())
//!     })
//!     .add_edge("start", "shout")
//!     .add_edge("shout", "end")
//!     .compile(CompileOptions::new().with_graph_name("shouter"))?;
//!
//! let out = runnable.invoke("hello".to_string(), Default::default()).await?;
//! assert_eq!(out, "HELLO");
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::GraphError;
use crate::node::{
    erase_branch_predicate, erase_lambda, erase_stream_lambda, BranchSpec, LambdaFn,
    StreamLambdaFn,
};
use crate::registry::{self, TypedValue};
use crate::scheduler::GraphCore;
use crate::stream::StreamReader;
use crate::types::NodeId;

use super::options::{CompileOptions, NodeOptions};

pub(crate) type StateFactory = Arc<dyn Fn() -> TypedValue + Send + Sync>;

pub(crate) type SubGraphBuilder =
    Box<dyn FnOnce(CompileOptions) -> Result<Arc<GraphCore>, GraphError> + Send>;

pub(crate) enum PendingExec {
    Lambda(LambdaFn),
    Stream(StreamLambdaFn),
    SubGraph(SubGraphBuilder),
}

pub(crate) struct PendingNode {
    pub id: String,
    pub exec: PendingExec,
    pub options: NodeOptions,
}

/// Builder for a typed compute graph. See the [module docs](self).
pub struct Graph<I, O> {
    pub(crate) nodes: Vec<PendingNode>,
    pub(crate) edges: Vec<(NodeId, NodeId)>,
    pub(crate) branches: Vec<BranchSpec>,
    pub(crate) state_factory: Option<StateFactory>,
    pub(crate) _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Default for Graph<I, O> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, O> Graph<I, O> {
    /// Create an empty graph with no local state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            edges: Vec::new(),
            branches: Vec::new(),
            state_factory: None,
            _marker: PhantomData,
        }
    }

    /// Declare a per-run local state produced by `factory`.
    ///
    /// The state lives for exactly one run and is only touched through node
    /// pre/post handlers, serialized behind the run's state lock. The state
    /// type is registered with the [type registry](crate::registry) so
    /// checkpoints can persist it.
    #[must_use]
    pub fn with_local_state<S, F>(mut self, factory: F) -> Self
    where
        S: Serialize + DeserializeOwned + Send + 'static,
        F: Fn() -> S + Send + Sync + 'static,
    {
        registry::register::<S>();
        self.state_factory = Some(Arc::new(move || {
            let state = factory();
            registry::encode(&state).unwrap_or_else(|| {
                TypedValue::new(std::any::type_name::<S>(), serde_json::Value::Null)
            })
        }));
        self
    }

    /// Add a unary node backed by an async function.
    #[must_use]
    pub fn add_lambda_node<A, B, F, Fut>(self, id: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        B: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, GraphError>> + Send + 'static,
    {
        self.add_lambda_node_with(id, f, NodeOptions::new())
    }

    /// Add a unary node with per-node options.
    #[must_use]
    pub fn add_lambda_node_with<A, B, F, Fut>(
        mut self,
        id: impl Into<String>,
        f: F,
        options: NodeOptions,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        B: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<B, GraphError>> + Send + 'static,
    {
        let id = id.into();
        let exec = PendingExec::Lambda(erase_lambda(&id, f));
        self.nodes.push(PendingNode { id, exec, options });
        self
    }

    /// Add a streaming node: the function returns a stream of output chunks.
    #[must_use]
    pub fn add_stream_node<A, B, F, Fut>(self, id: impl Into<String>, f: F) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        B: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamReader<B>, GraphError>> + Send + 'static,
    {
        self.add_stream_node_with(id, f, NodeOptions::new())
    }

    /// Add a streaming node with per-node options.
    #[must_use]
    pub fn add_stream_node_with<A, B, F, Fut>(
        mut self,
        id: impl Into<String>,
        f: F,
        options: NodeOptions,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        B: Serialize + Send + 'static,
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<StreamReader<B>, GraphError>> + Send + 'static,
    {
        let id = id.into();
        let exec = PendingExec::Stream(erase_stream_lambda(&id, f));
        self.nodes.push(PendingNode { id, exec, options });
        self
    }

    /// Embed another graph as a node.
    ///
    /// The sub-graph compiles together with its parent; pass
    /// [`NodeOptions::with_graph_compile_options`] to set its interrupt
    /// policy and name.
    #[must_use]
    pub fn add_graph_node<SI, SO>(self, id: impl Into<String>, sub: Graph<SI, SO>) -> Self
    where
        SI: Serialize + DeserializeOwned + Send + 'static,
        SO: Serialize + DeserializeOwned + Send + 'static,
    {
        self.add_graph_node_with(id, sub, NodeOptions::new())
    }

    /// Embed another graph as a node, with per-node options.
    #[must_use]
    pub fn add_graph_node_with<SI, SO>(
        mut self,
        id: impl Into<String>,
        sub: Graph<SI, SO>,
        options: NodeOptions,
    ) -> Self
    where
        SI: Serialize + DeserializeOwned + Send + 'static,
        SO: Serialize + DeserializeOwned + Send + 'static,
    {
        let id = id.into();
        let exec = PendingExec::SubGraph(Box::new(move |opts| sub.compile_core(opts)));
        self.nodes.push(PendingNode { id, exec, options });
        self
    }

    /// Embed an already-compiled [`Runnable`](crate::runnable::Runnable) as
    /// a node. It carries the interrupt policy it was compiled with.
    #[must_use]
    pub fn add_runnable_node<SI, SO>(
        mut self,
        id: impl Into<String>,
        runnable: crate::runnable::Runnable<SI, SO>,
        options: NodeOptions,
    ) -> Self {
        let id = id.into();
        let core = runnable.core();
        let exec = PendingExec::SubGraph(Box::new(move |_| Ok(core)));
        self.nodes.push(PendingNode { id, exec, options });
        self
    }

    /// Add a branch: at runtime `predicate` selects a subset of
    /// `destinations` based on the incoming value and the local state
    /// payload (`Value::Null` when the graph has no state).
    #[must_use]
    pub fn add_branch<A, F>(
        mut self,
        source: impl Into<NodeId>,
        predicate: F,
        destinations: Vec<&str>,
    ) -> Self
    where
        A: DeserializeOwned + Send + 'static,
        F: Fn(&A, &serde_json::Value) -> Vec<String> + Send + Sync + 'static,
    {
        let source = source.into().encode();
        let predicate = erase_branch_predicate(&source, predicate);
        self.branches.push(BranchSpec {
            source,
            predicate,
            destinations: destinations.into_iter().map(str::to_string).collect(),
        });
        self
    }

    /// Add a directed edge. `"start"` and `"end"` reference the virtual
    /// endpoints.
    #[must_use]
    pub fn add_edge(mut self, from: impl Into<NodeId>, to: impl Into<NodeId>) -> Self {
        self.edges.push((from.into(), to.into()));
        self
    }
}
