//! Graph validation and compilation into a [`Runnable`].
//!
//! Compilation fixes the topology, selects the scheduling mode, compiles
//! embedded sub-graphs, and checks the structural invariants: unique node
//! ids, known edge endpoints, reachability from start, a path to end from
//! every node, known branch destinations, and (in dag mode) distinct output
//! keys across every join.

use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{GraphError, ValidationError};
use crate::node::{NodeExec, NodeSpec};
use crate::runnable::Runnable;
use crate::scheduler::GraphCore;
use crate::types::{NodeId, TriggerMode};

use super::builder::{Graph, PendingExec};
use super::options::CompileOptions;

impl<I, O> Graph<I, O>
where
    I: Serialize + DeserializeOwned + Send + 'static,
    O: Serialize + DeserializeOwned + Send + 'static,
{
    /// Validate and compile this graph into an immutable [`Runnable`].
    pub fn compile(self, options: CompileOptions) -> Result<Runnable<I, O>, GraphError> {
        let core = self.compile_core(options)?;
        Ok(Runnable::from_core(core))
    }
}

impl<I, O> Graph<I, O> {
    pub(crate) fn compile_core(self, options: CompileOptions) -> Result<Arc<GraphCore>, GraphError> {
        let Graph {
            nodes,
            edges,
            branches,
            state_factory,
            _marker,
        } = self;

        let mut seen: FxHashSet<String> = FxHashSet::default();
        for node in &nodes {
            if node.id == "start" || node.id == "end" {
                return Err(ValidationError::ReservedNodeId.into());
            }
            if !seen.insert(node.id.clone()) {
                return Err(ValidationError::DuplicateNode(node.id.clone()).into());
            }
        }

        let mut succs: FxHashMap<String, Vec<String>> = FxHashMap::default();
        let mut preds: FxHashMap<String, Vec<String>> = FxHashMap::default();
        for (from, to) in &edges {
            if from.is_end() || to.is_start() {
                return Err(ValidationError::InvalidEdge(format!("{from} -> {to}")).into());
            }
            for endpoint in [from, to] {
                if let NodeId::Named(name) = endpoint {
                    if !seen.contains(name) {
                        return Err(ValidationError::UnknownEdgeEndpoint(name.clone()).into());
                    }
                }
            }
            let from = from.encode();
            let to = to.encode();
            let dests = succs.entry(from.clone()).or_default();
            if !dests.contains(&to) {
                dests.push(to.clone());
            }
            let sources = preds.entry(to).or_default();
            if !sources.contains(&from) {
                sources.push(from);
            }
        }
        for branch in &branches {
            if branch.source != "start" && !seen.contains(&branch.source) {
                return Err(ValidationError::UnknownEdgeEndpoint(branch.source.clone()).into());
            }
            for dest in &branch.destinations {
                if dest != "end" && !seen.contains(dest) {
                    return Err(ValidationError::UnknownBranchDestination {
                        branch_source: branch.source.clone(),
                        destination: dest.clone(),
                    }
                    .into());
                }
                let sources = preds.entry(dest.clone()).or_default();
                if !sources.contains(&branch.source) {
                    sources.push(branch.source.clone());
                }
            }
        }

        let has_entry = succs.get("start").is_some_and(|dests| !dests.is_empty())
            || branches.iter().any(|b| b.source == "start");
        if !has_entry {
            return Err(ValidationError::MissingEntry.into());
        }

        // Forward reachability over edges and branch destinations.
        let forward = |id: &String| -> Vec<String> {
            let mut out: Vec<String> = succs.get(id).cloned().unwrap_or_default();
            for branch in &branches {
                if &branch.source == id {
                    out.extend(branch.destinations.iter().cloned());
                }
            }
            out
        };
        let mut reachable: FxHashSet<String> = FxHashSet::default();
        let mut queue = vec!["start".to_string()];
        while let Some(id) = queue.pop() {
            for next in forward(&id) {
                if reachable.insert(next.clone()) {
                    queue.push(next);
                }
            }
        }
        for node in &nodes {
            if !reachable.contains(&node.id) {
                return Err(ValidationError::UnreachableNode(node.id.clone()).into());
            }
        }

        // Co-reachability: every node must lie on a path to end.
        let mut reaches_end: FxHashSet<String> = FxHashSet::default();
        let mut queue = vec!["end".to_string()];
        while let Some(id) = queue.pop() {
            if let Some(sources) = preds.get(&id) {
                for source in sources {
                    if reaches_end.insert(source.clone()) {
                        queue.push(source.clone());
                    }
                }
            }
        }
        for node in &nodes {
            if !reaches_end.contains(&node.id) {
                return Err(ValidationError::DeadEnd(node.id.clone()).into());
            }
        }

        // Output-key discipline across joins is statically checkable in dag
        // mode, where joins genuinely wait for every predecessor.
        if options.trigger_mode == TriggerMode::AllPredecessor {
            let output_keys: FxHashMap<&str, Option<&str>> = nodes
                .iter()
                .map(|n| (n.id.as_str(), n.options.output_key.as_deref()))
                .collect();
            for (dest, sources) in &preds {
                let named: Vec<&String> = sources.iter().filter(|s| *s != "start").collect();
                if sources.len() > 1 && !named.is_empty() {
                    let mut keys: FxHashSet<&str> = FxHashSet::default();
                    for source in named {
                        match output_keys.get(source.as_str()).copied().flatten() {
                            Some(key) => {
                                if !keys.insert(key) {
                                    return Err(ValidationError::OutputKeyCollision {
                                        node: dest.clone(),
                                        key: key.to_string(),
                                    }
                                    .into());
                                }
                            }
                            None => {
                                return Err(ValidationError::MissingOutputKey {
                                    node: dest.clone(),
                                    predecessor: source.clone(),
                                }
                                .into());
                            }
                        }
                    }
                }
            }
        }

        // Compile node specs, recursing into sub-graphs.
        let mut compiled: FxHashMap<String, Arc<NodeSpec>> = FxHashMap::default();
        for node in nodes {
            let super::builder::PendingNode { id, exec, options } = node;
            let exec = match exec {
                PendingExec::Lambda(f) => NodeExec::Lambda(f),
                PendingExec::Stream(f) => NodeExec::Stream(f),
                PendingExec::SubGraph(build) => {
                    let mut child_options = options.graph_compile_options.unwrap_or_default();
                    if child_options.graph_name.is_none() {
                        child_options.graph_name = Some(id.clone());
                    }
                    NodeExec::SubGraph(build(child_options)?)
                }
            };
            compiled.insert(
                id.clone(),
                Arc::new(NodeSpec {
                    id,
                    exec,
                    input_key: options.input_key,
                    output_key: options.output_key,
                    pre_handler: options.pre_handler,
                    post_handler: options.post_handler,
                }),
            );
        }

        Ok(Arc::new(GraphCore {
            name: options.graph_name.unwrap_or_else(|| "graph".to_string()),
            nodes: compiled,
            succs,
            preds,
            branches,
            trigger: options.trigger_mode,
            interrupt_before: options.interrupt_before,
            interrupt_after: options.interrupt_after,
            state_factory,
            store: options.store,
            callbacks: options.callbacks,
        }))
    }
}
