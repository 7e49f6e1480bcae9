//! Interrupt metadata: the paused-run snapshot and its addressed tree view.
//!
//! When a run pauses, the engine raises
//! [`GraphError::Interrupt`](crate::error::GraphError) carrying an
//! [`InterruptInfo`]: the local state, the node lists that triggered the
//! pause, and one nested `InterruptInfo` per sub-graph that paused in the
//! same step. [`extract_interrupt_info`] recovers it from the error.
//!
//! For user consumption the nested map is flattened into a tree of
//! [`InterruptCtx`] values. Each context is addressed by the path of graph
//! nesting that leads to it; the context id is the semicolon-joined address
//! (`"runnable:root;node:2;node:2"`), unique within a run, and is the key
//! accepted by
//! [`CallOptions::with_resume_data`](crate::graph::CallOptions::with_resume_data).

use serde::{Deserialize, Serialize};
use std::fmt;

use rustc_hash::FxHashMap;

use crate::error::GraphError;
use crate::registry::TypedValue;

/// The kind of one address segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentKind {
    /// A compiled runnable (the root of an address).
    Runnable,
    /// A sub-graph node inside the enclosing runnable.
    Node,
}

/// One step of an interrupt address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressSegment {
    pub kind: SegmentKind,
    pub id: String,
}

impl AddressSegment {
    #[must_use]
    pub fn runnable(id: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Runnable,
            id: id.into(),
        }
    }

    #[must_use]
    pub fn node(id: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Node,
            id: id.into(),
        }
    }
}

impl fmt::Display for AddressSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SegmentKind::Runnable => write!(f, "runnable:{}", self.id),
            SegmentKind::Node => write!(f, "node:{}", self.id),
        }
    }
}

/// An ordered path of segments from the root runnable to a paused level.
pub type Address = Vec<AddressSegment>;

/// Render an address as the context id: segments joined with `;`.
#[must_use]
pub fn render_address(address: &Address) -> String {
    address
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

/// Parse a context id back into an address.
///
/// Returns `None` for malformed segments.
#[must_use]
pub fn parse_address(id: &str) -> Option<Address> {
    id.split(';')
        .map(|segment| {
            if let Some(rest) = segment.strip_prefix("runnable:") {
                Some(AddressSegment::runnable(rest))
            } else {
                segment
                    .strip_prefix("node:")
                    .map(AddressSegment::node)
            }
        })
        .collect()
}

/// Snapshot of one graph level at the moment of interruption.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct InterruptInfo {
    /// The level's local state, if the graph declared one.
    pub state: Option<TypedValue>,
    /// Nodes the level paused before dispatching, in order.
    pub before_nodes: Vec<String>,
    /// Nodes whose completion triggered the pause, in order.
    pub after_nodes: Vec<String>,
    /// Nodes that raised a rerun interrupt, with their saved payloads.
    pub rerun_nodes_extra: FxHashMap<String, TypedValue>,
    /// Nested interrupts of sub-graph nodes paused in the same step.
    pub sub_graphs: FxHashMap<String, InterruptInfo>,
    /// Flattened, addressed view of this tree; populated on the root info
    /// only, root causes first.
    #[serde(skip)]
    pub interrupt_contexts: Vec<InterruptCtx>,
}

/// A node of the addressed interrupt tree handed to callers.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptCtx {
    /// Unique id within the run; equals the `;`-joined address.
    pub id: String,
    /// Path of graph nesting leading to this level.
    pub address: Address,
    /// The level's state snapshot.
    pub info: Option<TypedValue>,
    /// `true` on the leaf that originated the interrupt.
    pub is_root_cause: bool,
    /// Back-pointer to the enclosing level.
    pub parent: Option<Box<InterruptCtx>>,
}

impl InterruptInfo {
    /// Build the flattened context list for this tree and store it on
    /// `self.interrupt_contexts`, root causes (deepest leaves) first.
    pub fn build_contexts(&mut self, graph_name: &str) {
        let root_address = vec![AddressSegment::runnable(graph_name)];
        self.interrupt_contexts = collect_contexts(self, root_address, None);
    }
}

fn collect_contexts(
    info: &InterruptInfo,
    address: Address,
    parent: Option<Box<InterruptCtx>>,
) -> Vec<InterruptCtx> {
    let own = InterruptCtx {
        id: render_address(&address),
        address: address.clone(),
        info: info.state.clone(),
        is_root_cause: info.sub_graphs.is_empty(),
        parent,
    };

    let mut contexts = Vec::new();
    let mut child_ids: Vec<&String> = info.sub_graphs.keys().collect();
    child_ids.sort();
    for child_id in child_ids {
        let child_info = &info.sub_graphs[child_id];
        let mut child_address = address.clone();
        child_address.push(AddressSegment::node(child_id));
        contexts.extend(collect_contexts(
            child_info,
            child_address,
            Some(Box::new(own.clone())),
        ));
    }
    contexts.push(own);
    contexts
}

/// Recover the [`InterruptInfo`] carried by a cooperative interrupt error.
#[must_use]
pub fn extract_interrupt_info(err: &GraphError) -> Option<&InterruptInfo> {
    match err {
        GraphError::Interrupt(info) => Some(info),
        _ => None,
    }
}

/// Key under which a node-raised rerun payload travels before the scheduler
/// re-keys it to the raising node's id.
pub(crate) const RERUN_SELF_KEY: &str = "self";

/// Raise a rerun interrupt from inside a node.
///
/// The current step pauses; the node's input is preserved and the node is
/// re-executed on resume. `extra` is saved alongside and surfaces in
/// [`InterruptInfo::rerun_nodes_extra`] under the node's id.
pub fn interrupt_and_rerun<T>(extra: T) -> GraphError
where
    T: serde::Serialize + serde::de::DeserializeOwned + 'static,
{
    crate::registry::register::<T>();
    let typed = crate::registry::encode(&extra).unwrap_or_else(|| {
        TypedValue::new(std::any::type_name::<T>(), serde_json::Value::Null)
    });
    let mut info = InterruptInfo::default();
    info.rerun_nodes_extra.insert(RERUN_SELF_KEY.into(), typed);
    GraphError::Interrupt(Box::new(info))
}
