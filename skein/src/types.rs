//! Core identity types for the skein graph engine.
//!
//! This module defines the fundamental vocabulary of a graph: node
//! identifiers (including the virtual `Start`/`End` endpoints) and the
//! trigger mode that selects between pregel-style and dag-style scheduling.
//!
//! # Examples
//!
//! ```rust
//! use skein::types::NodeId;
//!
//! let start = NodeId::Start;
//! let worker = NodeId::named("worker");
//!
//! assert_eq!(worker.encode(), "worker");
//! assert_eq!(NodeId::decode("start"), NodeId::Start);
//! assert_eq!(NodeId::decode("worker"), worker);
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies a node within a graph.
///
/// `Start` and `End` are virtual endpoints: they are never executed and
/// cannot be registered as nodes. Every graph entry edge originates at
/// `Start` and every exit edge terminates at `End`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeId {
    /// Virtual entry point. Has no incoming edges.
    Start,
    /// Virtual exit point. Has no outgoing edges.
    End,
    /// A user-defined node, identified by a unique name within the graph.
    Named(String),
}

impl NodeId {
    /// Convenience constructor for a named node.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        NodeId::Named(name.into())
    }

    /// Encode into the persisted string form.
    ///
    /// `Start` and `End` encode to the reserved names `"start"` / `"end"`;
    /// named nodes encode to their name. The builder rejects user nodes
    /// named `"start"` or `"end"` so decoding is unambiguous.
    #[must_use]
    pub fn encode(&self) -> String {
        match self {
            NodeId::Start => "start".to_string(),
            NodeId::End => "end".to_string(),
            NodeId::Named(name) => name.clone(),
        }
    }

    /// Decode a persisted string form back into a `NodeId`.
    #[must_use]
    pub fn decode(s: &str) -> Self {
        match s {
            "start" => NodeId::Start,
            "end" => NodeId::End,
            name => NodeId::Named(name.to_string()),
        }
    }

    /// Returns `true` if this is the virtual [`Start`](Self::Start) endpoint.
    #[must_use]
    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start)
    }

    /// Returns `true` if this is the virtual [`End`](Self::End) endpoint.
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, Self::End)
    }

    /// The node name, if this is a named node.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            NodeId::Named(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId::decode(s)
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId::decode(&s)
    }
}

/// Selects how the scheduler decides a node is ready to fire.
///
/// - [`AnyPredecessor`](Self::AnyPredecessor) (pregel, the default): a node
///   fires whenever it has at least one pending message; execution proceeds
///   in supersteps and a node may fire multiple times per run.
/// - [`AllPredecessor`](Self::AllPredecessor) (dag): a node fires once all
///   of its predecessors have delivered a value (or an explicit skip, for
///   branch destinations that were not chosen).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerMode {
    #[default]
    AnyPredecessor,
    AllPredecessor,
}

impl fmt::Display for TriggerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AnyPredecessor => write!(f, "any_predecessor"),
            Self::AllPredecessor => write!(f, "all_predecessor"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trip() {
        for id in [NodeId::Start, NodeId::End, NodeId::named("worker")] {
            assert_eq!(NodeId::decode(&id.encode()), id);
        }
    }

    #[test]
    fn from_str_recognizes_endpoints() {
        assert_eq!(NodeId::from("start"), NodeId::Start);
        assert_eq!(NodeId::from("end"), NodeId::End);
        assert_eq!(NodeId::from("2"), NodeId::named("2"));
    }

    #[test]
    fn default_trigger_is_pregel() {
        assert_eq!(TriggerMode::default(), TriggerMode::AnyPredecessor);
    }
}
