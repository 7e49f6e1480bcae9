//! Checkpoint persistence: the store contract and the serialized run
//! frontier.
//!
//! A checkpoint captures everything needed to resume a paused run: pending
//! per-node inboxes, the local state, interrupted before-nodes, rerun
//! payloads, and one nested checkpoint per paused sub-graph. The blob
//! handed to a [`CheckPointStore`] is opaque to the caller; internally it is
//! a self-describing JSON document whose payloads are validated against the
//! [type registry](crate::registry) on load.
//!
//! The crate ships [`InMemoryStore`] as the reference implementation for
//! testing; durable backends implement the same two-method trait.

use async_trait::async_trait;
use chrono::Utc;
use miette::Diagnostic;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::registry::{self, TypedValue};

/// Version stamp written into every checkpoint blob.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Errors surfaced by checkpoint operations.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointError {
    /// No checkpoint exists under the requested id.
    #[error("checkpoint not found: {id}")]
    #[diagnostic(
        code(skein::checkpoint::not_found),
        help("Run the graph with this checkpoint id first, or drop the resume data.")
    )]
    NotFound { id: String },

    /// The stored checkpoint belongs to a different graph.
    #[error("checkpoint graph mismatch: expected `{expected}`, found `{found}`")]
    #[diagnostic(
        code(skein::checkpoint::version_mismatch),
        help("Checkpoints can only resume the graph that produced them.")
    )]
    VersionMismatch { expected: String, found: String },

    /// A persisted payload references an unregistered or incompatible type.
    #[error("checkpoint decode failed: {reason}")]
    #[diagnostic(
        code(skein::checkpoint::decode_failed),
        help("Register the payload type with skein::registry before resuming.")
    )]
    DecodeFailed { reason: String },

    /// The underlying store failed.
    #[error("checkpoint store error: {0}")]
    #[diagnostic(code(skein::checkpoint::store))]
    Store(String),

    /// Blob (de)serialization failed.
    #[error("checkpoint serialization failed: {source}")]
    #[diagnostic(code(skein::checkpoint::serde))]
    Serde {
        #[from]
        source: serde_json::Error,
    },
}

/// Byte-keyed persistence contract for checkpoints.
#[async_trait]
pub trait CheckPointStore: Send + Sync {
    /// Fetch the blob stored under `id`, if any.
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError>;

    /// Store `blob` under `id`, replacing any previous value.
    async fn set(&self, id: &str, blob: Vec<u8>) -> Result<(), CheckpointError>;
}

/// Volatile reference store for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    blobs: Mutex<FxHashMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckPointStore for InMemoryStore {
    async fn get(&self, id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        Ok(self.blobs.lock().get(id).cloned())
    }

    async fn set(&self, id: &str, blob: Vec<u8>) -> Result<(), CheckpointError> {
        self.blobs.lock().insert(id.to_string(), blob);
        Ok(())
    }
}

/// One pending delivery sitting in a node inbox.
///
/// `value: None` is the skip marker used by dag-mode branch routing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedEnvelope {
    pub source: String,
    pub value: Option<Value>,
}

/// The saved inbox of one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedInbox {
    pub node: String,
    pub entries: Vec<PersistedEnvelope>,
}

/// The full serialized frontier of one graph level.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedRun {
    pub version: u32,
    pub graph_name: String,
    pub step: u64,
    pub state: Option<TypedValue>,
    pub inboxes: Vec<PersistedInbox>,
    pub before_nodes: Vec<String>,
    /// Outputs of nodes that completed inside the interrupted step. Their
    /// deliveries are deferred: on resume they rejoin the replayed barrier,
    /// so successors fire exactly once with the full fan-in.
    pub completed_outputs: Vec<(String, Value)>,
    pub rerun_extra: Vec<(String, TypedValue)>,
    pub sub_graphs: FxHashMap<String, PersistedRun>,
    /// RFC3339 creation time; informational only.
    pub created_at: String,
}

impl PersistedRun {
    /// Start an empty frontier for `graph_name`.
    #[must_use]
    pub fn new(graph_name: impl Into<String>, step: u64) -> Self {
        Self {
            version: CHECKPOINT_FORMAT_VERSION,
            graph_name: graph_name.into(),
            step,
            state: None,
            inboxes: Vec::new(),
            before_nodes: Vec::new(),
            completed_outputs: Vec::new(),
            rerun_extra: Vec::new(),
            sub_graphs: FxHashMap::default(),
            created_at: Utc::now().to_rfc3339(),
        }
    }
}

/// Serialize a frontier into the opaque blob form.
pub fn encode_checkpoint(run: &PersistedRun) -> Result<Vec<u8>, CheckpointError> {
    Ok(serde_json::to_vec(run)?)
}

/// Decode and validate a stored blob.
///
/// Validates the graph name, and every typed payload in the tree against
/// the type registry.
pub fn decode_checkpoint(blob: &[u8], expected_graph: &str) -> Result<PersistedRun, CheckpointError> {
    let run: PersistedRun = serde_json::from_slice(blob)?;
    if run.graph_name != expected_graph {
        return Err(CheckpointError::VersionMismatch {
            expected: expected_graph.to_string(),
            found: run.graph_name,
        });
    }
    validate_payloads(&run)?;
    Ok(run)
}

fn validate_payloads(run: &PersistedRun) -> Result<(), CheckpointError> {
    let mut typed: Vec<&TypedValue> = Vec::new();
    if let Some(state) = &run.state {
        typed.push(state);
    }
    typed.extend(run.rerun_extra.iter().map(|(_, value)| value));
    for value in typed {
        registry::decode_check(value).map_err(|reason| CheckpointError::DecodeFailed {
            reason: match reason {
                Some(detail) => format!("payload of `{}` is invalid: {detail}", value.type_name),
                None => format!("unknown type name `{}`", value.type_name),
            },
        })?;
    }
    for nested in run.sub_graphs.values() {
        validate_payloads(nested)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize, Deserialize)]
    struct CheckpointState {
        a: String,
    }

    #[tokio::test]
    async fn in_memory_store_round_trips() {
        let store = InMemoryStore::new();
        assert!(store.get("missing").await.unwrap().is_none());
        store.set("k", vec![1, 2, 3]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn decode_rejects_wrong_graph() {
        let run = PersistedRun::new("root", 1);
        let blob = encode_checkpoint(&run).unwrap();
        let err = decode_checkpoint(&blob, "other").unwrap_err();
        assert!(matches!(err, CheckpointError::VersionMismatch { .. }));
    }

    #[test]
    fn decode_rejects_unknown_state_type() {
        let mut run = PersistedRun::new("root", 1);
        run.state = Some(TypedValue::new("tests.unregistered_state", json!({})));
        let blob = encode_checkpoint(&run).unwrap();
        let err = decode_checkpoint(&blob, "root").unwrap_err();
        assert!(matches!(err, CheckpointError::DecodeFailed { .. }));
    }

    #[test]
    fn decode_validates_nested_sub_graphs() {
        registry::register_name::<CheckpointState>("tests.checkpoint_state");
        let mut nested = PersistedRun::new("inner", 1);
        nested.state = Some(TypedValue::new(
            "tests.checkpoint_state",
            json!({"a": "x"}),
        ));
        let mut run = PersistedRun::new("root", 2);
        run.sub_graphs.insert("2".into(), nested);
        let blob = encode_checkpoint(&run).unwrap();
        assert!(decode_checkpoint(&blob, "root").is_ok());
    }
}
