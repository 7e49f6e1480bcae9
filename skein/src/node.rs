//! Node variants and the serde erasure applied at the node boundary.
//!
//! Public graph APIs accept typed async functions; internally every node is
//! one of a small set of tagged variants over [`serde_json::Value`]. Each
//! variant has its own executor in the scheduler.

use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::GraphError;
use crate::scheduler::GraphCore;
use crate::stream::StreamReader;

/// Erased unary node function.
pub(crate) type LambdaFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, GraphError>> + Send + Sync>;

/// Erased streaming node function.
pub(crate) type StreamLambdaFn = Arc<
    dyn Fn(Value) -> BoxFuture<'static, Result<StreamReader<Value>, GraphError>> + Send + Sync,
>;

/// Erased state pre/post handler: `(boundary value, state) -> (new value, new state)`.
pub(crate) type StateHandler =
    Arc<dyn Fn(Value, Value) -> Result<(Value, Value), GraphError> + Send + Sync>;

/// Erased branch predicate: `(incoming value, state) -> chosen destinations`.
pub(crate) type BranchPredicate = Arc<dyn Fn(&Value, &Value) -> Vec<String> + Send + Sync>;

/// The executable behavior of a node.
pub(crate) enum NodeExec {
    Lambda(LambdaFn),
    Stream(StreamLambdaFn),
    SubGraph(Arc<GraphCore>),
}

/// A compiled node: behavior plus its boundary adapters.
pub(crate) struct NodeSpec {
    pub id: String,
    pub exec: NodeExec,
    pub input_key: Option<String>,
    pub output_key: Option<String>,
    pub pre_handler: Option<StateHandler>,
    pub post_handler: Option<StateHandler>,
}

pub(crate) fn erase_lambda<A, B, F, Fut>(id: &str, f: F) -> LambdaFn
where
    A: DeserializeOwned + Send + 'static,
    B: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<B, GraphError>> + Send + 'static,
{
    let id = id.to_string();
    Arc::new(move |input: Value| {
        let id = id.clone();
        match serde_json::from_value::<A>(input) {
            Ok(typed) => {
                let fut = f(typed);
                Box::pin(async move {
                    let output = fut.await?;
                    serde_json::to_value(output)
                        .map_err(|err| GraphError::node_failed(&id, err.to_string()))
                })
            }
            Err(err) => Box::pin(async move {
                Err(GraphError::node_failed(
                    &id,
                    format!("input decode failed: {err}"),
                ))
            }),
        }
    })
}

pub(crate) fn erase_stream_lambda<A, B, F, Fut>(id: &str, f: F) -> StreamLambdaFn
where
    A: DeserializeOwned + Send + 'static,
    B: Serialize + Send + 'static,
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<StreamReader<B>, GraphError>> + Send + 'static,
{
    let id = id.to_string();
    Arc::new(move |input: Value| {
        let id = id.clone();
        match serde_json::from_value::<A>(input) {
            Ok(typed) => {
                let fut = f(typed);
                Box::pin(async move {
                    let typed_stream = fut.await?;
                    let (tx, rx) = crate::stream::stream_pipe(crate::stream::DEFAULT_STREAM_CAPACITY);
                    let pump_id = id.clone();
                    tokio::spawn(async move {
                        loop {
                            match typed_stream.recv().await {
                                Ok(chunk) => match serde_json::to_value(chunk) {
                                    Ok(value) => {
                                        if tx.send(value).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(err) => {
                                        tx.close_with_error(format!(
                                            "node `{pump_id}` chunk encode failed: {err}"
                                        ))
                                        .await;
                                        break;
                                    }
                                },
                                Err(crate::stream::StreamError::Closed) => break,
                                Err(crate::stream::StreamError::Failed(message)) => {
                                    tx.close_with_error(message).await;
                                    break;
                                }
                            }
                        }
                    });
                    Ok(rx)
                })
            }
            Err(err) => Box::pin(async move {
                Err(GraphError::node_failed(
                    &id,
                    format!("input decode failed: {err}"),
                ))
            }),
        }
    })
}

pub(crate) fn erase_state_handler<V, S, F>(f: F) -> StateHandler
where
    V: Serialize + DeserializeOwned + Send + 'static,
    S: Serialize + DeserializeOwned + Send + 'static,
    F: Fn(V, &mut S) -> Result<V, GraphError> + Send + Sync + 'static,
{
    Arc::new(move |value: Value, state: Value| {
        let typed_value: V = serde_json::from_value(value)
            .map_err(|err| GraphError::node_failed("state handler", err.to_string()))?;
        let mut typed_state: S = serde_json::from_value(state)
            .map_err(|err| GraphError::node_failed("state handler", err.to_string()))?;
        let new_value = f(typed_value, &mut typed_state)?;
        Ok((
            serde_json::to_value(new_value)?,
            serde_json::to_value(typed_state)?,
        ))
    })
}

pub(crate) fn erase_branch_predicate<A, F>(source: &str, f: F) -> BranchPredicate
where
    A: DeserializeOwned + Send + 'static,
    F: Fn(&A, &Value) -> Vec<String> + Send + Sync + 'static,
{
    let source = source.to_string();
    Arc::new(move |value: &Value, state: &Value| {
        match serde_json::from_value::<A>(value.clone()) {
            Ok(typed) => f(&typed, state),
            Err(err) => {
                tracing::warn!(
                    source = %source,
                    error = %err,
                    "branch predicate input decode failed; routing nowhere"
                );
                Vec::new()
            }
        }
    })
}

/// A compiled branch: predicate plus its statically-known destinations.
pub(crate) struct BranchSpec {
    pub source: String,
    pub predicate: BranchPredicate,
    pub destinations: Vec<String>,
}
