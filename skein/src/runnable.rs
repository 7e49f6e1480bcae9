//! The compiled, immutable graph artifact.
//!
//! A [`Runnable`] is produced by [`Graph::compile`](crate::graph::Graph) and
//! shared across runs (`Clone` is an `Arc` bump). It exposes the graph's
//! declared boundary types through [`invoke`](Runnable::invoke) (unary →
//! unary) and [`stream`](Runnable::stream) (unary → stream); for any input,
//! `invoke` equals the concatenation of `stream` chunks.
//!
//! Checkpoint lifecycle: a call carrying a checkpoint id resumes from the
//! stored frontier when one exists, otherwise it starts fresh; every
//! interrupt overwrites the checkpoint, and success leaves it in place so a
//! pure after-node interrupt can be resumed idempotently.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::callback::{fire_error, CallbackList, RunInfo};
use crate::checkpoint::{decode_checkpoint, encode_checkpoint, CheckpointError, PersistedRun};
use crate::error::{GraphError, ValidationError};
use crate::graph::CallOptions;
use crate::interrupt::{parse_address, SegmentKind};
use crate::registry::TypedValue;
use crate::scheduler::{run_graph, GraphCore, RunEnv, RunFailure};
use crate::stream::{stream_pipe, StreamError, StreamReader, DEFAULT_STREAM_CAPACITY};
use crate::value::GraphValue;

/// A compiled graph, invocable and embeddable as a sub-graph node.
pub struct Runnable<I, O> {
    core: Arc<GraphCore>,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O> Clone for Runnable<I, O> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            _marker: PhantomData,
        }
    }
}

impl<I, O> Runnable<I, O> {
    pub(crate) fn from_core(core: Arc<GraphCore>) -> Self {
        Self {
            core,
            _marker: PhantomData,
        }
    }

    pub(crate) fn core(&self) -> Arc<GraphCore> {
        self.core.clone()
    }

    /// The compiled graph name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.core.name
    }
}

impl<I, O> Runnable<I, O>
where
    I: Serialize + DeserializeOwned + Send + 'static,
    O: Serialize + DeserializeOwned + Send + 'static,
{
    /// Run to completion and return the final output.
    pub async fn invoke(&self, input: I, options: CallOptions) -> Result<O, GraphError> {
        let output = self.run_erased(input, options).await?;
        let scalar = output.materialize().await?;
        Ok(serde_json::from_value(scalar)?)
    }

    /// Run and expose the output as a stream of chunks.
    ///
    /// A scalar result becomes a single-chunk stream; streaming node outputs
    /// reaching the end of the graph pass through chunk by chunk.
    pub async fn stream(&self, input: I, options: CallOptions) -> Result<StreamReader<O>, GraphError> {
        let callbacks = self.merged_callbacks(&options);
        let run_info = RunInfo::graph(&self.core.name);
        if let Ok(input_value) = serde_json::to_value(&input) {
            for cb in &callbacks {
                cb.on_start_with_stream_input(&run_info, StreamReader::single(input_value.clone()));
            }
        }

        let output = self.run_erased(input, options).await?;
        let chunks = match output {
            GraphValue::Stream(reader) => reader,
            GraphValue::Scalar(value) => StreamReader::single(value),
        };

        let mut copies = chunks.copy(callbacks.len() + 1);
        let out = copies.remove(0);
        for cb in &callbacks {
            cb.on_end_with_stream_output(&run_info, copies.remove(0));
        }

        let (tx, rx) = stream_pipe(DEFAULT_STREAM_CAPACITY);
        tokio::spawn(async move {
            loop {
                match out.recv().await {
                    Ok(value) => match serde_json::from_value::<O>(value) {
                        Ok(chunk) => {
                            if tx.send(chunk).await.is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            tx.close_with_error(format!("output chunk decode failed: {err}"))
                                .await;
                            break;
                        }
                    },
                    Err(StreamError::Closed) => break,
                    Err(StreamError::Failed(message)) => {
                        tx.close_with_error(message).await;
                        break;
                    }
                }
            }
        });
        Ok(rx)
    }

    async fn run_erased(&self, input: I, options: CallOptions) -> Result<GraphValue, GraphError> {
        let callbacks = self.merged_callbacks(&options);
        let run_info = RunInfo::graph(&self.core.name);

        let resume = self.prepare_resume(&options).await.map_err(|err| {
            fire_error(&callbacks, &run_info, &err);
            err
        })?;
        let resuming = resume.is_some();

        let input_value = serde_json::to_value(input)?;
        let env = RunEnv {
            callbacks: options.callbacks.clone(),
            cancel: options.cancel.clone(),
            resume,
        };
        let graph_input = if resuming { None } else { Some(input_value) };

        match run_graph(self.core.clone(), graph_input, env).await {
            Ok(output) => Ok(output),
            Err(RunFailure::Interrupted { mut info, saved }) => {
                if let (Some(id), Some(store)) = (&options.checkpoint_id, &self.core.store) {
                    if let Ok(blob) = encode_checkpoint(&saved) {
                        store.set(id, blob).await?;
                    }
                }
                info.build_contexts(&self.core.name);
                let err = GraphError::Interrupt(Box::new(info));
                // The facade is the root level's embedding wrapper.
                fire_error(&callbacks, &run_info, &err);
                Err(err)
            }
            Err(RunFailure::Error(err)) => {
                fire_error(&callbacks, &run_info, &err);
                Err(err)
            }
        }
    }

    fn merged_callbacks(&self, options: &CallOptions) -> CallbackList {
        options
            .callbacks
            .iter()
            .chain(self.core.callbacks.iter())
            .cloned()
            .collect()
    }

    async fn prepare_resume(
        &self,
        options: &CallOptions,
    ) -> Result<Option<PersistedRun>, GraphError> {
        let Some(id) = &options.checkpoint_id else {
            if !options.resume_data.is_empty() {
                tracing::warn!("resume data supplied without a checkpoint id; ignoring");
            }
            return Ok(None);
        };
        let store = self
            .core
            .store
            .as_ref()
            .ok_or(ValidationError::MissingStore)?;
        match store.get(id).await? {
            Some(blob) => {
                let mut run = decode_checkpoint(&blob, &self.core.name)?;
                apply_resume_data(&mut run, &options.resume_data, &self.core.name);
                Ok(Some(run))
            }
            None => {
                if options.resume_data.is_empty() {
                    Ok(None)
                } else {
                    Err(CheckpointError::NotFound { id: id.clone() }.into())
                }
            }
        }
    }
}

/// Patch resume payloads into the saved frontier tree, addressed by
/// interrupt-context id.
fn apply_resume_data(
    run: &mut PersistedRun,
    resume_data: &rustc_hash::FxHashMap<String, TypedValue>,
    graph_name: &str,
) {
    for (ctx_id, typed) in resume_data {
        let Some(address) = parse_address(ctx_id) else {
            tracing::warn!(ctx_id = %ctx_id, "malformed interrupt context id; ignoring resume data");
            continue;
        };
        let Some((root, rest)) = address.split_first() else {
            continue;
        };
        if root.kind != SegmentKind::Runnable || root.id != graph_name {
            tracing::warn!(
                ctx_id = %ctx_id,
                graph = %graph_name,
                "resume data addressed to a different runnable; ignoring"
            );
            continue;
        }
        let mut target = &mut *run;
        let mut lost = false;
        for segment in rest {
            if segment.kind != SegmentKind::Node {
                lost = true;
                break;
            }
            match target.sub_graphs.get_mut(&segment.id) {
                Some(next) => target = next,
                None => {
                    lost = true;
                    break;
                }
            }
        }
        if lost {
            tracing::warn!(
                ctx_id = %ctx_id,
                "no paused sub-graph at this address; ignoring resume data"
            );
            continue;
        }
        target.state = Some(typed.clone());
    }
}

/// Internal helper so a value-level state patch can be tested without a
/// full run.
#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resume_data_patches_nested_state() {
        let mut nested = PersistedRun::new("2", 1);
        nested.state = Some(TypedValue::new("tests.state", json!({"A": ""})));
        let mut run = PersistedRun::new("root", 2);
        run.sub_graphs.insert("2".into(), nested);

        let mut data = rustc_hash::FxHashMap::default();
        data.insert(
            "runnable:root;node:2".to_string(),
            TypedValue::new("tests.state", json!({"A": "patched"})),
        );
        apply_resume_data(&mut run, &data, "root");
        assert_eq!(
            run.sub_graphs["2"].state,
            Some(TypedValue::new("tests.state", json!({"A": "patched"})))
        );
    }

    #[test]
    fn resume_data_for_other_runnable_is_ignored() {
        let mut run = PersistedRun::new("root", 1);
        let mut data = rustc_hash::FxHashMap::default();
        data.insert(
            "runnable:other".to_string(),
            TypedValue::new("tests.state", json!({})),
        );
        apply_resume_data(&mut run, &data, "root");
        assert!(run.state.is_none());
    }
}
