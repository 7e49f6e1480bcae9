//! The superstep executor.
//!
//! One executor skeleton drives both trigger modes. A run proceeds in
//! supersteps: every ready node executes concurrently, the barrier collects
//! their outcomes, interrupts are detected, and outputs are delivered to
//! successor inboxes. In `AnyPredecessor` mode a node becomes ready when a
//! barrier writes to it; in `AllPredecessor` mode it becomes ready once all
//! of its predecessors have delivered (or explicitly skipped).
//!
//! Interrupted steps defer their deliveries: completed outputs are saved in
//! the checkpoint and rejoin the replayed barrier on resume, so a join
//! downstream of a paused sub-graph fires exactly once with its full
//! fan-in.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use rustc_hash::{FxHashMap, FxHashSet};
use serde_json::Value;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use crate::callback::{fire_end, fire_error, fire_start, CallbackList, RunInfo};
use crate::checkpoint::{CheckPointStore, PersistedEnvelope, PersistedInbox, PersistedRun};
use crate::error::GraphError;
use crate::graph::builder::StateFactory;
use crate::interrupt::{InterruptInfo, RERUN_SELF_KEY};
use crate::node::{BranchSpec, NodeExec, NodeSpec};
use crate::registry::TypedValue;
use crate::stream::StreamReader;
use crate::types::TriggerMode;
use crate::value::{concat_chunks, merge_fan_in, GraphValue};

/// The immutable compiled topology shared by every run of a graph.
pub(crate) struct GraphCore {
    pub name: String,
    pub nodes: FxHashMap<String, Arc<NodeSpec>>,
    /// Encoded source id ("start" or a node name) -> encoded destinations.
    pub succs: FxHashMap<String, Vec<String>>,
    /// Encoded destination id ("end" or a node name) -> encoded sources.
    pub preds: FxHashMap<String, Vec<String>>,
    pub branches: Vec<BranchSpec>,
    pub trigger: TriggerMode,
    pub interrupt_before: Vec<String>,
    pub interrupt_after: Vec<String>,
    pub state_factory: Option<StateFactory>,
    pub store: Option<Arc<dyn CheckPointStore>>,
    pub callbacks: CallbackList,
}

/// Per-run ambient context threaded into every graph level.
pub(crate) struct RunEnv {
    /// Call-level callbacks; each level merges its compile-time callbacks in.
    pub callbacks: CallbackList,
    pub cancel: Option<watch::Receiver<bool>>,
    /// Saved frontier to restore; `None` starts fresh.
    pub resume: Option<PersistedRun>,
}

/// Why a graph level did not produce an output.
pub(crate) enum RunFailure {
    Interrupted {
        info: InterruptInfo,
        saved: PersistedRun,
    },
    Error(GraphError),
}

impl From<GraphError> for RunFailure {
    fn from(err: GraphError) -> Self {
        RunFailure::Error(err)
    }
}

impl RunFailure {
    fn to_graph_error(&self) -> GraphError {
        match self {
            RunFailure::Interrupted { info, .. } => GraphError::Interrupt(Box::new(info.clone())),
            RunFailure::Error(err) => GraphError::node_failed("run", err.to_string()),
        }
    }
}

/// A pending delivery in a node inbox.
enum Envelope {
    Value(Value),
    Stream(StreamReader<Value>),
    Skip,
}

/// Outcome of a single node task.
enum TaskOutcome {
    Success(GraphValue),
    SubInterrupt {
        info: InterruptInfo,
        saved: PersistedRun,
    },
    Rerun {
        extra: Option<TypedValue>,
    },
    Failure(GraphError),
}

/// Execute one graph level to completion, interruption, or failure.
pub(crate) fn run_graph(
    core: Arc<GraphCore>,
    input: Option<Value>,
    env: RunEnv,
) -> BoxFuture<'static, Result<GraphValue, RunFailure>> {
    Box::pin(async move {
        let callbacks: CallbackList = env
            .callbacks
            .iter()
            .chain(core.callbacks.iter())
            .cloned()
            .collect();
        let run_info = RunInfo::graph(&core.name);
        fire_start(&callbacks, &run_info);

        let mut runner = GraphRunner {
            core,
            state: Arc::new(Mutex::new(None)),
            inboxes: FxHashMap::default(),
            fresh: FxHashSet::default(),
            before_cleared: FxHashSet::default(),
            sub_resume: FxHashMap::default(),
            step: 0,
            env_callbacks: env.callbacks,
            cancel: env.cancel,
        };

        let result = runner.run(input, env.resume).await;
        match &result {
            Ok(_) => fire_end(&callbacks, &run_info),
            Err(failure) => fire_error(&callbacks, &run_info, &failure.to_graph_error()),
        }
        result
    })
}

struct GraphRunner {
    core: Arc<GraphCore>,
    state: Arc<Mutex<Option<TypedValue>>>,
    inboxes: FxHashMap<String, Vec<(String, Envelope)>>,
    /// Nodes written by the previous barrier (pregel trigger set).
    fresh: FxHashSet<String>,
    /// Before-interrupt nodes already resumed past; they run once before
    /// the before-check applies to them again.
    before_cleared: FxHashSet<String>,
    /// Paused sub-graph frontiers awaiting re-entry, keyed by node id.
    sub_resume: FxHashMap<String, PersistedRun>,
    step: u64,
    env_callbacks: CallbackList,
    cancel: Option<watch::Receiver<bool>>,
}

impl GraphRunner {
    async fn run(
        &mut self,
        input: Option<Value>,
        resume: Option<PersistedRun>,
    ) -> Result<GraphValue, RunFailure> {
        match resume {
            Some(saved) => self.restore_and_replay(saved).await?,
            None => {
                *self.state.lock().await = self.core.state_factory.as_ref().map(|f| f());
                let input = input.unwrap_or(Value::Null);
                self.deliver_from("start", GraphValue::Scalar(input)).await?;
            }
        }

        loop {
            self.step += 1;
            if let Some(cancel) = &self.cancel {
                if *cancel.borrow() {
                    return Err(GraphError::Cancelled.into());
                }
            }

            self.propagate_skips();
            let ready = self.compute_ready();
            if ready.is_empty() {
                return self.finish().await;
            }

            // Interrupt before dispatch: a before-node with its full fan-in
            // pending pauses the step before anything runs.
            let before_hit = self.before_hit(&ready);
            if !before_hit.is_empty() {
                let info = self
                    .interrupt_info(before_hit.clone(), Vec::new(), FxHashMap::default(), FxHashMap::default())
                    .await;
                let saved = self
                    .snapshot(before_hit, Vec::new(), Vec::new(), FxHashMap::default())
                    .await?;
                return Err(RunFailure::Interrupted { info, saved });
            }
            for node in &ready {
                self.before_cleared.remove(node);
            }

            self.barrier(ready, Vec::new()).await?;

            // Pregel termination: an end delivery completes the run.
            if self.core.trigger == TriggerMode::AnyPredecessor && self.fresh.contains("end") {
                return self.finish().await;
            }
        }
    }

    /// Restore a saved frontier and replay the interrupted barrier:
    /// completed outputs rejoin it untouched while paused sub-graphs and
    /// rerun nodes execute again.
    async fn restore_and_replay(&mut self, saved: PersistedRun) -> Result<(), RunFailure> {
        *self.state.lock().await = saved.state;
        self.step = saved.step;
        for inbox in saved.inboxes {
            let entries = inbox
                .entries
                .into_iter()
                .map(|e| {
                    let envelope = match e.value {
                        Some(value) => Envelope::Value(value),
                        None => Envelope::Skip,
                    };
                    (e.source, envelope)
                })
                .collect();
            self.inboxes.insert(inbox.node, entries);
        }
        self.before_cleared = saved.before_nodes.iter().cloned().collect();
        self.fresh = saved.before_nodes.into_iter().collect();
        self.sub_resume = saved.sub_graphs;

        let mut to_run: Vec<String> = self.sub_resume.keys().cloned().collect();
        to_run.extend(saved.rerun_extra.into_iter().map(|(node, _)| node));
        to_run.sort();
        to_run.dedup();

        if to_run.is_empty() && saved.completed_outputs.is_empty() {
            return Ok(());
        }
        self.barrier(to_run, saved.completed_outputs).await
    }

    /// Execute one barrier: run `to_run` concurrently, merge in `preloaded`
    /// outputs, detect interrupts, and deliver.
    async fn barrier(
        &mut self,
        to_run: Vec<String>,
        preloaded: Vec<(String, Value)>,
    ) -> Result<(), RunFailure> {
        let mut join: JoinSet<(String, TaskOutcome)> = JoinSet::new();
        let mut consumed: FxHashMap<String, Vec<(String, Option<Value>)>> = FxHashMap::default();

        for node_id in &to_run {
            let Some(spec) = self.core.nodes.get(node_id).cloned() else {
                return Err(GraphError::node_failed(
                    node_id,
                    "node disappeared from compiled graph",
                )
                .into());
            };
            let entries = self.inboxes.remove(node_id).unwrap_or_default();
            let mut materialized: Vec<(String, Option<Value>)> = Vec::new();
            for (source, envelope) in entries {
                let value = match envelope {
                    Envelope::Value(value) => Some(value),
                    Envelope::Skip => None,
                    Envelope::Stream(reader) => {
                        let chunks = reader.collect().await.map_err(GraphError::Stream)?;
                        Some(concat_chunks(chunks))
                    }
                };
                materialized.push((source, value));
            }
            consumed.insert(node_id.clone(), materialized.clone());

            let input = assemble_input(node_id, &spec, materialized)?;
            let nested = self.sub_resume.remove(node_id);
            join.spawn(execute_node(
                spec,
                input,
                self.state.clone(),
                nested,
                self.env_callbacks.clone(),
                self.cancel.clone(),
            ));
        }

        let mut completions: Vec<(String, GraphValue)> = Vec::new();
        let mut sub_interrupts: FxHashMap<String, (InterruptInfo, PersistedRun)> =
            FxHashMap::default();
        let mut reruns: FxHashMap<String, TypedValue> = FxHashMap::default();
        let mut hard_error: Option<GraphError> = None;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((node, TaskOutcome::Success(value))) => completions.push((node, value)),
                Ok((node, TaskOutcome::SubInterrupt { info, saved })) => {
                    sub_interrupts.insert(node, (info, saved));
                }
                Ok((node, TaskOutcome::Rerun { extra })) => {
                    let extra = extra.unwrap_or_else(|| TypedValue::new("", Value::Null));
                    reruns.insert(node, extra);
                }
                Ok((_, TaskOutcome::Failure(err))) => hard_error = Some(err),
                Err(join_err) => {
                    hard_error = Some(if join_err.is_panic() {
                        GraphError::Panic(panic_message(join_err.into_panic()))
                    } else {
                        GraphError::Cancelled
                    });
                }
            }
        }
        if let Some(err) = hard_error {
            return Err(err.into());
        }

        let mut ran: Vec<String> = completions
            .iter()
            .filter(|(node, _)| to_run.contains(node))
            .map(|(node, _)| node.clone())
            .collect();
        ran.sort();

        let mut after_hit: Vec<String> = ran
            .iter()
            .filter(|node| self.core.interrupt_after.contains(*node))
            .cloned()
            .collect();
        after_hit.sort();

        if after_hit.is_empty() && sub_interrupts.is_empty() && reruns.is_empty() {
            // Normal barrier: merge preloaded outputs in and deliver.
            // Executed nodes leave the trigger set; deliveries re-enter it.
            for node in &to_run {
                self.fresh.remove(node);
            }
            let mut outputs = completions;
            for (node, value) in preloaded {
                outputs.push((node, GraphValue::Scalar(value)));
            }
            for (node, value) in outputs {
                self.deliver_from(&node, value).await?;
            }
            return Ok(());
        }

        // Interrupted barrier: deliveries are deferred. Restore the inboxes
        // of paused/rerun nodes, collect every completed output (including
        // preloaded ones), and snapshot.
        for node in sub_interrupts.keys().chain(reruns.keys()) {
            if let Some(entries) = consumed.remove(node) {
                let restored = entries
                    .into_iter()
                    .map(|(source, value)| {
                        let envelope = value.map_or(Envelope::Skip, Envelope::Value);
                        (source, envelope)
                    })
                    .collect();
                self.inboxes.insert(node.clone(), restored);
            }
        }

        let mut completed_outputs: Vec<(String, Value)> = preloaded;
        for (node, value) in completions {
            completed_outputs.push((node, value.materialize().await?));
        }

        let paused: FxHashSet<&String> = sub_interrupts.keys().chain(reruns.keys()).collect();
        let next_before = self.simulate_next_before(&completed_outputs, &paused);

        let sub_infos: FxHashMap<String, InterruptInfo> = sub_interrupts
            .iter()
            .map(|(node, (info, _))| (node.clone(), info.clone()))
            .collect();
        let info = self
            .interrupt_info(next_before.clone(), after_hit, reruns.clone(), sub_infos)
            .await;

        let sub_saved: FxHashMap<String, PersistedRun> = sub_interrupts
            .into_iter()
            .map(|(node, (_, saved))| (node, saved))
            .collect();
        let saved = self
            .snapshot(
                next_before,
                completed_outputs,
                reruns.into_iter().collect(),
                sub_saved,
            )
            .await?;
        Err(RunFailure::Interrupted { info, saved })
    }

    /// Dag-mode skip propagation: a node whose entire fan-in was skipped is
    /// itself skipped and forwards skips downstream.
    fn propagate_skips(&mut self) {
        if self.core.trigger != TriggerMode::AllPredecessor {
            return;
        }
        loop {
            let mut skipped_node: Option<String> = None;
            for (node, entries) in &self.inboxes {
                if node == "end" || !self.core.nodes.contains_key(node) {
                    continue;
                }
                if self.full_fan_in(node)
                    && !entries.is_empty()
                    && entries.iter().all(|(_, e)| matches!(e, Envelope::Skip))
                {
                    skipped_node = Some(node.clone());
                    break;
                }
            }
            let Some(node) = skipped_node else { break };
            self.inboxes.remove(&node);
            let mut dests: Vec<String> =
                self.core.succs.get(&node).cloned().unwrap_or_default();
            for branch in &self.core.branches {
                if branch.source == node {
                    dests.extend(branch.destinations.iter().cloned());
                }
            }
            dests.dedup();
            for dest in dests {
                self.push_envelope(&dest, node.clone(), Envelope::Skip);
            }
        }
    }

    fn compute_ready(&self) -> Vec<String> {
        let mut ready: Vec<String> = match self.core.trigger {
            TriggerMode::AnyPredecessor => self
                .fresh
                .iter()
                .filter(|node| self.core.nodes.contains_key(*node))
                .cloned()
                .collect(),
            TriggerMode::AllPredecessor => self
                .core
                .nodes
                .keys()
                .filter(|node| !self.inboxes.get(*node).map_or(true, Vec::is_empty))
                .filter(|node| self.full_fan_in(node))
                .cloned()
                .collect(),
        };
        ready.extend(self.sub_resume.keys().cloned());
        ready.sort();
        ready.dedup();
        ready
    }

    /// All declared predecessors of `node` have delivered a value or a skip.
    fn full_fan_in(&self, node: &str) -> bool {
        let Some(preds) = self.core.preds.get(node) else {
            return true;
        };
        let sources: FxHashSet<&String> = self
            .inboxes
            .get(node)
            .map(|entries| entries.iter().map(|(source, _)| source).collect())
            .unwrap_or_default();
        preds.iter().all(|pred| sources.contains(pred))
    }

    fn before_hit(&self, ready: &[String]) -> Vec<String> {
        let mut hit: Vec<String> = ready
            .iter()
            .filter(|node| {
                self.core.interrupt_before.contains(*node)
                    && !self.before_cleared.contains(*node)
                    && !self.sub_resume.contains_key(*node)
                    && self.full_fan_in(node)
            })
            .cloned()
            .collect();
        hit.sort();
        hit
    }

    /// Before-nodes that would have their full fan-in once the deferred
    /// outputs of an interrupted step are delivered.
    fn simulate_next_before(
        &self,
        completed: &[(String, Value)],
        paused: &FxHashSet<&String>,
    ) -> Vec<String> {
        let mut next: Vec<String> = Vec::new();
        for candidate in &self.core.interrupt_before {
            if self.before_cleared.contains(candidate)
                || paused.contains(candidate)
                || !self.core.nodes.contains_key(candidate)
            {
                continue;
            }
            let Some(preds) = self.core.preds.get(candidate) else {
                continue;
            };
            let mut sources: FxHashSet<String> = self
                .inboxes
                .get(candidate)
                .map(|entries| entries.iter().map(|(s, _)| s.clone()).collect())
                .unwrap_or_default();
            for (node, _) in completed {
                if self.static_dests(node).contains(candidate) {
                    sources.insert(node.clone());
                }
            }
            if preds.iter().all(|pred| sources.contains(pred)) {
                next.push(candidate.clone());
            }
        }
        next.sort();
        next
    }

    fn static_dests(&self, source: &str) -> FxHashSet<String> {
        let mut dests: FxHashSet<String> = self
            .core
            .succs
            .get(source)
            .map(|d| d.iter().cloned().collect())
            .unwrap_or_default();
        for branch in &self.core.branches {
            if branch.source == source {
                dests.extend(branch.destinations.iter().cloned());
            }
        }
        dests
    }

    async fn interrupt_info(
        &self,
        before_nodes: Vec<String>,
        after_nodes: Vec<String>,
        rerun: FxHashMap<String, TypedValue>,
        sub_graphs: FxHashMap<String, InterruptInfo>,
    ) -> InterruptInfo {
        InterruptInfo {
            state: self.state.lock().await.clone(),
            before_nodes,
            after_nodes,
            rerun_nodes_extra: rerun,
            sub_graphs,
            interrupt_contexts: Vec::new(),
        }
    }

    async fn snapshot(
        &mut self,
        before_nodes: Vec<String>,
        completed_outputs: Vec<(String, Value)>,
        rerun_extra: Vec<(String, TypedValue)>,
        sub_graphs: FxHashMap<String, PersistedRun>,
    ) -> Result<PersistedRun, RunFailure> {
        let mut run = PersistedRun::new(&self.core.name, self.step);
        run.state = self.state.lock().await.clone();
        run.before_nodes = before_nodes;
        run.completed_outputs = completed_outputs;
        run.rerun_extra = rerun_extra;
        run.sub_graphs = sub_graphs;
        // Sub-graphs that were already paused and did not re-enter this step
        // stay paused in the saved frontier.
        for (node, saved) in self.sub_resume.drain() {
            run.sub_graphs.entry(node).or_insert(saved);
        }
        let mut nodes: Vec<&String> = self.inboxes.keys().collect();
        nodes.sort();
        for node in nodes {
            let mut entries = Vec::new();
            for (source, envelope) in &self.inboxes[node] {
                let value = match envelope {
                    Envelope::Value(value) => Some(value.clone()),
                    Envelope::Skip => None,
                    Envelope::Stream(_) => {
                        return Err(GraphError::node_failed(
                            node,
                            "cannot checkpoint an unconsumed stream inbox",
                        )
                        .into());
                    }
                };
                entries.push(PersistedEnvelope {
                    source: source.clone(),
                    value,
                });
            }
            run.inboxes.push(PersistedInbox {
                node: node.clone(),
                entries,
            });
        }
        Ok(run)
    }

    async fn finish(&mut self) -> Result<GraphValue, RunFailure> {
        let entries = self.inboxes.remove("end").unwrap_or_default();
        let mut values: Vec<Envelope> = entries
            .into_iter()
            .filter(|(_, e)| !matches!(e, Envelope::Skip))
            .map(|(_, e)| e)
            .collect();
        if values.is_empty() {
            return Err(GraphError::node_failed(
                &self.core.name,
                format!("run stalled at step {}: no runnable nodes and no output", self.step),
            )
            .into());
        }
        if values.len() == 1 {
            return Ok(match values.remove(0) {
                Envelope::Value(value) => GraphValue::Scalar(value),
                Envelope::Stream(reader) => GraphValue::Stream(reader),
                Envelope::Skip => unreachable!("skips filtered above"),
            });
        }
        let mut scalars = Vec::with_capacity(values.len());
        for envelope in values {
            match envelope {
                Envelope::Value(value) => scalars.push(value),
                Envelope::Stream(reader) => {
                    let chunks = reader.collect().await.map_err(GraphError::Stream)?;
                    scalars.push(concat_chunks(chunks));
                }
                Envelope::Skip => unreachable!("skips filtered above"),
            }
        }
        Ok(GraphValue::Scalar(merge_fan_in("end", scalars).map_err(RunFailure::Error)?))
    }

    /// Route one node's output to its successors, evaluating branches and
    /// fanning streams out with independent copies.
    async fn deliver_from(&mut self, source: &str, value: GraphValue) -> Result<(), RunFailure> {
        let source = source.to_string();
        let static_dests: Vec<String> =
            self.core.succs.get(&source).cloned().unwrap_or_default();
        let branches: Vec<&BranchSpec> = self
            .core
            .branches
            .iter()
            .filter(|b| b.source == source)
            .collect();

        // Branch evaluation needs a scalar; so does any fan-out wider than
        // the stream copy path below.
        let value = if branches.is_empty() {
            value
        } else {
            GraphValue::Scalar(value.materialize().await.map_err(RunFailure::Error)?)
        };

        let mut dests = static_dests;
        let mut skips: Vec<String> = Vec::new();
        if !branches.is_empty() {
            let scalar = match &value {
                GraphValue::Scalar(v) => v.clone(),
                GraphValue::Stream(_) => unreachable!("materialized above"),
            };
            let state_payload = self
                .state
                .lock()
                .await
                .as_ref()
                .map_or(Value::Null, |tv| tv.payload.clone());
            for branch in branches {
                let chosen = (branch.predicate)(&scalar, &state_payload);
                for dest in &chosen {
                    if !branch.destinations.contains(dest) {
                        tracing::warn!(
                            source = %source,
                            destination = %dest,
                            "branch chose a destination outside its declared set; skipping"
                        );
                        continue;
                    }
                    if !dests.contains(dest) {
                        dests.push(dest.clone());
                    }
                }
                if self.core.trigger == TriggerMode::AllPredecessor {
                    for dest in &branch.destinations {
                        if !chosen.contains(dest) && !dests.contains(dest) {
                            skips.push(dest.clone());
                        }
                    }
                }
            }
        }

        match value {
            GraphValue::Scalar(scalar) => {
                for dest in &dests {
                    self.push_envelope(dest, source.clone(), Envelope::Value(scalar.clone()));
                }
            }
            GraphValue::Stream(reader) => {
                let mut copies = reader.copy(dests.len().max(1));
                for dest in &dests {
                    let copy = copies.remove(0);
                    self.push_envelope(dest, source.clone(), Envelope::Stream(copy));
                }
            }
        }
        for dest in &skips {
            self.push_envelope(dest, source.clone(), Envelope::Skip);
        }
        Ok(())
    }

    fn push_envelope(&mut self, dest: &str, source: String, envelope: Envelope) {
        self.inboxes
            .entry(dest.to_string())
            .or_default()
            .push((source, envelope));
        self.fresh.insert(dest.to_string());
    }
}

/// Merge a node's fan-in and apply its input key.
fn assemble_input(
    node: &str,
    spec: &NodeSpec,
    entries: Vec<(String, Option<Value>)>,
) -> Result<Value, GraphError> {
    let values: Vec<Value> = entries.into_iter().filter_map(|(_, v)| v).collect();
    let mut input = merge_fan_in(node, values)?;
    if let Some(key) = &spec.input_key {
        input = input
            .get(key)
            .cloned()
            .ok_or_else(|| GraphError::node_failed(node, format!("input key `{key}` missing")))?;
    }
    Ok(input)
}

/// Run one node on its own task and normalize the outcome.
async fn execute_node(
    spec: Arc<NodeSpec>,
    input: Value,
    state: Arc<Mutex<Option<TypedValue>>>,
    nested: Option<PersistedRun>,
    env_callbacks: CallbackList,
    cancel: Option<watch::Receiver<bool>>,
) -> (String, TaskOutcome) {
    let node = spec.id.clone();
    let outcome = execute_node_inner(spec, input, state, nested, env_callbacks, cancel).await;
    (node, outcome)
}

async fn execute_node_inner(
    spec: Arc<NodeSpec>,
    mut input: Value,
    state: Arc<Mutex<Option<TypedValue>>>,
    nested: Option<PersistedRun>,
    env_callbacks: CallbackList,
    cancel: Option<watch::Receiver<bool>>,
) -> TaskOutcome {
    // A resumed sub-graph continues from its internal frontier; its input
    // boundary (and pre-handler) already ran on first entry.
    if nested.is_none() {
        if let Some(handler) = &spec.pre_handler {
            match apply_state_handler(&spec.id, handler, input, &state).await {
                Ok(updated) => input = updated,
                Err(err) => return TaskOutcome::Failure(err),
            }
        }
    }

    let mut output = match &spec.exec {
        NodeExec::Lambda(f) => match f(input).await {
            Ok(value) => GraphValue::Scalar(value),
            Err(GraphError::Interrupt(info)) => {
                return TaskOutcome::Rerun {
                    extra: info.rerun_nodes_extra.get(RERUN_SELF_KEY).cloned(),
                }
            }
            Err(err) => return TaskOutcome::Failure(err),
        },
        NodeExec::Stream(f) => match f(input).await {
            Ok(reader) => GraphValue::Stream(reader),
            Err(GraphError::Interrupt(info)) => {
                return TaskOutcome::Rerun {
                    extra: info.rerun_nodes_extra.get(RERUN_SELF_KEY).cloned(),
                }
            }
            Err(err) => return TaskOutcome::Failure(err),
        },
        NodeExec::SubGraph(child) => {
            let child_callbacks: CallbackList = env_callbacks
                .iter()
                .chain(child.callbacks.iter())
                .cloned()
                .collect();
            let child_input = if nested.is_some() { None } else { Some(input) };
            let env = RunEnv {
                callbacks: env_callbacks,
                cancel,
                resume: nested,
            };
            match run_graph(child.clone(), child_input, env).await {
                Ok(value) => value,
                Err(failure) => {
                    // The embedding wrapper reports the failed level a second
                    // time, matching the engine's error-accounting contract.
                    let child_info = RunInfo::graph(&child.name);
                    fire_error(&child_callbacks, &child_info, &failure.to_graph_error());
                    return match failure {
                        RunFailure::Interrupted { info, saved } => {
                            TaskOutcome::SubInterrupt { info, saved }
                        }
                        RunFailure::Error(err) => TaskOutcome::Failure(err),
                    };
                }
            }
        }
    };

    if let Some(handler) = &spec.post_handler {
        let scalar = match output.materialize().await {
            Ok(value) => value,
            Err(err) => return TaskOutcome::Failure(err),
        };
        match apply_state_handler(&spec.id, handler, scalar, &state).await {
            Ok(updated) => output = GraphValue::Scalar(updated),
            Err(err) => return TaskOutcome::Failure(err),
        }
    }

    if let Some(key) = &spec.output_key {
        let scalar = match output.materialize().await {
            Ok(value) => value,
            Err(err) => return TaskOutcome::Failure(err),
        };
        let mut wrapped = serde_json::Map::new();
        wrapped.insert(key.clone(), scalar);
        output = GraphValue::Scalar(Value::Object(wrapped));
    }

    TaskOutcome::Success(output)
}

async fn apply_state_handler(
    node: &str,
    handler: &crate::node::StateHandler,
    value: Value,
    state: &Arc<Mutex<Option<TypedValue>>>,
) -> Result<Value, GraphError> {
    let mut guard = state.lock().await;
    let Some(typed) = guard.as_mut() else {
        return Err(GraphError::node_failed(
            node,
            "state handler configured but the graph declares no local state",
        ));
    };
    let (new_value, new_state) = handler(value, typed.payload.clone())?;
    typed.payload = new_state;
    Ok(new_value)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
