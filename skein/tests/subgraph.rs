mod common;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde_json::{json, Value};

use common::{append, CountingCallbacks, StageState};
use skein::graph::{CallOptions, CompileOptions, Graph, NodeOptions};
use skein::interrupt::extract_interrupt_info;
use skein::runnable::Runnable;
use skein::types::TriggerMode;
use skein::InMemoryStore;

/// Three levels of nesting: `root` embeds `sub` as node "2"; `sub` embeds
/// `s_sub` as its own node "2". Interrupt policy pauses the middle graph
/// after "1" and "3" and before "4", and the innermost after "1".
fn nested_runnable(store: Arc<InMemoryStore>, trigger: TriggerMode) -> Runnable<String, String> {
    let s_sub = Graph::<String, String>::new()
        .with_local_state(StageState::default)
        .add_lambda_node("1", append("1"))
        .add_lambda_node_with(
            "2",
            append("2"),
            NodeOptions::new().with_state_pre_handler(
                |input: String, state: &mut StageState| Ok(format!("{input}{}", state.a)),
            ),
        )
        .add_edge("start", "1")
        .add_edge("1", "2")
        .add_edge("2", "end");

    let sub = Graph::<String, String>::new()
        .with_local_state(StageState::default)
        .add_lambda_node("1", append("1"))
        .add_graph_node_with(
            "2",
            s_sub,
            NodeOptions::new()
                .with_graph_compile_options(
                    CompileOptions::new().with_interrupt_after_nodes(["1"]),
                )
                .with_state_pre_handler(|input: String, state: &mut StageState| {
                    Ok(format!("{input}{}", state.a))
                })
                .with_output_key("2"),
        )
        .add_lambda_node_with("3", append("3"), NodeOptions::new().with_output_key("3"))
        .add_lambda_node_with(
            "4",
            |input: FxHashMap<String, Value>| async move {
                let part = |key: &str| {
                    input
                        .get(key)
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string()
                };
                Ok(format!("{}4\n{}4\n{}4\n", part("2"), part("3"), part("state")))
            },
            NodeOptions::new().with_state_pre_handler(
                |mut input: FxHashMap<String, Value>, state: &mut StageState| {
                    input.insert("state".to_string(), Value::String(state.a.clone()));
                    Ok(input)
                },
            ),
        )
        .add_edge("start", "1")
        .add_edge("1", "2")
        .add_edge("1", "3")
        .add_edge("3", "4")
        .add_edge("2", "4")
        .add_edge("4", "end");

    Graph::<String, String>::new()
        .add_lambda_node("1", append("1"))
        .add_graph_node_with(
            "2",
            sub,
            NodeOptions::new().with_graph_compile_options(
                CompileOptions::new()
                    .with_interrupt_after_nodes(["1", "3"])
                    .with_interrupt_before_nodes(["4"]),
            ),
        )
        .add_lambda_node("3", append("3"))
        .add_edge("start", "1")
        .add_edge("1", "2")
        .add_edge("2", "3")
        .add_edge("3", "end")
        .compile(
            CompileOptions::new()
                .with_checkpoint_store(store)
                .with_graph_name("root")
                .with_node_trigger_mode(trigger),
        )
        .unwrap()
}

const FINAL_OUTPUT: &str = "start11state1state24\nstart1134\nstate24\n3";

async fn nested_interrupt_sequence(trigger: TriggerMode) {
    common::init_tracing();
    let store = Arc::new(InMemoryStore::new());
    let runnable = nested_runnable(store, trigger);
    let counter = Arc::new(CountingCallbacks::default());
    let opts = || {
        CallOptions::new()
            .with_checkpoint_id("1")
            .with_callbacks(counter.clone())
    };

    // Attempt 1: the middle graph pauses after its node "1".
    let err = runnable.invoke("start".to_string(), opts()).await.unwrap_err();
    let info = extract_interrupt_info(&err).expect("interrupt info");
    assert!(info.state.is_none());
    let middle = &info.sub_graphs["2"];
    assert_eq!(middle.after_nodes, vec!["1".to_string()]);
    assert!(middle.before_nodes.is_empty());
    assert_eq!(middle.state.as_ref().unwrap().payload, json!({"a": ""}));
    assert!(middle.sub_graphs.is_empty());

    let ctx = &info.interrupt_contexts[0];
    assert_eq!(ctx.id, "runnable:root;node:2");
    assert!(ctx.is_root_cause);
    assert_eq!(ctx.parent.as_ref().unwrap().id, "runnable:root");

    // Attempt 2: the innermost graph pauses after its "1" while the middle
    // graph also pauses after "3".
    let err = runnable
        .invoke(
            "start".to_string(),
            opts().with_resume_data(ctx.id.clone(), StageState { a: "state".into() }),
        )
        .await
        .unwrap_err();
    let info = extract_interrupt_info(&err).expect("interrupt info");
    let middle = &info.sub_graphs["2"];
    assert_eq!(middle.after_nodes, vec!["3".to_string()]);
    assert_eq!(middle.state.as_ref().unwrap().payload, json!({"a": "state"}));
    let innermost = &middle.sub_graphs["2"];
    assert_eq!(innermost.after_nodes, vec!["1".to_string()]);
    assert_eq!(innermost.state.as_ref().unwrap().payload, json!({"a": ""}));

    let ctx = &info.interrupt_contexts[0];
    assert_eq!(ctx.id, "runnable:root;node:2;node:2");
    assert!(ctx.is_root_cause);
    let parent = ctx.parent.as_ref().unwrap();
    assert_eq!(parent.id, "runnable:root;node:2");
    assert_eq!(parent.info.as_ref().unwrap().payload, json!({"a": "state"}));
    assert_eq!(parent.parent.as_ref().unwrap().id, "runnable:root");

    // Attempt 3: the middle graph pauses before "4".
    let err = runnable
        .invoke(
            "start".to_string(),
            opts().with_resume_data(ctx.id.clone(), StageState { a: "state".into() }),
        )
        .await
        .unwrap_err();
    let info = extract_interrupt_info(&err).expect("interrupt info");
    let middle = &info.sub_graphs["2"];
    assert_eq!(middle.before_nodes, vec!["4".to_string()]);
    assert!(middle.after_nodes.is_empty());
    assert_eq!(middle.state.as_ref().unwrap().payload, json!({"a": "state"}));
    assert!(middle.sub_graphs.is_empty());

    let ctx = &info.interrupt_contexts[0];
    assert_eq!(ctx.id, "runnable:root;node:2");
    assert!(ctx.is_root_cause);

    // Attempt 4 completes.
    let result = runnable
        .invoke(
            "start".to_string(),
            opts().with_resume_data(ctx.id.clone(), StageState { a: "state2".into() }),
        )
        .await
        .unwrap();
    assert_eq!(result, FINAL_OUTPUT);

    // Callback accounting across the four attempts: one start per entered
    // graph level, one end per completed level, two errors per failed level.
    assert_eq!(counter.started(), 10);
    assert_eq!(counter.ended(), 3);
    assert_eq!(counter.errored(), 14);
}

#[tokio::test]
async fn nested_interrupts_pregel_mode() {
    nested_interrupt_sequence(TriggerMode::AnyPredecessor).await;
}

#[tokio::test]
async fn nested_interrupts_dag_mode() {
    nested_interrupt_sequence(TriggerMode::AllPredecessor).await;
}

#[tokio::test]
async fn addresses_form_a_prefix_closed_tree() {
    let store = Arc::new(InMemoryStore::new());
    let runnable = nested_runnable(store, TriggerMode::AnyPredecessor);

    let err = runnable
        .invoke(
            "start".to_string(),
            CallOptions::new().with_checkpoint_id("t"),
        )
        .await
        .unwrap_err();
    let info = extract_interrupt_info(&err).expect("interrupt info");
    for ctx in &info.interrupt_contexts {
        let mut current = ctx;
        while let Some(parent) = &current.parent {
            assert!(current.address.starts_with(&parent.address));
            assert!(parent.address.len() < current.address.len());
            current = parent;
        }
    }
    // Exactly one root cause in this scenario.
    let root_causes = info
        .interrupt_contexts
        .iter()
        .filter(|ctx| ctx.is_root_cause)
        .count();
    assert_eq!(root_causes, 1);
}
