mod common;

use rustc_hash::FxHashMap;
use serde_json::Value;

use common::{append, StageState};
use skein::graph::{CallOptions, CompileOptions, Graph, NodeOptions};
use skein::types::TriggerMode;

fn join_node(input: FxHashMap<String, Value>) -> impl std::future::Future<Output = Result<String, skein::GraphError>> {
    async move {
        let mut keys: Vec<&String> = input.keys().collect();
        keys.sort();
        let mut out = String::new();
        for key in keys {
            if let Some(text) = input[key].as_str() {
                out.push_str(text);
            }
        }
        Ok(out)
    }
}

#[tokio::test]
async fn pregel_branch_loops_until_predicate_routes_to_end() {
    let runnable = Graph::<String, String>::new()
        .add_lambda_node("grow", append("x"))
        .add_branch(
            "grow",
            |value: &String, _state| {
                if value.len() < 5 {
                    vec!["grow".to_string()]
                } else {
                    vec!["end".to_string()]
                }
            },
            vec!["grow", "end"],
        )
        .add_edge("start", "grow")
        .compile(CompileOptions::new().with_graph_name("looper"))
        .unwrap();

    let out = runnable
        .invoke(String::new(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "xxxxx");
}

#[tokio::test]
async fn pregel_merges_same_superstep_fan_in() {
    let runnable = Graph::<String, String>::new()
        .add_lambda_node_with("a", append("A"), NodeOptions::new().with_output_key("a"))
        .add_lambda_node_with("b", append("B"), NodeOptions::new().with_output_key("b"))
        .add_lambda_node("join", join_node)
        .add_edge("start", "a")
        .add_edge("start", "b")
        .add_edge("a", "join")
        .add_edge("b", "join")
        .add_edge("join", "end")
        .compile(CompileOptions::new())
        .unwrap();

    // Both fan-in values arrive at the same barrier, so the join fires once
    // with the merged map.
    let out = runnable
        .invoke("v".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "vAvB");
}

#[tokio::test]
async fn dag_join_waits_for_all_predecessors() {
    let runnable = Graph::<String, String>::new()
        .add_lambda_node_with("fast", append("F"), NodeOptions::new().with_output_key("fast"))
        .add_lambda_node_with("slow1", append("S"), NodeOptions::new().with_output_key("s1"))
        .add_lambda_node_with(
            "slow2",
            |input: FxHashMap<String, Value>| async move {
                let text = input["s1"].as_str().unwrap_or_default();
                Ok(format!("{text}S"))
            },
            NodeOptions::new().with_output_key("slow"),
        )
        .add_lambda_node("join", join_node)
        .add_edge("start", "fast")
        .add_edge("start", "slow1")
        .add_edge("slow1", "slow2")
        .add_edge("fast", "join")
        .add_edge("slow2", "join")
        .add_edge("join", "end")
        .compile(CompileOptions::new().with_node_trigger_mode(TriggerMode::AllPredecessor))
        .unwrap();

    // The join fires exactly once, after both the short and the long path.
    let out = runnable
        .invoke("v".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "vFvSS");
}

#[tokio::test]
async fn dag_branch_skips_propagate_through_unchosen_paths() {
    let runnable = Graph::<String, String>::new()
        .add_lambda_node("src", append(""))
        .add_lambda_node_with("left", append("L"), NodeOptions::new().with_output_key("left"))
        .add_lambda_node_with("right", append("R"), NodeOptions::new().with_output_key("right"))
        .add_lambda_node("join", join_node)
        .add_branch(
            "src",
            |_value: &String, _state| vec!["left".to_string()],
            vec!["left", "right"],
        )
        .add_edge("start", "src")
        .add_edge("left", "join")
        .add_edge("right", "join")
        .add_edge("join", "end")
        .compile(CompileOptions::new().with_node_trigger_mode(TriggerMode::AllPredecessor))
        .unwrap();

    // `right` is skipped; the skip reaches the join so it still fires.
    let out = runnable
        .invoke("v".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "vL");
}

#[tokio::test]
async fn branch_predicate_observes_local_state() {
    let runnable = Graph::<String, String>::new()
        .with_local_state(|| StageState { a: "short".into() })
        .add_lambda_node("probe", append(""))
        .add_lambda_node("short", append("-short"))
        .add_lambda_node("long", append("-long"))
        .add_branch(
            "probe",
            |_value: &String, state| {
                let mode = state
                    .get("a")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                vec![mode]
            },
            vec!["short", "long"],
        )
        .add_edge("start", "probe")
        .add_edge("short", "end")
        .add_edge("long", "end")
        .compile(CompileOptions::new())
        .unwrap();

    let out = runnable
        .invoke("v".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "v-short");
}
