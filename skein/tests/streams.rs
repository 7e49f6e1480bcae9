mod common;

use skein::graph::{CallOptions, CompileOptions, Graph};
use skein::stream::StreamReader;

fn chunker() -> Graph<String, String> {
    Graph::<String, String>::new().add_stream_node("chunks", |input: String| async move {
        let parts: Vec<String> = input.chars().map(|c| c.to_string()).collect();
        Ok(StreamReader::from_items(parts))
    })
}

#[tokio::test]
async fn stream_node_output_reaches_the_caller_chunk_by_chunk() {
    let runnable = chunker()
        .add_edge("start", "chunks")
        .add_edge("chunks", "end")
        .compile(CompileOptions::new())
        .unwrap();

    let chunks = runnable
        .stream("hey".to_string(), CallOptions::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(chunks, vec!["h".to_string(), "e".to_string(), "y".to_string()]);
}

#[tokio::test]
async fn invoke_equals_concatenated_stream() {
    let runnable = chunker()
        .add_edge("start", "chunks")
        .add_edge("chunks", "end")
        .compile(CompileOptions::new())
        .unwrap();

    let invoked = runnable
        .invoke("hello".to_string(), CallOptions::new())
        .await
        .unwrap();
    let streamed: String = runnable
        .stream("hello".to_string(), CallOptions::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap()
        .concat();
    assert_eq!(invoked, streamed);
    assert_eq!(invoked, "hello");
}

#[tokio::test]
async fn unary_consumer_concatenates_upstream_stream() {
    let runnable = chunker()
        .add_lambda_node("upper", |input: String| async move { Ok(input.to_uppercase()) })
        .add_edge("start", "chunks")
        .add_edge("chunks", "upper")
        .add_edge("upper", "end")
        .compile(CompileOptions::new())
        .unwrap();

    let out = runnable
        .invoke("abc".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "ABC");
}

#[tokio::test]
async fn scalar_output_streams_as_a_single_chunk() {
    let runnable = Graph::<String, String>::new()
        .add_lambda_node("id", |input: String| async move { Ok(input) })
        .add_edge("start", "id")
        .add_edge("id", "end")
        .compile(CompileOptions::new())
        .unwrap();

    let chunks = runnable
        .stream("solo".to_string(), CallOptions::new())
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert_eq!(chunks, vec!["solo".to_string()]);
}

#[tokio::test]
async fn stream_fans_out_to_parallel_consumers() {
    let runnable = chunker()
        .add_lambda_node_with(
            "upper",
            |input: String| async move { Ok(input.to_uppercase()) },
            skein::graph::NodeOptions::new().with_output_key("upper"),
        )
        .add_lambda_node_with(
            "tagged",
            |input: String| async move { Ok(format!("<{input}>")) },
            skein::graph::NodeOptions::new().with_output_key("tagged"),
        )
        .add_lambda_node("join", |input: rustc_hash::FxHashMap<String, serde_json::Value>| async move {
            let upper = input["upper"].as_str().unwrap_or_default();
            let tagged = input["tagged"].as_str().unwrap_or_default();
            Ok(format!("{upper}|{tagged}"))
        })
        .add_edge("start", "chunks")
        .add_edge("chunks", "upper")
        .add_edge("chunks", "tagged")
        .add_edge("upper", "join")
        .add_edge("tagged", "join")
        .add_edge("join", "end")
        .compile(CompileOptions::new())
        .unwrap();

    // Each consumer sees the full chunk sequence through its own copy.
    let out = runnable
        .invoke("ab".to_string(), CallOptions::new())
        .await
        .unwrap();
    assert_eq!(out, "AB|<ab>");
}
