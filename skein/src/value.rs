//! Erased value interchange between nodes.
//!
//! Typed node functions are erased through serde at the graph boundary;
//! inside the engine every payload is either a scalar [`serde_json::Value`]
//! or a stream of such values. Fan-in merging and stream concatenation
//! rules live here.

use serde_json::Value;

use crate::error::GraphError;
use crate::stream::{StreamError, StreamReader};

/// A value travelling along a graph edge.
#[derive(Debug)]
pub enum GraphValue {
    /// A complete value.
    Scalar(Value),
    /// A stream of chunks, concatenable per [`concat_chunks`].
    Stream(StreamReader<Value>),
}

impl GraphValue {
    /// Resolve to a scalar, concatenating stream chunks if necessary.
    pub async fn materialize(self) -> Result<Value, GraphError> {
        match self {
            GraphValue::Scalar(value) => Ok(value),
            GraphValue::Stream(reader) => match reader.collect().await {
                Ok(chunks) => Ok(concat_chunks(chunks)),
                Err(StreamError::Closed) => Ok(Value::Null),
                Err(err) => Err(GraphError::Stream(err)),
            },
        }
    }
}

impl From<Value> for GraphValue {
    fn from(value: Value) -> Self {
        GraphValue::Scalar(value)
    }
}

/// Concatenate stream chunks into one scalar.
///
/// The default merge rule: strings concatenate, arrays concatenate, objects
/// merge by key (later keys win); for anything else the last chunk wins.
#[must_use]
pub fn concat_chunks(chunks: Vec<Value>) -> Value {
    let mut chunks = chunks.into_iter();
    let Some(first) = chunks.next() else {
        return Value::Null;
    };
    let mut acc = first;
    for chunk in chunks {
        acc = match (acc, chunk) {
            (Value::String(mut a), Value::String(b)) => {
                a.push_str(&b);
                Value::String(a)
            }
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Value::Array(a)
            }
            (Value::Object(mut a), Value::Object(b)) => {
                for (k, v) in b {
                    a.insert(k, v);
                }
                Value::Object(a)
            }
            (_, replacement) => replacement,
        };
    }
    acc
}

/// Merge the fan-in values delivered to one node.
///
/// A single value passes through untouched. Multiple values must all be
/// JSON objects (producers wrap their output with an output-key); they merge
/// by key, and a key collision is a runtime error.
pub fn merge_fan_in(node: &str, values: Vec<Value>) -> Result<Value, GraphError> {
    if values.len() <= 1 {
        return Ok(values.into_iter().next().unwrap_or(Value::Null));
    }
    let all_objects = values.iter().all(Value::is_object);
    if !all_objects {
        // Heterogeneous fan-in of plain strings degrades to concatenation,
        // matching the stream merge rule.
        if values.iter().all(Value::is_string) {
            return Ok(concat_chunks(values));
        }
        return Err(GraphError::NodeRun {
            node: node.to_string(),
            message: "fan-in requires every predecessor to declare an output key".to_string(),
        });
    }
    let mut merged = serde_json::Map::new();
    for value in values {
        let Value::Object(map) = value else {
            unreachable!("checked all_objects above")
        };
        for (key, item) in map {
            if merged.insert(key.clone(), item).is_some() {
                return Err(GraphError::NodeRun {
                    node: node.to_string(),
                    message: format!("fan-in output key collision on `{key}`"),
                });
            }
        }
    }
    Ok(Value::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_chunks_concatenate() {
        let chunks = vec![json!("he"), json!("llo")];
        assert_eq!(concat_chunks(chunks), json!("hello"));
    }

    #[test]
    fn object_chunks_merge_by_key() {
        let chunks = vec![json!({"a": 1}), json!({"b": 2})];
        assert_eq!(concat_chunks(chunks), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn fan_in_single_value_passes_through() {
        assert_eq!(
            merge_fan_in("n", vec![json!("only")]).unwrap(),
            json!("only")
        );
    }

    #[test]
    fn fan_in_merges_keyed_objects() {
        let merged = merge_fan_in("n", vec![json!({"x": 1}), json!({"y": 2})]).unwrap();
        assert_eq!(merged, json!({"x": 1, "y": 2}));
    }

    #[test]
    fn fan_in_rejects_key_collision() {
        let err = merge_fan_in("n", vec![json!({"x": 1}), json!({"x": 2})]).unwrap_err();
        assert!(err.to_string().contains("collision"));
    }
}
