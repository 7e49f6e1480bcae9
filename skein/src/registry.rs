//! Process-wide type registry for checkpoint payloads.
//!
//! Checkpoints persist user state and custom payloads as self-describing
//! `{type_name, payload}` pairs. The registry binds stable string names to
//! concrete Rust types so that payloads can be validated when a checkpoint
//! is decoded: an unknown name, or a payload that no longer round-trips
//! through its registered type, fails the load with
//! [`CheckpointError::DecodeFailed`](crate::checkpoint::CheckpointError).
//!
//! The registry is append-only and global to the process; register types
//! once at startup (or lazily behind a `OnceLock`) before running graphs
//! that checkpoint them.
//!
//! ```rust
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize)]
//! struct ReviewState {
//!     approved: bool,
//! }
//!
//! skein::registry::register::<ReviewState>();
//! assert!(skein::registry::name_of::<ReviewState>().is_some());
//! ```

use std::any::TypeId;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A value tagged with the registered name of its concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypedValue {
    pub type_name: String,
    pub payload: Value,
}

impl TypedValue {
    /// Tag `payload` with `type_name` without consulting the registry.
    #[must_use]
    pub fn new(type_name: impl Into<String>, payload: Value) -> Self {
        Self {
            type_name: type_name.into(),
            payload,
        }
    }
}

type DecodeCheck = fn(&Value) -> Result<(), String>;

struct Registry {
    by_name: FxHashMap<String, DecodeCheck>,
    names: FxHashMap<TypeId, String>,
}

fn registry() -> &'static RwLock<Registry> {
    static REGISTRY: std::sync::OnceLock<RwLock<Registry>> = std::sync::OnceLock::new();
    REGISTRY.get_or_init(|| {
        RwLock::new(Registry {
            by_name: FxHashMap::default(),
            names: FxHashMap::default(),
        })
    })
}

fn decode_check_for<T: Serialize + DeserializeOwned>(payload: &Value) -> Result<(), String> {
    serde_json::from_value::<T>(payload.clone())
        .map(|_| ())
        .map_err(|err| err.to_string())
}

/// Register `T` under its auto-derived name (`std::any::type_name`).
pub fn register<T>()
where
    T: Serialize + DeserializeOwned + 'static,
{
    register_name::<T>(std::any::type_name::<T>());
}

/// Register `T` under an explicit stable name.
///
/// Re-registering the same type or name is a no-op; the registry is
/// append-only.
pub fn register_name<T>(name: impl Into<String>)
where
    T: Serialize + DeserializeOwned + 'static,
{
    let name = name.into();
    let mut guard = registry().write();
    guard
        .by_name
        .entry(name.clone())
        .or_insert(decode_check_for::<T>);
    guard.names.entry(TypeId::of::<T>()).or_insert(name);
}

/// The name `T` was registered under, if any.
#[must_use]
pub fn name_of<T: 'static>() -> Option<String> {
    registry().read().names.get(&TypeId::of::<T>()).cloned()
}

/// Returns `true` when `name` is a registered type name.
#[must_use]
pub fn is_registered(name: &str) -> bool {
    registry().read().by_name.contains_key(name)
}

/// Validate a persisted payload against its registered type.
///
/// `Err(None)` means the name is unknown; `Err(Some(reason))` means the
/// payload failed to round-trip through the registered type.
pub fn decode_check(value: &TypedValue) -> Result<(), Option<String>> {
    let guard = registry().read();
    match guard.by_name.get(&value.type_name) {
        Some(check) => check(&value.payload).map_err(Some),
        None => Err(None),
    }
}

/// Build a [`TypedValue`] from a registered `T`.
///
/// Returns `None` when `T` has not been registered.
pub fn encode<T>(value: &T) -> Option<TypedValue>
where
    T: Serialize + 'static,
{
    let type_name = name_of::<T>()?;
    let payload = serde_json::to_value(value).ok()?;
    Some(TypedValue { type_name, payload })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        a: String,
    }

    #[test]
    fn register_and_encode() {
        register_name::<Sample>("tests.sample");
        let typed = encode(&Sample { a: "x".into() }).unwrap();
        assert_eq!(typed.type_name, "tests.sample");
        assert!(decode_check(&typed).is_ok());
    }

    #[test]
    fn unknown_name_fails_decode() {
        let typed = TypedValue::new("tests.never_registered", serde_json::json!({}));
        assert_eq!(decode_check(&typed), Err(None));
    }

    #[test]
    fn bad_payload_fails_decode() {
        register_name::<Sample>("tests.sample_strict");
        let typed = TypedValue::new("tests.sample_strict", serde_json::json!({"a": 7}));
        assert!(matches!(decode_check(&typed), Err(Some(_))));
    }
}
