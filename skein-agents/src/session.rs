//! Per-run session state and the ambient run context.
//!
//! One root [`Session`] exists per run: a shared `Values` map guarded by a
//! mutex, plus an append-only event log. A sub-run may be given an
//! *isolated* session: it shares the `Values` storage (same pointer, same
//! mutex) but gets its own event list, so writes to values are visible
//! across the family while event logs stay separate.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::agent::AgentInput;
use crate::event::AgentEvent;

type SharedValues = Arc<Mutex<FxHashMap<String, Value>>>;

/// Shared per-run state: values and the event log.
#[derive(Debug, Default)]
pub struct Session {
    values: SharedValues,
    events: Mutex<Vec<AgentEvent>>,
}

impl Session {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// An isolated child: shared values storage, fresh event list.
    #[must_use]
    pub fn isolated(self: &Arc<Self>) -> Arc<Session> {
        Arc::new(Session {
            values: self.values.clone(),
            events: Mutex::new(Vec::new()),
        })
    }

    /// An isolated child pre-seeded with a saved event list (used when a
    /// paused sub-run re-enters).
    #[must_use]
    pub fn isolated_with_events(self: &Arc<Self>, events: Vec<AgentEvent>) -> Arc<Session> {
        Arc::new(Session {
            values: self.values.clone(),
            events: Mutex::new(events),
        })
    }

    #[must_use]
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.values.lock().get(key).cloned()
    }

    pub fn set_value(&self, key: impl Into<String>, value: Value) {
        self.values.lock().insert(key.into(), value);
    }

    pub fn set_values(&self, values: FxHashMap<String, Value>) {
        self.values.lock().extend(values);
    }

    pub fn add_event(&self, event: AgentEvent) {
        self.events.lock().push(event);
    }

    /// Snapshot of the event log.
    #[must_use]
    pub fn events(&self) -> Vec<AgentEvent> {
        self.events.lock().clone()
    }
}

/// Ambient context carried through one run.
#[derive(Clone)]
pub struct RunContext {
    pub session: Arc<Session>,
    pub root_input: Arc<AgentInput>,
    /// Names of the agents traversed to reach the current one.
    pub run_path: Vec<String>,
    /// Options addressed to tools invoked during this run.
    tool_options: Arc<FxHashMap<String, Value>>,
}

impl RunContext {
    #[must_use]
    pub fn new(session: Arc<Session>, root_input: AgentInput) -> Self {
        Self {
            session,
            root_input: Arc::new(root_input),
            run_path: Vec::new(),
            tool_options: Arc::new(FxHashMap::default()),
        }
    }

    /// Attach tool options; they travel with every derived context.
    #[must_use]
    pub fn with_tool_options(mut self, options: FxHashMap<String, Value>) -> Self {
        self.tool_options = Arc::new(options);
        self
    }

    /// Look up one tool option by name.
    #[must_use]
    pub fn tool_option(&self, name: &str) -> Option<&Value> {
        self.tool_options.get(name)
    }

    /// The context handed to a sub-agent: same session, extended path.
    #[must_use]
    pub fn descend(&self, agent_name: &str) -> Self {
        let mut next = self.clone();
        next.run_path.push(agent_name.to_string());
        next
    }

    /// Swap in an isolated session, keeping root input and path.
    #[must_use]
    pub fn with_isolated_session(&self) -> Self {
        let mut next = self.clone();
        next.session = self.session.isolated();
        next
    }

    /// Swap in an isolated session pre-seeded with saved events.
    #[must_use]
    pub fn with_isolated_session_events(&self, events: Vec<AgentEvent>) -> Self {
        let mut next = self.clone();
        next.session = self.session.isolated_with_events(events);
        next
    }

    #[must_use]
    pub fn get_session_value(&self, key: &str) -> Option<Value> {
        self.session.get_value(key)
    }

    pub fn set_session_value(&self, key: impl Into<String>, value: Value) {
        self.session.set_value(key, value);
    }

    pub fn add_event(&self, event: AgentEvent) {
        self.session.add_event(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use serde_json::json;

    #[test]
    fn isolated_sessions_share_values_but_not_events() {
        let parent = Session::new();
        parent.set_value("k", json!("parent"));
        let child = parent.isolated();

        // Value writes are visible both ways.
        assert_eq!(child.get_value("k"), Some(json!("parent")));
        child.set_value("k2", json!("child"));
        assert_eq!(parent.get_value("k2"), Some(json!("child")));

        // Event logs are independent.
        child.add_event(AgentEvent::from_message("c", Message::assistant("hi")));
        assert_eq!(child.events().len(), 1);
        assert!(parent.events().is_empty());
    }

    #[test]
    fn descend_extends_run_path() {
        let ctx = RunContext::new(Session::new(), AgentInput::default());
        let deeper = ctx.descend("router").descend("writer");
        assert_eq!(deeper.run_path, vec!["router", "writer"]);
        assert!(ctx.run_path.is_empty());
    }
}
