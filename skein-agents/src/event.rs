//! Agent events: the unit produced by every agent run.
//!
//! An [`AgentEvent`] carries an optional message output, an optional action
//! (exit, transfer, interruption), and an optional error. Interrupt
//! propagation distinguishes two levels: `interrupted` is the user-visible
//! action, while `internal_interrupted` travels only between runtime layers
//! and is lifted into a composite interrupt (or dropped) before any event
//! reaches a user iterator.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use skein::registry::TypedValue;
use skein::stream::StreamReader;

use crate::message::Message;

/// A message output that is either complete or streaming.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageVariant {
    pub is_streaming: bool,
    /// The complete message; `None` while streaming.
    pub message: Option<Message>,
    /// The chunk stream; shared so copied events see the same source.
    #[serde(skip)]
    pub stream: Option<SharedMessageStream>,
    pub role: String,
}

impl MessageVariant {
    /// A complete (non-streaming) message output.
    #[must_use]
    pub fn complete(message: Message) -> Self {
        let role = message.role.clone();
        Self {
            is_streaming: false,
            message: Some(message),
            stream: None,
            role,
        }
    }

    /// A streaming message output with the given role.
    #[must_use]
    pub fn streaming(stream: StreamReader<Message>, role: &str) -> Self {
        Self {
            is_streaming: true,
            message: None,
            stream: Some(SharedMessageStream::new(stream)),
            role: role.to_string(),
        }
    }

    /// Resolve to a complete message, concatenating stream chunks.
    pub async fn materialize(&self) -> Option<Message> {
        if let Some(message) = &self.message {
            return Some(message.clone());
        }
        let stream = self.stream.as_ref()?.take()?;
        let chunks = stream.collect().await.ok()?;
        let mut content = String::new();
        let mut role = self.role.clone();
        for chunk in chunks {
            content.push_str(&chunk.content);
            if !chunk.role.is_empty() {
                role = chunk.role;
            }
        }
        Some(Message::new(&role, &content))
    }
}

/// A message stream shared between an event and its copies.
///
/// The `automatic_close` mark prevents double-closing when an event is
/// mirrored into a parent session: whichever holder drains the stream wins,
/// the other observes it already taken.
#[derive(Clone, Debug)]
pub struct SharedMessageStream {
    inner: Arc<Mutex<Option<StreamReader<Message>>>>,
    automatic_close: Arc<AtomicBool>,
}

impl PartialEq for SharedMessageStream {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
            && Arc::ptr_eq(&self.automatic_close, &other.automatic_close)
    }
}

impl SharedMessageStream {
    #[must_use]
    pub fn new(stream: StreamReader<Message>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(stream))),
            automatic_close: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Take the underlying reader; `None` if already taken elsewhere.
    #[must_use]
    pub fn take(&self) -> Option<StreamReader<Message>> {
        self.inner.lock().take()
    }

    pub fn set_automatic_close(&self) {
        self.automatic_close.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn automatic_close(&self) -> bool {
        self.automatic_close.load(Ordering::Relaxed)
    }
}

/// The message payload of an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentOutput {
    pub message_output: MessageVariant,
}

/// Hand-off target of a transfer action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferToAgent {
    pub dest_agent_name: String,
}

/// A (possibly nested) agent-level interrupt.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentInterrupt {
    pub reason: String,
    /// Runtime state to restore on resume, registry-tagged.
    pub state: Option<TypedValue>,
    /// The interrupt this one wraps, one level down.
    pub inner: Option<Box<AgentInterrupt>>,
}

impl AgentInterrupt {
    #[must_use]
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            state: None,
            inner: None,
        }
    }

    /// The deepest wrapped interrupt (the root cause).
    #[must_use]
    pub fn root_cause(&self) -> &AgentInterrupt {
        match &self.inner {
            Some(inner) => inner.root_cause(),
            None => self,
        }
    }
}

/// Control action attached to an event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentAction {
    /// Terminate the whole run.
    pub exit: bool,
    /// User-visible interruption; the run can be resumed.
    pub interrupted: Option<AgentInterrupt>,
    /// Runtime-internal interruption. Never delivered to user iterators:
    /// an enclosing wrapper lifts it into a composite interrupt, or drops
    /// it when the run continues.
    pub internal_interrupted: Option<AgentInterrupt>,
    /// Hand control to another agent.
    pub transfer_to_agent: Option<TransferToAgent>,
}

impl AgentAction {
    #[must_use]
    pub fn exit() -> Self {
        Self {
            exit: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn transfer(dest_agent_name: impl Into<String>) -> Self {
        Self {
            transfer_to_agent: Some(TransferToAgent {
                dest_agent_name: dest_agent_name.into(),
            }),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn interrupted(interrupt: AgentInterrupt) -> Self {
        Self {
            interrupted: Some(interrupt),
            ..Default::default()
        }
    }

    pub(crate) fn internal_interrupted(interrupt: AgentInterrupt) -> Self {
        Self {
            internal_interrupted: Some(interrupt),
            ..Default::default()
        }
    }
}

/// Unit produced by agents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    pub agent_name: String,
    pub output: Option<AgentOutput>,
    pub action: Option<AgentAction>,
    pub err: Option<String>,
}

impl AgentEvent {
    /// An event wrapping a complete message.
    #[must_use]
    pub fn from_message(agent_name: &str, message: Message) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            output: Some(AgentOutput {
                message_output: MessageVariant::complete(message),
            }),
            action: None,
            err: None,
        }
    }

    /// An event carrying only an action.
    #[must_use]
    pub fn from_action(agent_name: &str, action: AgentAction) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            output: None,
            action: Some(action),
            err: None,
        }
    }

    /// A terminal error event.
    #[must_use]
    pub fn error(agent_name: &str, message: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            output: None,
            action: None,
            err: Some(message.into()),
        }
    }

    /// Returns `true` when the event ends the run for user consumers.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.err.is_some()
            || self
                .action
                .as_ref()
                .is_some_and(|a| a.exit || a.interrupted.is_some())
    }

    #[must_use]
    pub fn interrupted(&self) -> Option<&AgentInterrupt> {
        self.action.as_ref()?.interrupted.as_ref()
    }

    pub(crate) fn internal_interrupt(&self) -> Option<&AgentInterrupt> {
        self.action.as_ref()?.internal_interrupted.as_ref()
    }

    /// Mark any stream carried by this event as automatically closed.
    pub fn set_automatic_close(&self) {
        if let Some(output) = &self.output {
            if let Some(stream) = &output.message_output.stream {
                stream.set_automatic_close();
            }
        }
    }
}

/// Build the user-visible composite interrupt emitted when a wrapper lifts
/// an internal interrupt: `state` restores the wrapper layer, `inner` is
/// the wrapped interrupt chain.
#[must_use]
pub fn composite_interrupt(
    agent_name: &str,
    reason: impl Into<String>,
    state: TypedValue,
    inner: AgentInterrupt,
) -> AgentEvent {
    AgentEvent::from_action(
        agent_name,
        AgentAction::interrupted(AgentInterrupt {
            reason: reason.into(),
            state: Some(state),
            inner: Some(Box::new(inner)),
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_detection() {
        assert!(AgentEvent::error("a", "boom").is_terminal());
        assert!(AgentEvent::from_action("a", AgentAction::exit()).is_terminal());
        assert!(!AgentEvent::from_message("a", Message::assistant("hi")).is_terminal());
        let internal = AgentEvent::from_action(
            "a",
            AgentAction::internal_interrupted(AgentInterrupt::new("inner pause")),
        );
        // Internal interruptions are not user-terminal.
        assert!(!internal.is_terminal());
    }

    #[test]
    fn root_cause_walks_the_chain() {
        let leaf = AgentInterrupt::new("leaf");
        let mid = AgentInterrupt {
            reason: "mid".into(),
            state: None,
            inner: Some(Box::new(leaf)),
        };
        assert_eq!(mid.root_cause().reason, "leaf");
    }

    #[tokio::test]
    async fn streaming_variant_materializes_by_concatenation() {
        let chunks = StreamReader::from_items(vec![
            Message::assistant("Hel"),
            Message::assistant("lo"),
        ]);
        let variant = MessageVariant::streaming(chunks, Message::ASSISTANT);
        let message = variant.materialize().await.unwrap();
        assert_eq!(message.content, "Hello");
        // A second materialize observes the stream already taken.
        assert!(variant.materialize().await.is_none());
    }
}
