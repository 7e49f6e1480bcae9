//! Single-producer / single-consumer event channel.
//!
//! [`async_iterator_pair`] returns the two ends together: the generator is
//! the write end, the iterator the read end. The producer conventionally
//! runs on its own task via [`spawn_event_producer`], which converts panics
//! into a terminal event with `err` set and always closes the generator.

use futures_util::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::event::AgentEvent;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Read end: yields items until the generator closes and drains.
#[derive(Debug)]
pub struct AsyncIterator<T> {
    rx: flume::Receiver<T>,
}

impl<T> AsyncIterator<T> {
    /// Next item, or `None` once the generator is closed and drained.
    /// Further calls keep returning `None`.
    pub async fn next(&self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    /// Drain every remaining item.
    pub async fn collect(self) -> Vec<T> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            items.push(item);
        }
        items
    }
}

/// Write end. The channel closes once every generator handle is dropped.
#[derive(Debug)]
pub struct AsyncGenerator<T> {
    tx: flume::Sender<T>,
}

impl<T> Clone for AsyncGenerator<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> AsyncGenerator<T> {
    /// Send one item; returns `false` when the consumer is gone.
    pub async fn send(&self, item: T) -> bool {
        self.tx.send_async(item).await.is_ok()
    }

    /// Close the channel; the iterator drains buffered items then ends.
    pub fn close(self) {}
}

/// Create a connected iterator/generator pair.
#[must_use]
pub fn async_iterator_pair<T>() -> (AsyncIterator<T>, AsyncGenerator<T>) {
    let (tx, rx) = flume::bounded(EVENT_CHANNEL_CAPACITY);
    (AsyncIterator { rx }, AsyncGenerator { tx })
}

/// Run an event producer on its own task.
///
/// A panic inside `producer` becomes a final [`AgentEvent`] with `err` set;
/// the generator closes in every case, so consumers always observe the end
/// of the stream.
pub fn spawn_event_producer<F>(agent_name: String, generator: AsyncGenerator<AgentEvent>, producer: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(producer).catch_unwind().await {
            let message = if let Some(text) = panic.downcast_ref::<&str>() {
                (*text).to_string()
            } else if let Some(text) = panic.downcast_ref::<String>() {
                text.clone()
            } else {
                "unknown panic payload".to_string()
            };
            let _ = generator
                .send(AgentEvent::error(&agent_name, format!("agent panicked: {message}")))
                .await;
        }
        generator.close();
    });
}
