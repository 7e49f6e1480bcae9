//! Bounded stream pipe with copy and merge semantics.
//!
//! A [`StreamWriter`]/[`StreamReader`] pair forms a typed producer/consumer
//! pipe backed by a bounded flume channel. It backs both user-visible
//! streaming outputs and the scheduler's internal fan-out.
//!
//! Contract:
//! - `send` blocks (asynchronously) when the buffer is full;
//! - dropping or [`close`](StreamWriter::close)-ing the writer ends the
//!   stream; readers drain buffered items and then observe
//!   [`StreamError::Closed`], the EOF sentinel;
//! - [`close_with_error`](StreamWriter::close_with_error) delivers a
//!   terminal error instead of a clean EOF;
//! - [`copy`](StreamReader::copy) produces independent readers that each see
//!   the full remaining sequence in FIFO order;
//! - [`merge`](StreamReader::merge) interleaves several streams; the order
//!   across inputs is unspecified, but every item appears exactly once and
//!   the merged stream completes when all inputs complete.

use miette::Diagnostic;
use thiserror::Error;

/// Default buffer capacity for pipes created by the engine.
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Terminal conditions observed by a [`StreamReader`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Diagnostic)]
pub enum StreamError {
    /// Normal completion: the writer closed and the buffer is drained.
    #[error("stream closed")]
    #[diagnostic(code(skein::stream::closed))]
    Closed,

    /// The producer terminated the stream with an error.
    #[error("stream failed: {0}")]
    #[diagnostic(code(skein::stream::failed))]
    Failed(String),
}

impl StreamError {
    /// Returns `true` for the EOF sentinel.
    #[must_use]
    pub fn is_eof(&self) -> bool {
        matches!(self, StreamError::Closed)
    }
}

/// Create a new pipe with the given buffer capacity.
#[must_use]
pub fn stream_pipe<T>(capacity: usize) -> (StreamWriter<T>, StreamReader<T>) {
    let (tx, rx) = flume::bounded(capacity.max(1));
    (StreamWriter { tx }, StreamReader { rx })
}

/// Producer half of a stream pipe.
#[derive(Debug)]
pub struct StreamWriter<T> {
    tx: flume::Sender<Result<T, StreamError>>,
}

impl<T> StreamWriter<T> {
    /// Send one item, waiting while the buffer is full.
    ///
    /// Fails with [`StreamError::Closed`] once every reader is gone.
    pub async fn send(&self, item: T) -> Result<(), StreamError> {
        self.tx
            .send_async(Ok(item))
            .await
            .map_err(|_| StreamError::Closed)
    }

    /// Close the stream normally. Readers drain and then see EOF.
    pub fn close(self) {}

    /// Close the stream with a terminal error delivered after any buffered
    /// items.
    pub async fn close_with_error(self, message: impl Into<String>) {
        let _ = self
            .tx
            .send_async(Err(StreamError::Failed(message.into())))
            .await;
    }
}

/// Consumer half of a stream pipe.
#[derive(Debug)]
pub struct StreamReader<T> {
    rx: flume::Receiver<Result<T, StreamError>>,
}

impl<T: Send + 'static> StreamReader<T> {
    /// Receive the next item, waiting while the buffer is empty.
    ///
    /// Returns [`StreamError::Closed`] after the writer closes and the
    /// buffer drains; further calls keep returning it.
    pub async fn recv(&self) -> Result<T, StreamError> {
        match self.rx.recv_async().await {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(StreamError::Closed),
        }
    }

    /// Drain the remaining items into a vector.
    ///
    /// A clean EOF terminates the collection; a terminal stream error is
    /// propagated.
    pub async fn collect(self) -> Result<Vec<T>, StreamError> {
        let mut items = Vec::new();
        loop {
            match self.recv().await {
                Ok(item) => items.push(item),
                Err(StreamError::Closed) => return Ok(items),
                Err(err) => return Err(err),
            }
        }
    }

    /// Build a single-item stream.
    #[must_use]
    pub fn single(item: T) -> Self {
        Self::from_items(vec![item])
    }

    /// Build an already-complete stream from a vector of items.
    #[must_use]
    pub fn from_items(items: Vec<T>) -> Self {
        let (tx, rx) = flume::bounded(items.len().max(1));
        for item in items {
            // Capacity covers every item, so this cannot fail.
            let _ = tx.send(Ok(item));
        }
        StreamReader { rx }
    }

    /// Create `n` independent readers that each observe the full remaining
    /// sequence of this stream, in order.
    ///
    /// A background pump forwards every item (and the terminal error, if
    /// any) to each copy. Each copy has its own buffer; a slow copy applies
    /// backpressure to the pump, not to its siblings' consumption of already
    /// forwarded items.
    #[must_use]
    pub fn copy(self, n: usize) -> Vec<StreamReader<T>>
    where
        T: Clone,
    {
        if n <= 1 {
            return vec![self];
        }
        let mut writers = Vec::with_capacity(n);
        let mut readers = Vec::with_capacity(n);
        for _ in 0..n {
            let (tx, rx) = stream_pipe(DEFAULT_STREAM_CAPACITY);
            writers.push(tx);
            readers.push(rx);
        }
        tokio::spawn(async move {
            loop {
                match self.recv().await {
                    Ok(item) => {
                        for writer in &writers {
                            let _ = writer.send(item.clone()).await;
                        }
                    }
                    Err(StreamError::Closed) => break,
                    Err(StreamError::Failed(message)) => {
                        for writer in writers.drain(..) {
                            writer.close_with_error(message.clone()).await;
                        }
                        break;
                    }
                }
            }
        });
        readers
    }

    /// Interleave several streams into one.
    ///
    /// The merged stream completes when all inputs complete; a terminal
    /// error on any input is forwarded.
    #[must_use]
    pub fn merge(readers: Vec<StreamReader<T>>) -> StreamReader<T> {
        let (tx, rx) = stream_pipe(DEFAULT_STREAM_CAPACITY);
        for reader in readers {
            let tx = tx.clone();
            tokio::spawn(async move {
                loop {
                    match reader.recv().await {
                        Ok(item) => {
                            if tx.send(item).await.is_err() {
                                break;
                            }
                        }
                        Err(StreamError::Closed) => break,
                        Err(StreamError::Failed(message)) => {
                            tx.close_with_error(message).await;
                            break;
                        }
                    }
                }
            });
        }
        rx
    }
}

impl<T> Clone for StreamWriter<T> {
    fn clone(&self) -> Self {
        StreamWriter {
            tx: self.tx.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_recv_then_eof() {
        let (tx, rx) = stream_pipe(4);
        tx.send(1u32).await.unwrap();
        tx.send(2).await.unwrap();
        tx.close();
        assert_eq!(rx.recv().await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 2);
        assert_eq!(rx.recv().await.unwrap_err(), StreamError::Closed);
        // EOF is sticky.
        assert_eq!(rx.recv().await.unwrap_err(), StreamError::Closed);
    }

    #[tokio::test]
    async fn close_with_error_delivers_after_buffered_items() {
        let (tx, rx) = stream_pipe(4);
        tx.send("chunk").await.unwrap();
        tx.close_with_error("boom").await;
        assert_eq!(rx.recv().await.unwrap(), "chunk");
        assert_eq!(
            rx.recv().await.unwrap_err(),
            StreamError::Failed("boom".into())
        );
    }

    #[tokio::test]
    async fn copies_each_see_full_sequence() {
        let reader = StreamReader::from_items(vec![1, 2, 3]);
        let copies = reader.copy(3);
        assert_eq!(copies.len(), 3);
        for copy in copies {
            assert_eq!(copy.collect().await.unwrap(), vec![1, 2, 3]);
        }
    }

    #[tokio::test]
    async fn merge_sees_every_item_exactly_once() {
        let a = StreamReader::from_items(vec![1, 2]);
        let b = StreamReader::from_items(vec![3, 4, 5]);
        let mut merged = StreamReader::merge(vec![a, b]).collect().await.unwrap();
        merged.sort_unstable();
        assert_eq!(merged, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn send_fails_after_all_readers_dropped() {
        let (tx, rx) = stream_pipe(1);
        drop(rx);
        assert_eq!(tx.send(1).await.unwrap_err(), StreamError::Closed);
    }
}
