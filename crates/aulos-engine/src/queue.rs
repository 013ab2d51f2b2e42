use std::time::Duration;

use crate::chunk::Chunk;
use crate::error::{EngineError, EngineResult};

/// Bounded FIFO hand-off from fetchers to the consumer.
///
/// Insertion order equals chunk allocation order, so the `start_offset`
/// sequence pulled from the queue is strictly increasing by one chunk size
/// (the last chunk may be short). Producers block when the queue is at
/// capacity; that blocking is the backpressure gate.
#[derive(Clone, Debug)]
pub(crate) struct OrderedQueue {
    tx: kanal::AsyncSender<Chunk>,
    rx: kanal::AsyncReceiver<Chunk>,
}

impl OrderedQueue {
    pub(crate) fn bounded(capacity: usize) -> Self {
        let (tx, rx) = kanal::bounded_async(capacity);
        Self { tx, rx }
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    /// Blocks while the queue is full.
    pub(crate) async fn push(&self, chunk: Chunk) -> EngineResult<()> {
        self.tx
            .send(chunk)
            .await
            .map_err(|_| EngineError::QueueClosed)
    }

    /// Next chunk in allocation order, or `None` once `timeout` elapses or
    /// the queue is closed.
    pub(crate) async fn pop(&self, timeout: Duration) -> Option<Chunk> {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Ok(chunk)) => Some(chunk),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Discard queued chunks until no new one arrives for `quiet`.
    /// Returns how many were dropped.
    pub(crate) async fn drain_until_quiet(&self, quiet: Duration) -> usize {
        let mut dropped = 0;
        loop {
            match tokio::time::timeout(quiet, self.rx.recv()).await {
                Ok(Ok(chunk)) => {
                    drop(chunk);
                    dropped += 1;
                }
                Ok(Err(_)) | Err(_) => return dropped,
            }
        }
    }
}
