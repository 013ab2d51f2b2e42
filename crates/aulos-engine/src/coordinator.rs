use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aulos_net::{Headers, HttpClient};
use bytes::Bytes;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};
use url::Url;

use crate::emitter::Emitter;
use crate::fetcher::Fetcher;
use crate::pool::WorkPool;
use crate::queue::OrderedQueue;

/// Consumer-side timeout on an empty ready queue.
pub const DEFAULT_PROXY_TIMEOUT: Duration = Duration::from_secs(10);

const DRAIN_QUIET: Duration = Duration::from_secs(1);
const NEAR_START_BYTES: u64 = 1024 * 1024;

/// Coordinator lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    Init = 0,
    Running = 1,
    Stopping = 2,
    Stopped = 3,
}

impl RunState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Init,
            1 => Self::Running,
            2 => Self::Stopping,
            _ => Self::Stopped,
        }
    }
}

/// What one download run produced.
#[derive(Clone, Copy, Debug)]
pub struct RunOutcome {
    pub delivered: u64,
    pub complete: bool,
}

/// Everything one parallel download needs; built by the front-end.
#[derive(Clone, Debug)]
pub struct CoordinatorConfig {
    pub url: Url,
    /// Client headers, already filtered, forwarded on every chunk fetch.
    pub headers: Headers,
    pub start_offset: u64,
    pub end_offset: u64,
    pub chunk_size: u64,
    pub thread_count: u64,
    pub max_buffered_chunks: u64,
    pub proxy_timeout: Duration,
    /// Work-pool mode: submit fetchers here instead of spawning directly.
    pub pool: Option<WorkPool>,
}

/// State of one parallel range download.
///
/// Owns the ready queue and the allocation cursor; fetchers and the consumer
/// share it through an `Arc`. Cancellation is a single token observed at
/// every loop head and blocking point.
pub struct Coordinator {
    client: HttpClient,
    url: Url,
    headers: Headers,
    start_offset: u64,
    end_offset: u64,
    chunk_size: u64,
    thread_count: u64,
    max_buffered_chunks: u64,
    proxy_timeout: Duration,
    pool: Option<WorkPool>,

    cancel: CancellationToken,
    /// Next unallocated byte. The enqueue happens under this lock so queue
    /// order always equals allocation order.
    next_offset: tokio::sync::Mutex<u64>,
    queue: OrderedQueue,
    /// Bytes already delivered to the consumer, written only by the consumer.
    current_offset: AtomicU64,
    phase: AtomicU8,
    draining: AtomicBool,
}

impl Coordinator {
    pub fn new(client: HttpClient, config: CoordinatorConfig) -> Arc<Self> {
        Arc::new(Self {
            client,
            url: config.url,
            headers: config.headers,
            start_offset: config.start_offset,
            end_offset: config.end_offset,
            chunk_size: config.chunk_size,
            thread_count: config.thread_count,
            max_buffered_chunks: config.max_buffered_chunks,
            proxy_timeout: config.proxy_timeout,
            pool: config.pool,
            cancel: CancellationToken::new(),
            next_offset: tokio::sync::Mutex::new(config.start_offset),
            queue: OrderedQueue::bounded(config.max_buffered_chunks.max(1) as usize),
            current_offset: AtomicU64::new(config.start_offset),
            phase: AtomicU8::new(RunState::Init as u8),
            draining: AtomicBool::new(false),
        })
    }

    /// Fetchers actually spawned for an interval: one per chunk, capped by
    /// the requested parallelism.
    pub fn num_splits(total_len: u64, chunk_size: u64, thread_count: u64) -> u64 {
        let chunks = total_len.div_ceil(chunk_size.max(1));
        chunks.min(thread_count).max(1)
    }

    pub fn state(&self) -> RunState {
        RunState::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    pub(crate) fn cancelled_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn client(&self) -> &HttpClient {
        &self.client
    }

    pub(crate) fn url(&self) -> &Url {
        &self.url
    }

    pub(crate) fn headers(&self) -> &Headers {
        &self.headers
    }

    pub(crate) fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub(crate) fn max_buffered_chunks(&self) -> u64 {
        self.max_buffered_chunks
    }

    /// Bytes delivered so far (`current_offset - start_offset`).
    pub fn bytes_delivered(&self) -> u64 {
        self.current_offset.load(Ordering::SeqCst) - self.start_offset
    }

    /// Bytes sitting in the ready queue, used by fetchers for backpressure.
    pub fn remaining_buffered_bytes(&self) -> u64 {
        self.queue.len() as u64 * self.chunk_size
    }

    pub fn queued_chunks(&self) -> usize {
        self.queue.len()
    }

    /// Retry budget is higher near the start and the tail of the media,
    /// where a failed chunk is most visible to players.
    pub(crate) fn max_retries_for(&self, start_offset: u64) -> u32 {
        let tail_permille = (self.end_offset - start_offset)
            .saturating_mul(1000)
            / self.end_offset.max(1);
        if start_offset < NEAR_START_BYTES || tail_permille < 2 {
            7
        } else {
            5
        }
    }

    /// Allocate the next chunk and enqueue its read handle.
    ///
    /// Returns the write slot for the fetcher, or `None` when the interval is
    /// exhausted or the download is stopped. The enqueue may block on a full
    /// queue while the allocation lock is held; that blocking is the
    /// backpressure gate and intentionally serializes allocators.
    pub(crate) async fn allocate(&self) -> Option<crate::chunk::ChunkSlot> {
        if self.cancel.is_cancelled() {
            return None;
        }

        let mut next = self.next_offset.lock().await;
        let start = *next;
        if start > self.end_offset {
            return None;
        }
        let end = (start + self.chunk_size - 1).min(self.end_offset);
        let (chunk, slot) = crate::chunk::Chunk::new(start, end);

        let pushed = tokio::select! {
            () = self.cancel.cancelled() => return None,
            result = self.queue.push(chunk) => result,
        };
        if pushed.is_err() {
            return None;
        }

        *next += self.chunk_size;
        trace!(start, end, "allocated chunk");
        Some(slot)
    }

    /// Entry point: spawn fetchers and drain the queue into `emitter`.
    pub async fn run(self: Arc<Self>, emitter: Emitter) -> RunOutcome {
        self.phase.store(RunState::Running as u8, Ordering::SeqCst);

        let total_len = self.end_offset - self.start_offset + 1;
        let num_splits = Self::num_splits(total_len, self.chunk_size, self.thread_count);
        debug!(
            url = %self.url,
            start = self.start_offset,
            end = self.end_offset,
            total_len,
            chunk_size = self.chunk_size,
            num_splits,
            thread_count = self.thread_count,
            pooled = self.pool.is_some(),
            "coordinator: starting download"
        );

        for id in 0..num_splits {
            let fetcher = Fetcher::new(Arc::clone(&self), id);
            match &self.pool {
                Some(pool) => {
                    pool.spawn(fetcher.run());
                }
                None => {
                    tokio::spawn(fetcher.run());
                }
            }
        }

        let complete = loop {
            let Some(buffer) = self.read().await else {
                debug!("coordinator: read returned empty, ending stream");
                break false;
            };

            if let Err(e) = emitter.write(buffer).await {
                warn!("coordinator: emitter write failed: {e}");
                break false;
            }

            if self.current_offset.load(Ordering::SeqCst) >= self.end_offset {
                debug!(total_len, "coordinator: all bytes delivered");
                break true;
            }
        };

        self.stop().await;
        emitter.close();

        RunOutcome {
            delivered: self.bytes_delivered(),
            complete,
        }
    }

    /// Dequeue the next chunk and wait for its payload.
    ///
    /// Empty result means: interval already delivered, queue timeout, a
    /// fetcher died without publishing, or the download was stopped — in
    /// every case the caller ends the stream.
    pub async fn read(&self) -> Option<Bytes> {
        if self.current_offset.load(Ordering::SeqCst) >= self.end_offset {
            self.stop().await;
            return None;
        }

        let chunk = tokio::select! {
            () = self.cancel.cancelled() => None,
            chunk = self.queue.pop(self.proxy_timeout) => chunk,
        };
        let Some(chunk) = chunk else {
            debug!("coordinator: queue read timed out");
            self.stop().await;
            return None;
        };

        let payload = tokio::select! {
            () = self.cancel.cancelled() => None,
            payload = chunk.payload() => payload,
        };
        let bytes = payload?;

        self.current_offset
            .fetch_add(bytes.len() as u64, Ordering::SeqCst);
        Some(bytes)
    }

    /// Idempotent shutdown: cancel, then drain the ready queue until it has
    /// been quiet for one second. Dropped chunks release their payloads.
    pub async fn stop(&self) {
        self.cancel.cancel();

        if self.draining.swap(true, Ordering::SeqCst) {
            return;
        }
        self.phase.store(RunState::Stopping as u8, Ordering::SeqCst);

        let dropped = self.queue.drain_until_quiet(DRAIN_QUIET).await;
        if dropped > 0 {
            debug!(dropped, "coordinator: drained undelivered chunks");
        }

        self.phase.store(RunState::Stopped as u8, Ordering::SeqCst);
    }
}
