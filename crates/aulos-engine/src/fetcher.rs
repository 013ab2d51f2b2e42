use std::sync::Arc;
use std::time::Duration;

use aulos_net::RangeSpec;
use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::chunk::ChunkSlot;
use crate::coordinator::Coordinator;

const BACKPRESSURE_SLEEP: Duration = Duration::from_secs(1);
const RETRY_SLEEP: Duration = Duration::from_secs(1);

/// One concurrent worker: allocate a chunk, wait out backpressure, fetch the
/// interval with retry, publish the payload, repeat until the interval is
/// exhausted or the download stops.
///
/// A fatal fetch — a definitive non-success origin status, or transport
/// retries exhausted — stops the whole coordinator; the other fetchers
/// observe cancellation and exit after their current attempt.
pub(crate) struct Fetcher {
    co: Arc<Coordinator>,
    id: u64,
}

impl Fetcher {
    pub(crate) fn new(co: Arc<Coordinator>, id: u64) -> Self {
        Self { co, id }
    }

    pub(crate) async fn run(self) {
        trace!(id = self.id, "fetcher: started");

        while !self.co.cancelled_token().is_cancelled() {
            let Some(slot) = self.co.allocate().await else {
                break;
            };

            self.backpressure_wait().await;

            if !self.fetch(slot).await {
                return;
            }
        }

        trace!(id = self.id, "fetcher: exiting");
    }

    /// The queue capacity already bounds buffered chunks; this explicit wait
    /// exists so a stalled fetcher still observes cancellation promptly.
    async fn backpressure_wait(&self) {
        loop {
            if self.co.cancelled_token().is_cancelled() {
                return;
            }

            let buffered = self.co.remaining_buffered_bytes();
            let max_buffered = self.co.chunk_size() * self.co.max_buffered_chunks();
            if buffered < max_buffered {
                return;
            }

            debug!(
                id = self.id,
                buffered, max_buffered, "fetcher: backpressure, pausing"
            );
            tokio::select! {
                () = self.co.cancelled_token().cancelled() => return,
                () = tokio::time::sleep(BACKPRESSURE_SLEEP) => {}
            }
        }
    }

    /// One chunk, fetched to completion or to a fatal error.
    /// Returns `false` when this fetcher must exit.
    async fn fetch(&self, slot: ChunkSlot) -> bool {
        let range = RangeSpec::new(slot.start_offset(), Some(slot.end_offset()));
        let max_attempts = self.co.max_retries_for(slot.start_offset());
        let mut attempt = 0u32;

        loop {
            if self.co.cancelled_token().is_cancelled() {
                return false;
            }
            attempt += 1;

            match self
                .co
                .client()
                .get_range_bytes(self.co.url().clone(), range, self.co.headers())
                .await
            {
                Ok(body) => {
                    // The payload buffer is sized exactly to the interval; a
                    // short origin body leaves the tail zeroed rather than
                    // shifting later offsets.
                    let len = slot.len() as usize;
                    let take = body.len().min(len);
                    let mut buffer = vec![0u8; len];
                    buffer[..take].copy_from_slice(&body[..take]);
                    slot.put(Bytes::from(buffer));
                    return true;
                }
                Err(e) if e.is_transport() => {
                    warn!(
                        id = self.id,
                        url = %self.co.url(),
                        range = %range.to_header_value(),
                        attempt,
                        max_attempts,
                        "fetcher: transport error: {e}"
                    );
                    if attempt >= max_attempts {
                        warn!(id = self.id, "fetcher: retries exhausted, stopping download");
                        self.co.stop().await;
                        return false;
                    }
                    tokio::select! {
                        () = self.co.cancelled_token().cancelled() => return false,
                        () = tokio::time::sleep(RETRY_SLEEP) => {}
                    }
                }
                Err(e) => {
                    debug!(
                        id = self.id,
                        url = %self.co.url(),
                        range = %range.to_header_value(),
                        status = e.status(),
                        "fetcher: fatal origin status, stopping download"
                    );
                    self.co.stop().await;
                    return false;
                }
            }
        }
    }
}
