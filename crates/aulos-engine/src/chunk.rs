use bytes::Bytes;
use tokio::sync::oneshot;

/// One fixed byte interval of the origin body, with an eventual payload.
///
/// A chunk is enqueued onto the ready queue *before* its payload exists; the
/// consumer awaits [`Chunk::payload`] after dequeuing it. The paired
/// [`ChunkSlot`] is the single-use write side held by the fetcher that owns
/// the interval.
///
/// ## Invariants
///
/// - `start_offset <= end_offset`
/// - the payload is written at most once and has length exactly
///   `end_offset - start_offset + 1`
#[derive(Debug)]
pub struct Chunk {
    start_offset: u64,
    end_offset: u64,
    payload: oneshot::Receiver<Bytes>,
}

/// Write side of a [`Chunk`]. Consumed by [`ChunkSlot::put`].
#[derive(Debug)]
pub struct ChunkSlot {
    start_offset: u64,
    end_offset: u64,
    tx: oneshot::Sender<Bytes>,
}

impl Chunk {
    pub fn new(start_offset: u64, end_offset: u64) -> (Chunk, ChunkSlot) {
        debug_assert!(start_offset <= end_offset);
        let (tx, rx) = oneshot::channel();
        (
            Chunk {
                start_offset,
                end_offset,
                payload: rx,
            },
            ChunkSlot {
                start_offset,
                end_offset,
                tx,
            },
        )
    }

    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset + 1
    }

    /// Wait for the owning fetcher to fill the interval.
    ///
    /// `None` means the write side was dropped without a payload (the fetcher
    /// hit a fatal error or the download was stopped).
    pub async fn payload(self) -> Option<Bytes> {
        self.payload.await.ok()
    }
}

impl ChunkSlot {
    pub fn start_offset(&self) -> u64 {
        self.start_offset
    }

    pub fn end_offset(&self) -> u64 {
        self.end_offset
    }

    pub fn len(&self) -> u64 {
        self.end_offset - self.start_offset + 1
    }

    /// Publish the payload. The consumer may already be gone; that is fine,
    /// the bytes are simply dropped.
    pub fn put(self, bytes: Bytes) {
        debug_assert_eq!(bytes.len() as u64, self.end_offset - self.start_offset + 1);
        let _ = self.tx.send(bytes);
    }
}
