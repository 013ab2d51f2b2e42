use bytes::Bytes;
use futures::Stream;

use crate::error::{EngineError, EngineResult};

/// Write side of the byte pipe between the coordinator and the HTTP response.
///
/// Single writer, single reader, rendezvous hand-off: `write` completes when
/// the reader has taken the bytes, and fails once the reader is gone — which
/// is how a client disconnect reaches the coordinator.
#[derive(Clone, Debug)]
pub struct Emitter {
    tx: kanal::AsyncSender<Bytes>,
}

/// Read side, consumed by the HTTP response body.
#[derive(Debug)]
pub struct EmitterReader {
    rx: kanal::AsyncReceiver<Bytes>,
}

impl Emitter {
    pub fn pair() -> (Emitter, EmitterReader) {
        let (tx, rx) = kanal::bounded_async(0);
        (Emitter { tx }, EmitterReader { rx })
    }

    /// Hand `bytes` to the reader. Returns the accepted length, or
    /// [`EngineError::EmitterClosed`] when the reader has gone away.
    pub async fn write(&self, bytes: Bytes) -> EngineResult<usize> {
        let len = bytes.len();
        self.tx
            .send(bytes)
            .await
            .map_err(|_| EngineError::EmitterClosed)?;
        Ok(len)
    }

    /// Signal end of stream. Subsequent reads observe EOF.
    pub fn close(&self) {
        self.tx.close();
    }
}

impl EmitterReader {
    /// Next block of bytes, or `None` at end of stream.
    pub async fn read(&self) -> Option<Bytes> {
        self.rx.recv().await.ok()
    }

    /// Adapt the read side to a body stream (`axum::body::Body::from_stream`).
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, std::io::Error>> + Send {
        async_stream::stream! {
            while let Ok(bytes) = self.rx.recv().await {
                yield Ok(bytes);
            }
        }
    }
}
