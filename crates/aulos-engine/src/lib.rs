#![forbid(unsafe_code)]

//! # aulos-engine
//!
//! The parallel range download engine behind the aulos proxy.
//!
//! Given an origin URL, an inclusive byte interval, a chunk size, and a
//! worker count, a [`Coordinator`] runs N concurrent fetchers that each
//! allocate successive chunks, fetch them with ranged GETs, and publish
//! payloads through a bounded ordered queue. A single consumer drains the
//! queue in allocation order and writes the bytes to an [`Emitter`], so the
//! reader sees origin bytes strictly in ascending order no matter how the
//! fetchers interleave.
//!
//! ## Guarantees
//!
//! - Delivered bytes are a prefix of the origin interval, in order, with no
//!   duplication.
//! - Buffered data is bounded by the queue capacity plus at most one
//!   in-flight chunk per fetcher.
//! - Cancellation is cooperative and observed at every blocking point; stop
//!   is idempotent and drains undelivered chunks.

pub mod chunk;
pub mod coordinator;
pub mod emitter;
pub mod error;
mod fetcher;
pub mod pool;
mod queue;

pub use chunk::{Chunk, ChunkSlot};
pub use coordinator::{
    Coordinator, CoordinatorConfig, RunOutcome, RunState, DEFAULT_PROXY_TIMEOUT,
};
pub use emitter::{Emitter, EmitterReader};
pub use error::{EngineError, EngineResult};
pub use pool::WorkPool;
