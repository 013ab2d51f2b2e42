use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Error type for aulos-engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("emitter closed by reader")]
    EmitterClosed,

    #[error("ready queue closed")]
    QueueClosed,
}
