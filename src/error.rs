/// Failure reported by a downstream sink.
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("sink unavailable: {0}")]
    Unavailable(String),
}

/// Errors surfaced by [`crate::RealtimeCache`].
///
/// WAL write and replay faults are absorbed and logged inside the updater;
/// they never show up here.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The cache was stopped; no further reads or writes are accepted.
    #[error("cache is stopped")]
    Stopped,

    #[error("poisoned lock")]
    Poisoned,

    /// `start()` was called outside a tokio runtime.
    #[error("no tokio runtime available for the flush scheduler")]
    NoRuntime,

    /// Setup failure, e.g. the WAL directory could not be created.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Sink(#[from] SinkError),
}

pub type CacheResult<T> = Result<T, CacheError>;
