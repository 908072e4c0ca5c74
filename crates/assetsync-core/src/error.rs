//! Error types for the sync pipeline.

use thiserror::Error;

/// Errors that can occur while synchronizing events.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The chain node could not be reached (transport failure or timeout).
    /// Transient: the next cycle retries the same range.
    #[error("node unavailable: {0}")]
    NodeUnavailable(String),

    /// The node rejected a log query as spanning too many blocks.
    /// Recoverable: the fetcher bisects the range and retries each half.
    #[error("range too large: blocks {from}..={to}")]
    RangeTooLarge { from: u64, to: u64 },

    /// A log was missing expected topics or had undecodable data.
    /// Per-record: skipped with a warning, never fatal to the batch.
    #[error("malformed event: {0}")]
    MalformedEvent(String),

    /// A numeric field exceeded the engine's integer range. Indicates a
    /// node/ABI mismatch rather than a transient condition.
    #[error("value overflow in field '{field}': {value}")]
    ValueOverflow { field: &'static str, value: String },

    /// A ledger write or read failed. Aborts the current cycle without
    /// advancing the watermark; the whole range is retried next tick.
    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Other(String),
}

impl SyncError {
    /// Returns `true` if the error is transient and the same operation can
    /// be retried unchanged on the next cycle.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::NodeUnavailable(_) | Self::Store(_))
    }

    /// Returns `true` if the error applies to a single record and the rest
    /// of the batch should continue.
    pub fn is_per_record(&self) -> bool {
        matches!(self, Self::MalformedEvent(_) | Self::ValueOverflow { .. })
    }
}
