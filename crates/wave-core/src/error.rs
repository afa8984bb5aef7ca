use thiserror::Error;

/// Top-level error type for the chronowave workspace.
#[derive(Debug, Error)]
pub enum WaveError {
    #[error("invalid json: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A document carries 2^16 or more attribute positions; fatal for the
    /// whole batch.
    #[error("document has too many attributes: {0}")]
    DocumentOverflow(usize),

    /// A block carries more than 2^16 documents.
    #[error("batch has too many documents: {0}")]
    BatchOverflow(usize),

    /// Short read, bad version byte, or inconsistent sizes while decoding a
    /// block file. The block is skipped and the query continues.
    #[error("corrupt block: {0}")]
    BlockCorrupt(String),

    #[error("aggregator decode: {0}")]
    AggregatorDecode(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, WaveError>;
