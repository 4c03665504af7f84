use thiserror::Error;

/// Crate-wide error type.
///
/// `UnsupportedFormat` and `ArchiveCorrupt` are expected, common outcomes for
/// arbitrary user files; the thumbnail pipeline degrades them to a `Failed`
/// status instead of propagating them to the UI.
#[derive(Debug, Error)]
pub enum Error {
    /// Rejects paths that would represent unbounded recursive archive
    /// nesting.
    #[error("path too deep: {depth} segments exceeds the limit of {limit}")]
    PathTooDeep { depth: usize, limit: usize },

    /// Upper bound on a single path segment.
    #[error("path segment too long: {len} bytes exceeds the limit of {limit}")]
    SegmentTooLong { len: usize, limit: usize },

    /// Neither decoder could parse the input, or the requested output format
    /// is not a supported canonical format.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The archive could not be opened or an entry could not be read.
    #[error("archive unreadable: {0}")]
    ArchiveCorrupt(String),

    /// A cache store write failed mid-transaction and was rolled back.
    #[error("cache transaction failed: {0}")]
    CacheTransaction(String),

    /// Routine cooperative cancellation; logged at debug level only.
    #[error("operation canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("cache store error: {0}")]
    Store(#[from] rusqlite::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
