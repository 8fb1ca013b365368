//! Error types for the erasure-coding engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or running a codec
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // =========================================================================
    // Profile Errors
    // =========================================================================
    /// Advertised (k, m) does not match the code family, or the profile is malformed
    #[error("Invalid profile: {0}")]
    InvalidProfile(String),

    /// Codec used before a successful `init`
    #[error("Codec is not initialized")]
    NotInitialized,

    // =========================================================================
    // Transform Library Errors
    // =========================================================================
    /// No candidate path resolved to a loadable library
    #[error("Transform library not found (tried: {})", .tried.join(", "))]
    LibraryNotFound { tried: Vec<String> },

    /// The library loaded but a required symbol is absent
    #[error("Transform library {path} is missing symbol '{symbol}'")]
    SymbolMissing { path: String, symbol: String },

    // =========================================================================
    // Codec Errors
    // =========================================================================
    /// Input length is not a multiple of the codec alignment
    #[error("Input length {len} is not a multiple of alignment {alignment}")]
    UnalignedInput { len: usize, alignment: usize },

    /// Input larger than the transform ABI can address
    #[error("Input length {len} exceeds the transform limit of {max} bytes")]
    InputTooLarge { len: usize, max: usize },

    /// Shard index outside `[0, N)`
    #[error("Invalid shard index {index} (chunk count {chunk_count})")]
    InvalidShard { index: i64, chunk_count: usize },

    /// More erasures than the code can repair
    #[error("Too many erasures: {erasures} (code tolerates {tolerated})")]
    TooManyErasures { erasures: usize, tolerated: usize },

    /// Fewer shards presented than the decode requires
    #[error("Insufficient shards: have {available}, need {required} (missing {missing:?})")]
    InsufficientShards {
        available: usize,
        required: usize,
        missing: Vec<usize>,
    },

    /// The transform oracle declared the availability pattern unrestorable
    #[error("Availability pattern {bitmask:#05x} is not restorable")]
    UnrestorablePattern { bitmask: u32 },

    /// The transform returned a nonzero status from restore
    #[error("Transform restore failed with code {code}")]
    RestoreFailed { code: i32 },

    /// Shards handed to decode do not share one length
    #[error("Shard {index} has length {len}, expected {expected}")]
    ShardLengthMismatch {
        index: usize,
        len: usize,
        expected: usize,
    },

    /// An output buffer could not be allocated
    #[error("Allocation of {size} bytes failed")]
    AllocationFailure { size: usize },
}

impl Error {
    /// Negative POSIX status code reported to the host for this error.
    pub fn errno(&self) -> i32 {
        let code = match self {
            Error::InvalidProfile(_)
            | Error::UnalignedInput { .. }
            | Error::InputTooLarge { .. }
            | Error::InvalidShard { .. }
            | Error::ShardLengthMismatch { .. }
            | Error::NotInitialized => libc::EINVAL,
            Error::LibraryNotFound { .. } | Error::SymbolMissing { .. } => libc::ENOENT,
            Error::TooManyErasures { .. }
            | Error::InsufficientShards { .. }
            | Error::RestoreFailed { .. } => libc::EIO,
            Error::UnrestorablePattern { .. } => libc::ENOTSUP,
            Error::AllocationFailure { .. } => libc::ENOMEM,
        };
        -code
    }

    /// True for errors raised while resolving the transform library.
    pub fn is_load_failure(&self) -> bool {
        matches!(
            self,
            Error::LibraryNotFound { .. } | Error::SymbolMissing { .. }
        )
    }
}
