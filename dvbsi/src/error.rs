//! Error types for SI section decoding and EPG persistence.

use thiserror::Error;

/// Errors raised while decoding a section or one of its descriptors.
#[derive(Error, Debug)]
pub enum SiError {
    /// A read ran past the end of the available bytes.
    #[error("Truncated data: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// The buffer is shorter than the common section header.
    #[error("Section too short: {0} bytes")]
    SectionTooShort(usize),

    /// `section_length` disagrees with the delivered buffer size.
    #[error("Section length mismatch: header says {declared}, buffer holds {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// CRC-32 trailer does not match the section contents.
    #[error("CRC mismatch: expected 0x{expected:08X}, computed 0x{computed:08X}")]
    CrcMismatch { expected: u32, computed: u32 },

    /// The EPG store rejected a read or write.
    #[error("EPG store error: {0}")]
    Store(#[from] StoreError),
}

/// Errors reported by an [`EpgStore`](crate::EpgStore) implementation.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Backend-specific failure (database, I/O, ...).
    #[error("{0}")]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// The store is not usable (closed, poisoned, ...).
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Result alias for decoding functions.
pub type Result<T> = std::result::Result<T, SiError>;

/// Result alias for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;
