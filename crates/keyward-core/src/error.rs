//! Error types for `keyward-core`.

use thiserror::Error;

/// Errors produced by the data model and codec.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// A payload decoded to an absent (`null`) value where one was required.
    #[error("payload decoded to an absent value")]
    NullPayload,

    /// JSON encoding or decoding failed.
    #[error("codec error: {0}")]
    Codec(String),

    /// The artifact does not start with the expected magic bytes.
    #[error("bad magic bytes")]
    BadMagic,

    /// The artifact was written by a newer format version.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),

    /// The payload digest does not match the one recorded in the header.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The frame ended before a declared length was satisfied.
    #[error("truncated frame")]
    Truncated,

    /// A decoded change violates the change-log shape rules.
    #[error("malformed change at index {index}: {reason}")]
    MalformedChange {
        /// Position of the offending change in its log.
        index: usize,
        /// What is wrong with it.
        reason: String,
    },
}
