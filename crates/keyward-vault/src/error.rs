//! Vault error types for `keyward-vault`.

use keyward_core::CoreError;
use thiserror::Error;

/// Errors produced by vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Data-model or codec failure (delegated from keyward-core).
    #[error(transparent)]
    Core(CoreError),

    /// A stored payload decoded to an absent value.
    #[error("stored payload is empty")]
    NullPayload,

    /// The auto-save artifact is unreadable or malformed. Nothing from it
    /// was applied; retry with a `DontMerge…` behavior to discard or keep it.
    #[error("auto-save artifact is corrupt: {0}")]
    RecoverableCorruption(String),

    /// Another session holds the auto-save artifact.
    #[error("auto-save artifact is locked by {holder}")]
    ArtifactLocked {
        /// Contents of the lock marker (holder id and pid).
        holder: String,
    },

    /// Item not found by ID.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// An item with this ID already exists.
    #[error("item already exists: {0}")]
    ItemExists(String),

    /// Main store read/write failure.
    #[error("store error: {0}")]
    Store(String),

    /// I/O error from the filesystem.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<CoreError> for VaultError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::NullPayload => Self::NullPayload,
            other => Self::Core(other),
        }
    }
}
