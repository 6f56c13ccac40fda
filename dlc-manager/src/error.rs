//! Error types crossing the crate's public API.
//!
//! [`CodecError`] covers the binary-format layer (C1); [`ManagerError`] is
//! the broader error surface returned by the state machine and request
//! manager. The `error` *signal* payload ([`crate::signal::ErrorEvent`]) is
//! a separate, flatter type: it is a stable wire shape subscribers depend
//! on, so these `Result` error types get translated into it rather than
//! re-used directly.

use std::path::PathBuf;

/// Failures from parsing or validating the superpack binary format.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The trailing `Footer` block failed its `info_crc32` check, or was too
    /// short to contain one.
    #[error("bad footer: {0}")]
    BadFooter(String),

    /// The `FileTable` block failed its `files_table_crc32` check, or its
    /// name blob could not be split into `entries.len()` `\0`-terminated
    /// names.
    #[error("bad file table: {0}")]
    BadFileTable(String),

    /// The `Meta` block failed its `meta_data_crc32` check, was malformed,
    /// or its pack dependency graph contains a cycle.
    #[error("bad meta: {0}")]
    BadMeta(String),

    /// A pack dependency graph has a cycle; rejected at load time per
    /// invariant 4.
    #[error("dependency cycle detected involving pack {0:?}")]
    DependencyCycle(String),

    /// A `.dvpl` LitePack trailer could not be read in full (short read or
    /// failed seek).
    #[error("truncated lite-pack trailer")]
    TruncatedTrailer,

    /// An unrecognized compression tag byte.
    #[error("unknown compression tag: {0}")]
    UnknownCompression(u8),
}

/// Top-level error surface for the DLC manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    /// A binary-format parse/validate failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A local file-system operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// The path the operation was attempted against.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configured [`crate::downloader::Downloader`] reported a failure.
    #[error("download failed: {0}")]
    Download(String),

    /// `timeout_for_initialization` elapsed with no successful remote
    /// negotiation.
    #[error("initialization timed out after {0}ms")]
    InitTimeout(u64),
}

impl ManagerError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ManagerError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = ManagerError> = std::result::Result<T, E>;
