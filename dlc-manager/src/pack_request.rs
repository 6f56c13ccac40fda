//! C6: a single in-flight request to make one pack (and, transitively, its
//! dependencies) ready.
//!
//! Identity is an opaque [`PackRequestHandle`] rather than a pointer the
//! caller holds onto, so [`crate::request_manager::RequestManager`] can move
//! requests between its live table and its delayed queue without anything
//! external needing to track where the object now lives: see
//! `StartDelayedRequests` in the grounding ledger for why the original's
//! pointer-swap approach doesn't translate here.

use std::collections::VecDeque;

/// Opaque identity of a [`PackRequest`], stable across its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PackRequestHandle(pub(crate) u32);

/// One file still to be downloaded to satisfy a request.
#[derive(Debug, Clone)]
pub(crate) struct PendingFile {
    pub name: String,
    pub meta_index: u32,
    /// Byte offset of this file's payload within the superpack blob.
    pub start_position: u64,
    pub compressed_size: u64,
    /// CRC-32 the downloaded payload's trailer must match for the file to
    /// be committed.
    pub compressed_crc32: u32,
}

/// Where a [`PackRequest`] currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Not yet started; waiting for a download slot or for initialization
    /// to finish.
    Queued,
    /// At least one file's download has started.
    Downloading,
    /// Every file for this pack and its dependencies is present and
    /// verified.
    Done,
    /// A non-recoverable error ended this request (see
    /// [`crate::request_manager::RequestManager`]'s error counter).
    Errored,
}

/// A read-only, cheaply cloned view of a [`PackRequest`], used as the
/// payload for `request_updated`/`request_start_loading` signals so
/// subscribers never hold a reference into the manager's internals.
#[derive(Debug, Clone)]
pub struct PackRequestSnapshot {
    /// The request's stable identity.
    pub handle: PackRequestHandle,
    /// Name of the pack originally requested (not its dependencies).
    pub pack_name: String,
    /// Current lifecycle state.
    pub state: RequestState,
    /// Priority set via `set_priority`; higher runs first.
    pub priority: i32,
    /// Bytes downloaded so far, across this pack and its dependencies.
    pub downloaded_bytes: u64,
    /// Total bytes required, across this pack and its dependencies.
    pub total_bytes: u64,
}

impl PackRequestSnapshot {
    /// Fraction in `[0.0, 1.0]` of bytes downloaded so far. `1.0` when
    /// there is nothing left to download, including the degenerate case of
    /// a pack with zero total bytes.
    pub fn progress(&self) -> f32 {
        if self.total_bytes == 0 {
            1.0
        } else {
            (self.downloaded_bytes as f64 / self.total_bytes as f64) as f32
        }
    }
}

/// A pending or in-flight request for one pack to become ready.
pub struct PackRequest {
    pub(crate) handle: PackRequestHandle,
    pub(crate) pack_name: String,
    pub(crate) priority: i32,
    pub(crate) state: RequestState,
    pub(crate) pending_files: VecDeque<PendingFile>,
    pub(crate) downloaded_bytes: u64,
    pub(crate) total_bytes: u64,
}

impl PackRequest {
    pub(crate) fn new(
        handle: PackRequestHandle,
        pack_name: String,
        priority: i32,
        pending_files: VecDeque<PendingFile>,
    ) -> Self {
        let total_bytes = pending_files.iter().map(|f| f.compressed_size).sum();
        Self {
            handle,
            pack_name,
            priority,
            state: RequestState::Queued,
            pending_files,
            downloaded_bytes: 0,
            total_bytes,
        }
    }

    /// The request's stable identity.
    pub fn handle(&self) -> PackRequestHandle {
        self.handle
    }

    /// True once every pending file has been accounted for.
    pub fn is_done(&self) -> bool {
        matches!(self.state, RequestState::Done)
    }

    pub(crate) fn snapshot(&self) -> PackRequestSnapshot {
        PackRequestSnapshot {
            handle: self.handle,
            pack_name: self.pack_name.clone(),
            state: self.state,
            priority: self.priority,
            downloaded_bytes: self.downloaded_bytes,
            total_bytes: self.total_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_complete_when_no_bytes_required() {
        let request = PackRequest::new(PackRequestHandle(1), "base".into(), 0, VecDeque::new());
        assert_eq!(request.snapshot().progress(), 1.0);
    }

    #[test]
    fn progress_reflects_partial_download() {
        let mut pending = VecDeque::new();
        pending.push_back(PendingFile {
            name: "a".into(),
            meta_index: 0,
            start_position: 0,
            compressed_size: 100,
            compressed_crc32: 0,
        });
        let mut request = PackRequest::new(PackRequestHandle(2), "dlc1".into(), 0, pending);
        request.downloaded_bytes = 25;
        assert_eq!(request.snapshot().progress(), 0.25);
    }
}
