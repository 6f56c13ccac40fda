//! C5: the priority queue of [`crate::pack_request::PackRequest`]s plus the
//! sticky error counter that decides when repeated download failures
//! become fatal.
//!
//! Requests raised before the manager reaches `Ready` are held in a
//! separate `delayed` list and only promoted into the live queue by
//! [`RequestManager::move_delayed_to_queue`]: the init state machine's
//! `MoveDelayedRequestsToQueue` phase calls this exactly once. This
//! replaces the original's trick of constructing requests in place and
//! later swapping their contents: here a delayed request already has its
//! final [`PackRequestHandle`], so promoting it is just moving the handle
//! from one list to another.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::hints::{EXTERNAL_HANDLE_EXHAUSTION_ERRNOS, MAX_SAME_ERROR_COUNTER};
use crate::meta_index::MetaIndex;
use crate::pack_request::{PackRequest, PackRequestHandle, PendingFile, RequestState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueEntry {
    priority: i32,
    handle: PackRequestHandle,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Owns every live and delayed [`PackRequest`], and the priority order in
/// which their files should be downloaded next.
#[derive(Default)]
pub struct RequestManager {
    requests: HashMap<PackRequestHandle, PackRequest>,
    queue: BinaryHeap<QueueEntry>,
    delayed: Vec<PackRequestHandle>,
    next_handle: u32,
    last_error_code: Option<i32>,
    same_error_count: u32,
}

impl RequestManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// True when there are no live, queued, or delayed requests.
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.delayed.is_empty()
    }

    /// True when `handle` is currently tracked, live or delayed.
    pub fn is_in_queue(&self, handle: PackRequestHandle) -> bool {
        self.requests.contains_key(&handle)
    }

    fn allocate_handle(&mut self) -> PackRequestHandle {
        self.next_handle += 1;
        PackRequestHandle(self.next_handle)
    }

    /// Expands `pack_name` plus its transitive dependencies into pending
    /// files, skipping files [`MetaIndex`] already considers ready, and
    /// registers the result as a new request at `priority`.
    ///
    /// Returns `None` if `pack_name` isn't in the catalog (the original
    /// treats an unknown pack name as a silent no-op rather than an error).
    pub fn push(
        &mut self,
        meta_index: &MetaIndex,
        pack_name: &str,
        priority: i32,
        ready_before_init: bool,
    ) -> Option<PackRequestHandle> {
        let pack_index = meta_index.index_of(pack_name)?;

        let mut involved = vec![pack_index];
        involved.extend(meta_index.transitive_dependencies(pack_index));

        let mut pending_files = VecDeque::new();
        let mut seen_names = HashSet::new();
        for index in &involved {
            for (file_index, file) in meta_index.file_indices_of(*index) {
                if meta_index.is_file_ready(file_index) {
                    continue;
                }
                if seen_names.insert(file.name.clone()) {
                    pending_files.push_back(PendingFile {
                        name: file.name.clone(),
                        meta_index: file.meta_index,
                        start_position: file.start_position,
                        compressed_size: file.compressed_size as u64,
                        compressed_crc32: file.compressed_crc32,
                    });
                }
            }
        }

        let handle = self.allocate_handle();
        let request = PackRequest::new(handle, pack_name.to_string(), priority, pending_files);
        let is_done = request.pending_files.is_empty();
        self.requests.insert(handle, request);

        if is_done {
            self.requests.get_mut(&handle).expect("just inserted").state = RequestState::Done;
        } else if ready_before_init {
            self.delayed.push(handle);
        } else {
            self.queue.push(QueueEntry { priority, handle });
        }

        Some(handle)
    }

    /// Promotes every delayed request into the live queue, in the order
    /// they were originally pushed. Called once, when initialization
    /// reaches `Ready`.
    pub fn move_delayed_to_queue(&mut self) {
        for handle in self.delayed.drain(..) {
            if let Some(request) = self.requests.get(&handle) {
                if !request.is_done() {
                    self.queue.push(QueueEntry {
                        priority: request.priority,
                        handle,
                    });
                }
            }
        }
    }

    /// Updates a live request's priority, re-ordering the queue.
    pub fn set_priority(&mut self, handle: PackRequestHandle, priority: i32) {
        if let Some(request) = self.requests.get_mut(&handle) {
            request.priority = priority;
            let mut rebuilt: BinaryHeap<QueueEntry> = self
                .queue
                .drain()
                .map(|entry| if entry.handle == handle { QueueEntry { priority, handle } } else { entry })
                .collect();
            std::mem::swap(&mut self.queue, &mut rebuilt);
        }
    }

    /// Drops a request entirely, live or delayed. Unlike the original's
    /// `RemovePack`, this never touches the request's dependencies: each
    /// dependency pack remains tracked under its own request if one exists.
    pub fn remove(&mut self, handle: PackRequestHandle) {
        self.requests.remove(&handle);
        self.delayed.retain(|h| *h != handle);
        if !self.queue.is_empty() {
            let rebuilt: BinaryHeap<QueueEntry> =
                self.queue.drain().filter(|entry| entry.handle != handle).collect();
            self.queue = rebuilt;
        }
    }

    /// The highest-priority request with at least one pending file, without
    /// removing it from the queue.
    pub fn peek_next(&self) -> Option<PackRequestHandle> {
        self.queue.peek().map(|entry| entry.handle)
    }

    /// Borrows a tracked request, live or delayed.
    pub fn get(&self, handle: PackRequestHandle) -> Option<&PackRequest> {
        self.requests.get(&handle)
    }

    /// Mutably borrows a tracked request, live or delayed.
    pub fn get_mut(&mut self, handle: PackRequestHandle) -> Option<&mut PackRequest> {
        self.requests.get_mut(&handle)
    }

    /// Pops the next pending file for `handle`, if any remain, marking the
    /// request `Downloading`.
    pub fn pop_pending_file(&mut self, handle: PackRequestHandle) -> Option<PendingFile> {
        let request = self.requests.get_mut(&handle)?;
        let file = request.pending_files.pop_front();
        if file.is_some() {
            request.state = RequestState::Downloading;
        }
        file
    }

    /// Records `bytes` downloaded toward `handle`'s total, marking it
    /// `Done` once no pending files and no outstanding bytes remain.
    pub fn record_progress(&mut self, handle: PackRequestHandle, bytes: u64) {
        if let Some(request) = self.requests.get_mut(&handle) {
            request.downloaded_bytes += bytes;
            if request.pending_files.is_empty() {
                request.state = RequestState::Done;
                self.queue = self.queue.drain().filter(|e| e.handle != handle).collect();
            }
        }
    }

    /// Marks `handle` as errored and requeues it if the failure wasn't
    /// fatal. Returns `true` when the accumulated error streak just became
    /// fatal (the caller should emit an `error` signal and stop retrying).
    pub fn record_error(&mut self, handle: PackRequestHandle, errno: i32) -> bool {
        if let Some(request) = self.requests.get_mut(&handle) {
            request.state = RequestState::Errored;
        }
        self.count_error(errno)
    }

    /// Feeds one observed errno into the sticky error counter. Same errno
    /// as last time accumulates; a different one resets the streak. An
    /// errno from [`EXTERNAL_HANDLE_EXHAUSTION_ERRNOS`] jumps straight to
    /// the fatal threshold instead of incrementing by one, matching the
    /// original's `errorForExternalHandle` fast-path.
    pub fn count_error(&mut self, errno: i32) -> bool {
        let increment = if EXTERNAL_HANDLE_EXHAUSTION_ERRNOS.contains(&errno) {
            MAX_SAME_ERROR_COUNTER
        } else {
            1
        };

        if self.last_error_code == Some(errno) {
            self.same_error_count += increment;
        } else {
            self.last_error_code = Some(errno);
            self.same_error_count = increment;
        }

        self.same_error_count >= MAX_SAME_ERROR_COUNTER
    }

    /// Resets the sticky error counter, e.g. after a successful download.
    pub fn reset_error_counter(&mut self) {
        self.last_error_code = None;
        self.same_error_count = 0;
    }
}
