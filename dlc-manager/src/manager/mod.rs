//! C7: the public façade, [`DlcManager`], and the C4 init state machine
//! that drives it (see [`init`]).
//!
//! `DlcManager` is confined to the thread that creates it by construction,
//! not by a runtime assertion: it carries an `Rc<()>` field purely so the
//! compiler refuses to let it cross a thread boundary. The original enforces
//! the same rule with an `ASSERT(IsMainThread())` at the top of every public
//! method; here the type system makes the mistake unrepresentable instead.

pub mod init;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::downloader::{Destination, Downloader, Range, TaskId, TaskStatus};
use crate::format::LITE_PACK_TRAILER_SIZE;
use crate::fs::FileSystem;
use crate::hints::Hints;
use crate::meta_index::MetaIndex;
use crate::pack_request::{PackRequestHandle, PackRequestSnapshot};
use crate::request_manager::RequestManager;
use crate::scanner::ScanReport;
use crate::signal::{ErrorEvent, ErrorOrigin, Signals};

/// An in-flight per-file download: the temp path it's streaming to and
/// everything needed to verify it once the transfer finishes.
struct PendingDownload {
    task: TaskId,
    temp_path: PathBuf,
    final_name: String,
    compressed_size: u64,
    compressed_crc32: u32,
    started_at: Instant,
}

pub(crate) const LOCAL_FOOTER_FILE: &str = "local_footer.bin";
pub(crate) const LOCAL_FILE_TABLE_FILE: &str = "local_file_table.bin";
pub(crate) const LOCAL_META_FILE: &str = "local_meta.bin";

/// The DLC pack manager. One instance per application, constructed once,
/// owning the init state machine, the local cache index, and the pending
/// request queue.
pub struct DlcManager {
    pub(crate) hints: Hints,
    pub(crate) downloader: Box<dyn Downloader>,
    pub(crate) fs: Box<dyn FileSystem>,
    pub(crate) pack_dir: PathBuf,
    pub(crate) state: init::InitState,
    pub(crate) init_ctx: Option<init::InitContext>,
    pub(crate) signals: Signals,
    pub(crate) meta_index: Option<MetaIndex>,
    pub(crate) request_manager: RequestManager,
    pub(crate) scan_handle: Option<JoinHandle<ScanReport>>,
    pub(crate) file_table_tx: Option<Sender<Vec<crate::format::FileTableEntry>>>,
    pub(crate) network_ready_last: Option<bool>,
    download_tasks: std::collections::HashMap<PackRequestHandle, PendingDownload>,
    pub(crate) init_ready_files: usize,
    init_log: Option<std::fs::File>,
    pub(crate) in_background: bool,
    _not_send: Rc<()>,
}

impl DlcManager {
    /// Builds a manager rooted at `pack_dir`, using `downloader` for remote
    /// transport and `fs` for local I/O. Does not start initialization;
    /// call [`DlcManager::initialize`] for that.
    pub fn new(hints: Hints, downloader: Box<dyn Downloader>, fs: Box<dyn FileSystem>, pack_dir: impl Into<PathBuf>) -> Self {
        Self {
            hints,
            downloader,
            fs,
            pack_dir: pack_dir.into(),
            state: init::InitState::Starting,
            init_ctx: None,
            signals: Signals::default(),
            meta_index: None,
            request_manager: RequestManager::new(),
            scan_handle: None,
            file_table_tx: None,
            network_ready_last: None,
            download_tasks: std::collections::HashMap::new(),
            init_ready_files: 0,
            init_log: None,
            in_background: false,
            _not_send: Rc::new(()),
        }
    }

    /// False once backgrounded and `Hints::fire_signals_in_background` is
    /// also false: the gate `request_start_loading`/`request_updated` are
    /// emitted under.
    fn should_emit_request_signals(&self) -> bool {
        !self.in_background || self.hints.fire_signals_in_background
    }

    /// Appends one line to the forensic init log at `hints.log_file_path`,
    /// opening (and creating) it on first use. A failure to open or write
    /// the log is not fatal to the manager; it's only logged via `log::warn!`.
    pub(crate) fn log_line(&mut self, line: &str) {
        use std::io::Write as _;

        if self.init_log.is_none() {
            match std::fs::OpenOptions::new().create(true).append(true).open(&self.hints.log_file_path) {
                Ok(file) => self.init_log = Some(file),
                Err(e) => {
                    log::warn!("could not open init log {}: {e}", self.hints.log_file_path.display());
                    return;
                }
            }
        }

        if let Some(file) = &mut self.init_log {
            if let Err(e) = writeln!(file, "{line}") {
                log::warn!("could not write to init log: {e}");
            }
        }
    }

    /// Starts (or restarts) initialization against `base_url`. Idempotent
    /// while already initializing; a no-op once `Ready`.
    pub fn initialize(&mut self, base_url: impl Into<String>) {
        if matches!(self.state, init::InitState::Ready) {
            return;
        }
        self.state = init::InitState::Starting;
        self.init_ctx = Some(init::InitContext::new(base_url.into()));
    }

    /// True once initialization reached `Ready`.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, init::InitState::Ready)
    }

    /// True if initialization gave up entirely (no remote and no usable
    /// local cache).
    pub fn is_offline(&self) -> bool {
        matches!(self.state, init::InitState::Offline)
    }

    /// Mutable access to the signal registries subscribers connect to.
    pub fn signals_mut(&mut self) -> &mut Signals {
        &mut self.signals
    }

    /// True if `pack_name` is fully present and verified on disk. False
    /// (not an error) for an unrecognized name.
    pub fn is_pack_ready(&self, pack_name: &str) -> bool {
        let Some(index) = &self.meta_index else { return false };
        match index.index_of(pack_name) {
            Some(i) => index.is_ready(i),
            None => false,
        }
    }

    /// Total compressed byte size of `pack_name` and its dependencies, or
    /// `None` if the name is unknown or the catalog isn't loaded yet.
    pub fn pack_size(&self, pack_name: &str) -> Option<u64> {
        let index = self.meta_index.as_ref()?;
        let pack_index = index.index_of(pack_name)?;
        let mut total: u64 = index.files_of(pack_index).map(|f| f.compressed_size as u64).sum();
        for dep in index.transitive_dependencies(pack_index) {
            total += index.files_of(dep).map(|f| f.compressed_size as u64).sum::<u64>();
        }
        Some(total)
    }

    /// Queues `pack_name` (and its dependencies) for download. Returns
    /// `None` for an unrecognized pack name, matching the original's
    /// silent no-op.
    ///
    /// Requests made before the catalog is loaded are accepted and held;
    /// they're expanded against the catalog once it becomes available
    /// (see `AddDelayedRequest` in the grounding ledger), and promoted into
    /// the live queue by `MoveDelayedRequestsToQueue`.
    pub fn request_pack(&mut self, pack_name: &str, priority: i32) -> Option<PackRequestHandle> {
        let meta_index = self.meta_index.as_ref()?;
        let before_ready = !matches!(self.state, init::InitState::Ready);
        let handle = self.request_manager.push(meta_index, pack_name, priority, before_ready);
        if handle.is_some() {
            self.log_line(&format!("requested: {pack_name}"));
        }
        handle
    }

    /// Re-prioritizes a live request.
    pub fn set_priority(&mut self, handle: PackRequestHandle, priority: i32) {
        self.request_manager.set_priority(handle, priority);
    }

    /// Cancels a request. Does not affect any other request that happens to
    /// share one of its dependency packs.
    pub fn remove_pack(&mut self, handle: PackRequestHandle) {
        self.request_manager.remove(handle);
        if let Some(download) = self.download_tasks.remove(&handle) {
            self.downloader.remove_task(download.task);
        }
    }

    /// Tears the manager down: cancels the scanner thread and every
    /// in-flight download task, drops all live and delayed requests,
    /// disconnects every signal subscriber, and closes the init log.
    /// Leaves the manager in a fresh `Starting` state; call
    /// [`DlcManager::initialize`] again to restart.
    pub fn deinitialize(&mut self) {
        self.file_table_tx = None;
        if let Some(handle) = self.scan_handle.take() {
            let _ = handle.join();
        }

        if let init::InitState::GetFooter(task) | init::InitState::GetFileTable(task) | init::InitState::GetMeta(task) =
            self.state.clone()
        {
            self.downloader.remove_task(task);
        }
        let tasks: Vec<TaskId> = self.download_tasks.values().map(|d| d.task).collect();
        for task in tasks {
            self.downloader.remove_task(task);
        }
        self.download_tasks.clear();

        self.request_manager = RequestManager::new();
        self.signals.disconnect_all();
        self.init_log = None;
        self.state = init::InitState::Starting;
        self.init_ctx = None;
        self.meta_index = None;
        self.network_ready_last = None;
        self.init_ready_files = 0;
        self.in_background = false;
    }

    /// A snapshot of a request's current state, if it's still tracked.
    pub fn request_snapshot(&self, handle: PackRequestHandle) -> Option<PackRequestSnapshot> {
        self.request_manager.get(handle).map(|r| r.snapshot())
    }

    /// Drives one step of whichever request is highest priority: starts its
    /// next file download if idle, or polls the in-flight one.
    pub(crate) fn service_requests(&mut self) {
        let Some(handle) = self.request_manager.peek_next() else { return };

        if let Some(task) = self.download_tasks.get(&handle).map(|d| d.task) {
            self.poll_download(handle, task);
            return;
        }

        let Some(pending) = self.request_manager.pop_pending_file(handle) else { return };
        let base_url = self.init_ctx.as_ref().map(|c| c.base_url.clone()).unwrap_or_default();
        let temp_path = self.pack_dir.join(format!("{}.part", pending.name));
        if let Some(parent) = temp_path.parent() {
            let _ = self.fs.create_directory(parent);
        }

        if self.should_emit_request_signals() {
            if let Some(snapshot) = self.request_manager.get(handle).map(|r| r.snapshot()) {
                self.signals.request_start_loading.emit(&snapshot);
            }
        }

        // Per §4.5, the fetched range covers the compressed payload plus
        // its trailing LitePack trailer, against the single superpack blob.
        let end = pending.start_position + pending.compressed_size + LITE_PACK_TRAILER_SIZE as u64 - 1;
        let task = self.downloader.start(
            &base_url,
            Range { start: pending.start_position, end },
            Destination::File(temp_path.clone()),
        );
        self.download_tasks.insert(
            handle,
            PendingDownload {
                task,
                temp_path,
                final_name: pending.name,
                compressed_size: pending.compressed_size,
                compressed_crc32: pending.compressed_crc32,
                started_at: Instant::now(),
            },
        );
    }

    fn poll_download(&mut self, handle: PackRequestHandle, task: TaskId) {
        let timeout = Duration::from_secs(self.hints.timeout_for_download as u64);
        if self.download_tasks.get(&handle).is_some_and(|d| d.started_at.elapsed() >= timeout) {
            self.downloader.remove_task(task);
            if let Some(download) = self.download_tasks.remove(&handle) {
                let _ = self.fs.delete_file(&download.temp_path);
            }
            let fatal = self.fail_download(handle, -1);
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::Download,
                code: -1,
                detail: format!("download timed out after {}s", self.hints.timeout_for_download),
            });
            if fatal {
                self.request_manager.remove(handle);
            }
            return;
        }

        match self.downloader.task_status(task) {
            TaskStatus::InProgress { .. } => {}
            TaskStatus::Finished { .. } => {
                self.downloader.remove_task(task);
                let Some(download) = self.download_tasks.remove(&handle) else { return };
                self.finish_download(handle, download);
            }
            TaskStatus::Failed { detail, errno } => {
                self.downloader.remove_task(task);
                if let Some(download) = self.download_tasks.remove(&handle) {
                    let _ = self.fs.delete_file(&download.temp_path);
                }
                let fatal = self.fail_download(handle, errno.unwrap_or(-1));
                self.signals.error.emit(&ErrorEvent { origin: ErrorOrigin::Download, code: errno.unwrap_or(-1), detail });
                if fatal {
                    self.request_manager.remove(handle);
                }
            }
        }
    }

    /// Reads the trailer from the just-downloaded temp file and verifies it
    /// against the file table entry before committing anything: a mismatch
    /// here means the bytes on the wire don't match what the superpack
    /// claims, and must never be mistaken for a completed download.
    fn finish_download(&mut self, handle: PackRequestHandle, download: PendingDownload) {
        let bytes = match self.fs.read(&download.temp_path) {
            Ok(b) => b,
            Err(e) => {
                self.emit_io_error(&download.temp_path, e);
                if self.fail_download(handle, -1) {
                    self.request_manager.remove(handle);
                }
                return;
            }
        };

        let valid = bytes.len() >= LITE_PACK_TRAILER_SIZE
            && match crate::format::parse_lite_pack_trailer(&bytes[bytes.len() - LITE_PACK_TRAILER_SIZE..]) {
                Ok(trailer) => {
                    trailer.crc32_compressed == download.compressed_crc32
                        && trailer.size_compressed as u64 == download.compressed_size
                }
                Err(_) => false,
            };

        if !valid {
            let _ = self.fs.delete_file(&download.temp_path);
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::Codec,
                code: 0,
                detail: format!("{}: downloaded trailer failed verification", download.final_name),
            });
            if self.fail_download(handle, 0) {
                self.request_manager.remove(handle);
            }
            return;
        }

        let final_path = self.pack_dir.join(&download.final_name);
        if let Err(e) = self.fs.rename(&download.temp_path, &final_path) {
            let errno = e.raw_os_error().unwrap_or(-1);
            self.emit_io_error(&final_path, e);
            if self.fail_download(handle, errno) {
                self.request_manager.remove(handle);
            }
            return;
        }

        self.request_manager.reset_error_counter();
        self.request_manager.record_progress(handle, download.compressed_size);

        if let Some(index) = &mut self.meta_index {
            if let Some(file_index) = index.file_index_of(&download.final_name) {
                index.set_file_ready(file_index);
            }
        }

        if self.should_emit_request_signals() {
            if let Some(snapshot) = self.request_manager.get(handle).map(|r| r.snapshot()) {
                self.signals.request_updated.emit(&snapshot);
            }
        }
    }

    /// Feeds `errno` into the sticky error counter and marks the request
    /// errored. Returns `true` once the error streak just became fatal; the
    /// caller is responsible for dropping the request and emitting any
    /// signal, since what counts as "the" error differs by failure site.
    fn fail_download(&mut self, handle: PackRequestHandle, errno: i32) -> bool {
        self.request_manager.record_error(handle, errno)
    }
}

/// Builds a manager whose pack directory write-access check is known to
/// succeed and whose filesystem is the real one: the common construction
/// path for application code. Equivalent to calling [`DlcManager::new`]
/// with [`crate::fs::StdFileSystem`].
pub fn with_std_fs(hints: Hints, downloader: Box<dyn Downloader>, pack_dir: impl AsRef<Path>) -> DlcManager {
    DlcManager::new(hints, downloader, Box::new(crate::fs::StdFileSystem), pack_dir.as_ref().to_path_buf())
}
