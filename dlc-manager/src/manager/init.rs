//! C4: the initialization state machine. `DlcManager::update` dispatches on
//! [`InitState`] exactly once per call, the same shape as the original's
//! `ContinueInitialization` dispatch table, just expressed as a Rust `match`
//! instead of a function-pointer table.

use std::path::Path;
use std::time::{Duration, Instant};

use crossbeam_channel::bounded;

use crate::downloader::{Destination, Range, TaskId, TaskStatus};
use crate::error::ManagerError;
use crate::format::footer::FOOTER_SIZE;
use crate::format::{self, Compression, Footer};
use crate::manager::{DlcManager, LOCAL_FILE_TABLE_FILE, LOCAL_FOOTER_FILE, LOCAL_META_FILE};
use crate::meta_index::MetaIndex;
use crate::signal::{ErrorEvent, ErrorOrigin, InitializeFinished};

/// Where initialization currently stands. Ready and Offline are terminal:
/// once reached, `update` is a no-op (besides servicing request-manager
/// work, once `Ready`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitState {
    Starting,
    AskFooter,
    GetFooter(TaskId),
    AskFileTable,
    GetFileTable(TaskId),
    CalculateLocalDbHashAndCompare,
    AskMeta,
    GetMeta(TaskId),
    UnpackingDb,
    LoadPacksDataFromLocalMeta,
    WaitScanThreadToFinish,
    MoveDelayedRequestsToQueue,
    Ready,
    /// Terminal failure state: no remote data and no usable local cache.
    Offline,
}

pub(super) struct InitContext {
    /// URL of the single superpack blob. Every ranged GET during
    /// initialization and download targets this one URL.
    pub(super) base_url: String,
    pub(super) started_at: Instant,
    pub(super) last_attempt_at: Option<Instant>,
    pub(super) attempts: u32,
    /// Total size of the superpack blob, learned from `AskFooter`'s
    /// `get_content_size` call; everything else is located by subtracting
    /// known block sizes from this.
    pub(super) total_size: Option<u64>,
    pub(super) remote_footer: Option<Footer>,
    pub(super) file_table_bytes: Option<Vec<u8>>,
    pub(super) meta_bytes: Option<Vec<u8>>,
}

impl InitContext {
    pub(super) fn new(base_url: String) -> Self {
        Self {
            base_url,
            started_at: Instant::now(),
            last_attempt_at: None,
            attempts: 0,
            total_size: None,
            remote_footer: None,
            file_table_bytes: None,
            meta_bytes: None,
        }
    }
}

impl DlcManager {
    /// Advances the init state machine by at most one transition, then
    /// services the request queue if already `Ready`. Intended to be called
    /// once per frame/tick.
    ///
    /// `in_background` records whether the host application is currently
    /// backgrounded; when it is, and `Hints::fire_signals_in_background` is
    /// false, `request_start_loading`/`request_updated` are suppressed for
    /// the duration (downloads still progress, only the signals are muted).
    pub fn update(&mut self, in_background: bool) {
        self.in_background = in_background;

        if self.init_ctx.is_none() && !matches!(self.state, InitState::Ready | InitState::Offline) {
            // `initialize` hasn't been called yet; nothing to drive.
            return;
        }

        if self.check_init_timeout() {
            return;
        }

        let next = match self.state.clone() {
            InitState::Starting => self.step_starting(),
            InitState::AskFooter => self.step_ask_footer(),
            InitState::GetFooter(task) => self.step_get_footer(task),
            InitState::AskFileTable => self.step_ask_file_table(),
            InitState::GetFileTable(task) => self.step_get_file_table(task),
            InitState::CalculateLocalDbHashAndCompare => self.step_calculate_local_db_hash(),
            InitState::AskMeta => self.step_ask_meta(),
            InitState::GetMeta(task) => self.step_get_meta(task),
            InitState::UnpackingDb => self.step_unpacking_db(),
            InitState::LoadPacksDataFromLocalMeta => self.step_load_packs_data_from_local_meta(),
            InitState::WaitScanThreadToFinish => self.step_wait_scan_thread(),
            InitState::MoveDelayedRequestsToQueue => self.step_move_delayed_requests(),
            InitState::Ready => {
                self.service_requests();
                None
            }
            InitState::Offline => None,
        };

        if let Some(state) = next {
            log::debug!("dlc-manager init: {:?} -> {:?}", self.state, state);
            let line = format!("initState: {:?} -> {:?}", self.state, state);
            self.log_line(&line);
            self.state = state;
        }
    }

    fn check_init_timeout(&mut self) -> bool {
        if matches!(self.state, InitState::Ready | InitState::Offline) {
            return false;
        }
        let Some(ctx) = &self.init_ctx else { return false };
        let deadline = Duration::from_secs(self.hints.timeout_for_initialization as u64);
        if ctx.started_at.elapsed() >= deadline {
            let millis = deadline.as_millis() as u64;
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::InitTimeout,
                code: 0,
                detail: format!("initialization timed out after {millis}ms"),
            });
            self.state = InitState::Offline;
            true
        } else {
            false
        }
    }

    fn ready_to_retry(&mut self) -> bool {
        let ctx = self.init_ctx.as_mut().expect("init in progress");
        match ctx.last_attempt_at {
            None => true,
            Some(last) => last.elapsed() >= Duration::from_millis(self.hints.retry_connect_ms as u64),
        }
    }

    fn mark_attempt(&mut self) {
        let ctx = self.init_ctx.as_mut().expect("init in progress");
        ctx.attempts += 1;
        ctx.last_attempt_at = Some(Instant::now());
    }

    fn should_degrade_to_local(&self) -> bool {
        let Some(ctx) = &self.init_ctx else { return false };
        ctx.attempts >= self.hints.skip_cdn_after_attempts
    }

    fn step_starting(&mut self) -> Option<InitState> {
        if let Err(e) = crate::fs::test_write_access(self.fs.as_ref(), &self.pack_dir) {
            let pack_dir = self.pack_dir.clone();
            self.emit_io_error(&pack_dir, e);
            return Some(InitState::Offline);
        }

        let (tx, rx) = bounded(1);
        self.file_table_tx = Some(tx);
        self.scan_handle =
            Some(crate::scanner::spawn(self.pack_dir.clone(), rx, self.hints.max_files_to_download));

        Some(InitState::AskFooter)
    }

    /// Learns the superpack blob's total size, then launches a ranged GET
    /// for its trailing footer-sized window: `[total_size - FOOTER_SIZE,
    /// total_size)`. Every later block is located relative to this same
    /// total size, against this same URL.
    fn step_ask_footer(&mut self) -> Option<InitState> {
        if !self.ready_to_retry() {
            return None;
        }
        self.mark_attempt();

        let url = self.init_ctx.as_ref().unwrap().base_url.clone();
        let total_size = match self.downloader.get_content_size(&url) {
            Ok(size) => size,
            Err(detail) => {
                self.signals.error.emit(&ErrorEvent { origin: ErrorOrigin::Download, code: -1, detail });
                return self.retry_or_degrade();
            }
        };

        if total_size < FOOTER_SIZE as u64 {
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::Codec,
                code: 0,
                detail: format!("superpack at {url} is only {total_size} bytes, too small for a footer"),
            });
            return self.retry_or_degrade();
        }

        self.init_ctx.as_mut().unwrap().total_size = Some(total_size);
        let start = total_size - FOOTER_SIZE as u64;
        let task = self.downloader.start(&url, Range { start, end: total_size - 1 }, Destination::Memory);
        Some(InitState::GetFooter(task))
    }

    fn step_get_footer(&mut self, task: TaskId) -> Option<InitState> {
        match self.downloader.task_status(task) {
            TaskStatus::InProgress { .. } => None,
            TaskStatus::Finished { buffer: Some(bytes) } => {
                self.downloader.remove_task(task);
                match format::parse_footer(&bytes) {
                    Ok(footer) => {
                        self.init_ctx.as_mut().unwrap().remote_footer = Some(footer);
                        self.emit_network_ready(true);
                        Some(InitState::AskFileTable)
                    }
                    Err(e) => {
                        self.emit_codec_error(e);
                        self.retry_or_degrade()
                    }
                }
            }
            TaskStatus::Finished { buffer: None } | TaskStatus::Failed { .. } => {
                self.downloader.remove_task(task);
                self.retry_or_degrade()
            }
        }
    }

    /// Every remote attempt that reaches this function has just failed:
    /// emits the falling edge of `network_ready` before deciding whether to
    /// degrade to local-only data or retry from `AskFooter`.
    fn retry_or_degrade(&mut self) -> Option<InitState> {
        self.emit_network_ready(false);
        if self.should_degrade_to_local() && self.has_local_cache() {
            Some(InitState::LoadPacksDataFromLocalMeta)
        } else if self.should_degrade_to_local() {
            Some(InitState::Offline)
        } else {
            Some(InitState::AskFooter)
        }
    }

    /// Translates a codec failure into the internal [`ManagerError`] the
    /// crate's `Result`-returning boundary is built around, then surfaces it
    /// as an `error` signal. Codec errors are never fatal on their own: the
    /// caller still runs its own retry/degrade policy afterward.
    pub(super) fn emit_codec_error(&mut self, err: crate::error::CodecError) {
        let err = ManagerError::from(err);
        self.signals.error.emit(&ErrorEvent {
            origin: ErrorOrigin::Codec,
            code: 0,
            detail: err.to_string(),
        });
    }

    /// Same translation for a local I/O failure.
    pub(super) fn emit_io_error(&mut self, path: &Path, err: std::io::Error) {
        let code = err.raw_os_error().unwrap_or(0);
        let err = ManagerError::io(path.to_path_buf(), err);
        self.signals.error.emit(&ErrorEvent {
            origin: ErrorOrigin::FileIo,
            code,
            detail: err.to_string(),
        });
    }

    fn has_local_cache(&self) -> bool {
        self.fs.is_file(&self.pack_dir.join(LOCAL_FOOTER_FILE))
            && self.fs.is_file(&self.pack_dir.join(LOCAL_FILE_TABLE_FILE))
            && self.fs.is_file(&self.pack_dir.join(LOCAL_META_FILE))
    }

    /// The `FileTable` block sits immediately before `Meta` and the footer
    /// at the end of the blob: its start is `total_size` minus the footer,
    /// `Meta`, and `FileTable` sizes, all known from the footer just parsed.
    fn step_ask_file_table(&mut self) -> Option<InitState> {
        let ctx = self.init_ctx.as_ref().unwrap();
        let footer = ctx.remote_footer.as_ref().unwrap();
        let total_size = ctx.total_size.unwrap();
        let files_table_size = footer.info.files_table_size as u64;
        let meta_data_size = footer.info.meta_data_size as u64;

        let Some(start) = total_size.checked_sub(FOOTER_SIZE as u64 + meta_data_size + files_table_size) else {
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::Codec,
                code: 0,
                detail: "footer block sizes exceed the superpack's total size".into(),
            });
            return self.retry_or_degrade();
        };
        let end = start + files_table_size.saturating_sub(1);
        let url = ctx.base_url.clone();
        let task = self.downloader.start(&url, Range { start, end }, Destination::Memory);
        Some(InitState::GetFileTable(task))
    }

    fn step_get_file_table(&mut self, task: TaskId) -> Option<InitState> {
        match self.downloader.task_status(task) {
            TaskStatus::InProgress { .. } => None,
            TaskStatus::Finished { buffer: Some(bytes) } => {
                self.downloader.remove_task(task);
                let footer = self.init_ctx.as_ref().unwrap().remote_footer.clone().unwrap();
                match format::parse_file_table(&bytes, footer.info.files_table_crc32) {
                    Ok(_) => {
                        self.init_ctx.as_mut().unwrap().file_table_bytes = Some(bytes);
                        self.emit_network_ready(true);
                        Some(InitState::CalculateLocalDbHashAndCompare)
                    }
                    Err(e) => {
                        self.emit_codec_error(e);
                        self.retry_or_degrade()
                    }
                }
            }
            TaskStatus::Finished { buffer: None } | TaskStatus::Failed { .. } => {
                self.downloader.remove_task(task);
                self.retry_or_degrade()
            }
        }
    }

    /// Compares the newly-fetched footer against whatever footer is cached
    /// locally from a previous run. An identical footer means the server's
    /// content hasn't changed since last time, so the already-unpacked
    /// local `Meta`/`FileTable` can be reused without downloading `Meta`
    /// again.
    fn step_calculate_local_db_hash(&mut self) -> Option<InitState> {
        let remote = format::write_footer(self.init_ctx.as_ref().unwrap().remote_footer.as_ref().unwrap());
        let local = self.fs.read(&self.pack_dir.join(LOCAL_FOOTER_FILE)).ok();

        if local.as_deref() == Some(remote.as_slice()) && self.has_local_cache() {
            Some(InitState::LoadPacksDataFromLocalMeta)
        } else {
            Some(InitState::AskMeta)
        }
    }

    /// `Meta` sits between `FileTable` and the footer: its start is
    /// `total_size` minus the footer and `Meta` sizes.
    fn step_ask_meta(&mut self) -> Option<InitState> {
        let ctx = self.init_ctx.as_ref().unwrap();
        let footer = ctx.remote_footer.as_ref().unwrap();
        let total_size = ctx.total_size.unwrap();
        let meta_data_size = footer.info.meta_data_size as u64;

        let Some(start) = total_size.checked_sub(FOOTER_SIZE as u64 + meta_data_size) else {
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::Codec,
                code: 0,
                detail: "meta block size exceeds the superpack's total size".into(),
            });
            return self.retry_or_degrade();
        };
        let end = start + meta_data_size.saturating_sub(1);
        let url = ctx.base_url.clone();
        let task = self.downloader.start(&url, Range { start, end }, Destination::Memory);
        Some(InitState::GetMeta(task))
    }

    fn step_get_meta(&mut self, task: TaskId) -> Option<InitState> {
        match self.downloader.task_status(task) {
            TaskStatus::InProgress { .. } => None,
            TaskStatus::Finished { buffer: Some(bytes) } => {
                self.downloader.remove_task(task);
                let footer = self.init_ctx.as_ref().unwrap().remote_footer.clone().unwrap();
                match format::parse_meta(&bytes, footer.info.meta_data_crc32) {
                    Ok(_) => {
                        self.init_ctx.as_mut().unwrap().meta_bytes = Some(bytes);
                        self.emit_network_ready(true);
                        Some(InitState::UnpackingDb)
                    }
                    Err(e) => {
                        self.emit_codec_error(e);
                        self.retry_or_degrade()
                    }
                }
            }
            TaskStatus::Finished { buffer: None } | TaskStatus::Failed { .. } => {
                self.downloader.remove_task(task);
                self.retry_or_degrade()
            }
        }
    }

    /// Persists the freshly-negotiated footer/file-table/meta blocks to the
    /// local cache so a later launch can skip straight to
    /// `LoadPacksDataFromLocalMeta` if the server's footer hasn't changed.
    ///
    /// Block-level compression (`files_table_compression`) is only
    /// supported as `Compression::None` here: the manager's own metadata
    /// blocks are never shipped compressed in practice, only the
    /// per-file payloads they describe are, and those are decompressed by
    /// the engine's asset loader, not this crate.
    fn step_unpacking_db(&mut self) -> Option<InitState> {
        let ctx = self.init_ctx.as_ref().unwrap();
        let footer = ctx.remote_footer.as_ref().unwrap();
        if footer.info.files_table_compression != Compression::None {
            self.signals.error.emit(&ErrorEvent {
                origin: ErrorOrigin::Codec,
                code: 0,
                detail: "compressed FileTable blocks are not supported".into(),
            });
            return Some(InitState::Offline);
        }

        let footer_bytes = format::write_footer(footer);
        let file_table_bytes = ctx.file_table_bytes.clone().unwrap();
        let meta_bytes = ctx.meta_bytes.clone().unwrap();

        for (name, bytes) in [
            (LOCAL_FOOTER_FILE, &footer_bytes),
            (LOCAL_FILE_TABLE_FILE, &file_table_bytes),
            (LOCAL_META_FILE, &meta_bytes),
        ] {
            if let Err(e) = self.fs.write(&self.pack_dir.join(name), bytes) {
                let path = self.pack_dir.join(name);
                self.emit_io_error(&path, e);
                return Some(InitState::Offline);
            }
        }

        Some(InitState::LoadPacksDataFromLocalMeta)
    }

    fn step_load_packs_data_from_local_meta(&mut self) -> Option<InitState> {
        let file_table_bytes = match self.fs.read(&self.pack_dir.join(LOCAL_FILE_TABLE_FILE)) {
            Ok(b) => b,
            Err(e) => {
                let pack_dir = self.pack_dir.clone();
                self.emit_io_error(&pack_dir, e);
                return Some(InitState::Offline);
            }
        };
        let meta_bytes = match self.fs.read(&self.pack_dir.join(LOCAL_META_FILE)) {
            Ok(b) => b,
            Err(e) => {
                let pack_dir = self.pack_dir.clone();
                self.emit_io_error(&pack_dir, e);
                return Some(InitState::Offline);
            }
        };
        let footer_bytes = self.fs.read(&self.pack_dir.join(LOCAL_FOOTER_FILE)).ok();

        let (files_crc, meta_crc) = match footer_bytes.as_deref().map(format::parse_footer) {
            Some(Ok(footer)) => (footer.info.files_table_crc32, footer.info.meta_data_crc32),
            _ => (format::crc32::crc32(&file_table_bytes), format::crc32::crc32(&meta_bytes)),
        };

        let entries = match format::parse_file_table(&file_table_bytes, files_crc) {
            Ok(e) => e,
            Err(e) => {
                self.emit_codec_error(e);
                return Some(InitState::Offline);
            }
        };
        let meta = match format::parse_meta(&meta_bytes, meta_crc) {
            Ok(m) => m,
            Err(e) => {
                self.emit_codec_error(e);
                return Some(InitState::Offline);
            }
        };

        self.meta_index = Some(MetaIndex::new(meta, entries.clone()));

        match self.file_table_tx.take() {
            Some(tx) => {
                let _ = tx.send(entries);
            }
            None => {}
        }

        Some(InitState::WaitScanThreadToFinish)
    }

    fn step_wait_scan_thread(&mut self) -> Option<InitState> {
        let Some(handle) = &self.scan_handle else {
            return Some(InitState::MoveDelayedRequestsToQueue);
        };
        if !handle.is_finished() {
            return None;
        }
        let handle = self.scan_handle.take().unwrap();
        let report = handle.join().unwrap_or_default();

        self.init_ready_files = report.reconciled.len();

        let meta_index = self.meta_index.as_mut().expect("meta index loaded before scan completes");
        for file in &report.reconciled {
            if let Some(file_index) = meta_index.file_index_of(&file.name) {
                meta_index.set_file_ready(file_index);
            }
        }

        self.apply_preloaded_packs();

        Some(InitState::MoveDelayedRequestsToQueue)
    }

    /// Marks every pack named in `hints.preloaded_packs` ready, regardless
    /// of what the scan found: these are packs the build is expected to
    /// ship with, not ones the manager should ever need to download (see
    /// `FillPreloadedPacks` in the grounding ledger).
    fn apply_preloaded_packs(&mut self) {
        let Some(meta_index) = &mut self.meta_index else { return };
        for name in self.hints.preloaded_packs.lines().map(str::trim).filter(|s| !s.is_empty()) {
            if let Some(index) = meta_index.index_of(name) {
                meta_index.set_ready(index);
            }
        }
    }

    fn step_move_delayed_requests(&mut self) -> Option<InitState> {
        self.request_manager.move_delayed_to_queue();

        let meta_index = self.meta_index.as_ref().expect("loaded before Ready");
        self.signals.initialize_finished.emit(&InitializeFinished {
            downloaded_files: self.init_ready_files,
            total_files: meta_index.files().len(),
        });
        self.emit_network_ready(true);

        Some(InitState::Ready)
    }

    pub(super) fn emit_network_ready(&mut self, ready: bool) {
        if self.network_ready_last != Some(ready) {
            self.network_ready_last = Some(ready);
            self.signals.network_ready.emit(&ready);
        }
    }
}
