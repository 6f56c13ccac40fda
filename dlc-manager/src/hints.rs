use std::path::PathBuf;

/// Configuration consumed once, at [`crate::manager::DlcManager::initialize`].
///
/// This is a plain struct, not a dynamic key/value bag: the original engine
/// constructs it from startup code, it is never hand-edited as a file on
/// disk, so the port carries no config-file crate for it.
#[derive(Debug, Clone)]
pub struct Hints {
    /// Absolute path of the append-only init log.
    pub log_file_path: PathBuf,

    /// Newline-separated list of pack names that are always ready. Names
    /// must not contain whitespace.
    pub preloaded_packs: String,

    /// Delay between remote attempts, in milliseconds.
    pub retry_connect_ms: u32,

    /// Upper bound used to size the local-scan container.
    pub max_files_to_download: usize,

    /// Per-download-task timeout, in seconds.
    pub timeout_for_download: u32,

    /// Deadline, in seconds, after which a one-shot `InitTimeout` error is
    /// emitted.
    pub timeout_for_initialization: u32,

    /// Attempts after which degradation to local-only data is allowed.
    pub skip_cdn_after_attempts: u32,

    /// Passthrough to the [`crate::downloader::Downloader`].
    pub downloader_max_handles: u32,

    /// Passthrough to the [`crate::downloader::Downloader`].
    pub downloader_chunk_buf_size: u32,

    /// If true, progress signals are emitted while the app is backgrounded.
    pub fire_signals_in_background: bool,
}

impl Default for Hints {
    fn default() -> Self {
        Self {
            log_file_path: PathBuf::from("dlc_manager.log"),
            preloaded_packs: String::new(),
            retry_connect_ms: 3_000,
            max_files_to_download: 16_384,
            timeout_for_download: 30,
            timeout_for_initialization: 60,
            skip_cdn_after_attempts: 3,
            downloader_max_handles: 4,
            downloader_chunk_buf_size: 64 * 1024,
            fire_signals_in_background: false,
        }
    }
}

/// Errno-equivalent codes that represent exhaustion of an external OS
/// handle/resource rather than an ordinary transient failure. A single
/// error in this set increments [`crate::request_manager::RequestManager`]'s
/// error counter by `maxSameErrorCounter` instead of by one, so it latches
/// the fatal state quickly.
pub const EXTERNAL_HANDLE_EXHAUSTION_ERRNOS: [i32; 6] = [
    36,  // ENAMETOOLONG
    28,  // ENOSPC
    19,  // ENODEV
    30,  // EROFS
    23,  // ENFILE
    24,  // EMFILE
];

/// How many times the ordinary error counter must accumulate before the
/// request manager emits a fatal error and stops processing.
pub const MAX_SAME_ERROR_COUNTER: u32 = 16;
