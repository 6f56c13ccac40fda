//! The `Downloader` seam: everything the manager needs from a remote
//! transport, kept abstract so the core crate never depends on an HTTP
//! stack directly. `dlc-manager-http` provides the reference
//! implementation; tests use the in-memory mock behind `test-support`.

use std::path::PathBuf;

/// A byte range request, inclusive on both ends, matching an HTTP `Range:
/// bytes=start-end` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    /// First byte to fetch, inclusive.
    pub start: u64,
    /// Last byte to fetch, inclusive.
    pub end: u64,
}

impl Range {
    /// Number of bytes covered by this range.
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// True if this range covers zero bytes (it never should; `end` must be
    /// `>= start` for `Range` to be meaningful).
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Where a download task's bytes should land.
pub enum Destination {
    /// Buffer the whole response in memory and hand it back as a `Vec<u8>`
    /// (used for small blocks: `Footer`, `FileTable`, `Meta`).
    Memory,
    /// Stream the response straight to a file path (used for per-file pack
    /// downloads).
    File(PathBuf),
}

/// Current status of a task started with [`Downloader::start`].
#[derive(Debug, Clone)]
pub enum TaskStatus {
    /// Still in flight.
    InProgress {
        /// Bytes received so far.
        downloaded: u64,
        /// Total bytes expected, if known.
        total: Option<u64>,
    },
    /// Finished successfully. For [`Destination::Memory`] tasks, carries the
    /// buffered bytes.
    Finished {
        /// Buffered bytes, present only for [`Destination::Memory`] tasks.
        buffer: Option<Vec<u8>>,
    },
    /// Finished with an error. `errno` mirrors an OS error code where one
    /// is available (e.g. from a local I/O failure surfaced through the
    /// transport), otherwise `None`.
    Failed {
        /// Human-readable detail, surfaced via `ManagerError::Download`.
        detail: String,
        /// OS error code, when the failure maps to one.
        errno: Option<i32>,
    },
}

/// Opaque identity of a download task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

/// The remote-transport seam. Implementors own their own connection
/// pooling, retry policy below the single-attempt level, and thread usage;
/// the manager only calls `start`, polls `task_status`, and eventually
/// calls `remove_task`.
pub trait Downloader {
    /// Fetches the total size of the content at `url`, if the transport can
    /// determine it cheaply (e.g. `HEAD` or a response `Content-Length`)
    /// without downloading the body.
    fn get_content_size(&self, url: &str) -> Result<u64, String>;

    /// Starts a new download task for `range` of `url`, writing to
    /// `destination`. Returns immediately; progress is polled via
    /// `task_status`.
    fn start(&mut self, url: &str, range: Range, destination: Destination) -> TaskId;

    /// Polls a task's current status. Calling this after the task reached
    /// `Finished` or `Failed` keeps returning the same terminal status
    /// until `remove_task` is called.
    fn task_status(&mut self, task: TaskId) -> TaskStatus;

    /// Releases resources associated with a finished or abandoned task.
    fn remove_task(&mut self, task: TaskId);
}

#[cfg(any(test, feature = "test-support"))]
pub mod mock {
    //! An in-memory [`Downloader`] for tests: every `start` call completes
    //! immediately against a fixed table of `url -> bytes` the test
    //! populates up front.

    use super::*;
    use std::collections::HashMap;

    /// A [`Downloader`] that serves pre-registered byte buffers from
    /// memory and never actually touches the network.
    #[derive(Default)]
    pub struct MockDownloader {
        content: HashMap<String, Vec<u8>>,
        next_task: u64,
        finished: HashMap<u64, TaskStatus>,
        fail_urls: std::collections::HashSet<String>,
        stall_file_downloads: bool,
    }

    impl MockDownloader {
        /// Registers `bytes` as the full content served for `url`.
        pub fn register(&mut self, url: impl Into<String>, bytes: Vec<u8>) {
            self.content.insert(url.into(), bytes);
        }

        /// Makes every future `start` call against `url` fail immediately.
        pub fn fail(&mut self, url: impl Into<String>) {
            self.fail_urls.insert(url.into());
        }

        /// Makes every future `start` call with a [`Destination::File`] stay
        /// `InProgress` forever, to exercise per-download timeout handling.
        pub fn stall_file_downloads(&mut self) {
            self.stall_file_downloads = true;
        }

        fn is_stalled(&self, destination: &Destination) -> bool {
            self.stall_file_downloads && matches!(destination, Destination::File(_))
        }
    }

    impl Downloader for MockDownloader {
        fn get_content_size(&self, url: &str) -> Result<u64, String> {
            self.content
                .get(url)
                .map(|b| b.len() as u64)
                .ok_or_else(|| format!("no mock content registered for {url}"))
        }

        fn start(&mut self, url: &str, range: Range, destination: Destination) -> TaskId {
            let id = TaskId(self.next_task);
            self.next_task += 1;

            let status = if self.is_stalled(&destination) {
                TaskStatus::InProgress { downloaded: 0, total: None }
            } else if self.fail_urls.contains(url) {
                TaskStatus::Failed {
                    detail: format!("mock failure for {url}"),
                    errno: None,
                }
            } else if let Some(bytes) = self.content.get(url) {
                let start = range.start as usize;
                let end = (range.end as usize + 1).min(bytes.len());
                let slice = bytes.get(start..end).unwrap_or_default().to_vec();

                match destination {
                    Destination::Memory => TaskStatus::Finished { buffer: Some(slice) },
                    Destination::File(path) => match std::fs::write(&path, &slice) {
                        Ok(()) => TaskStatus::Finished { buffer: None },
                        Err(e) => TaskStatus::Failed {
                            detail: e.to_string(),
                            errno: e.raw_os_error(),
                        },
                    },
                }
            } else {
                TaskStatus::Failed {
                    detail: format!("no mock content registered for {url}"),
                    errno: None,
                }
            };

            self.finished.insert(id.0, status);
            id
        }

        fn task_status(&mut self, task: TaskId) -> TaskStatus {
            self.finished
                .get(&task.0)
                .cloned()
                .unwrap_or(TaskStatus::Failed {
                    detail: "unknown task".into(),
                    errno: None,
                })
        }

        fn remove_task(&mut self, task: TaskId) {
            self.finished.remove(&task.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockDownloader;
    use super::*;

    #[test]
    fn mock_serves_requested_range() {
        let mut downloader = MockDownloader::default();
        downloader.register("http://example.test/pack.dvpl", b"0123456789".to_vec());

        let task = downloader.start(
            "http://example.test/pack.dvpl",
            Range { start: 2, end: 5 },
            Destination::Memory,
        );
        match downloader.task_status(task) {
            TaskStatus::Finished { buffer: Some(bytes) } => assert_eq!(bytes, b"2345"),
            other => panic!("unexpected status: {other:?}"),
        }
    }

    #[test]
    fn mock_reports_registered_failure() {
        let mut downloader = MockDownloader::default();
        downloader.register("http://example.test/pack.dvpl", b"data".to_vec());
        downloader.fail("http://example.test/pack.dvpl");

        let task = downloader.start(
            "http://example.test/pack.dvpl",
            Range { start: 0, end: 3 },
            Destination::Memory,
        );
        assert!(matches!(downloader.task_status(task), TaskStatus::Failed { .. }));
    }
}
