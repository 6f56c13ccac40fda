//! Reference [`Downloader`] built on blocking `reqwest`, grounded on the
//! content-downloader pattern in the retrieval pack's SGLoader example: one
//! worker thread per in-flight task, status polled through a shared table
//! rather than awaited directly, so the core crate never has to know about
//! an async runtime.

use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use dlc_manager::downloader::{Destination, Downloader, Range, TaskId, TaskStatus};

/// Default read-buffer size used when a caller doesn't wire `Hints` through
/// [`HttpDownloader::with_hints`].
const DEFAULT_CHUNK_BUF_SIZE: usize = 64 * 1024;

enum WorkerMessage {
    Progress { downloaded: u64, total: Option<u64> },
    Done { buffer: Option<Vec<u8>> },
    Failed { detail: String, errno: Option<i32> },
}

struct Task {
    handle: Option<JoinHandle<()>>,
    rx: mpsc::Receiver<WorkerMessage>,
    last_status: TaskStatus,
}

/// A [`Downloader`] that issues one blocking HTTP GET per task on its own
/// thread, reporting progress back through an `mpsc` channel.
pub struct HttpDownloader {
    client: reqwest::blocking::Client,
    next_task: u64,
    tasks: HashMap<u64, Task>,
    chunk_buf_size: usize,
}

impl HttpDownloader {
    /// Builds a downloader with reqwest's default blocking client
    /// configuration.
    pub fn new() -> Self {
        Self::with_config(4, DEFAULT_CHUNK_BUF_SIZE, 30)
    }

    /// Builds a downloader honoring `Hints::downloader_max_handles` (the
    /// idle connection pool size per host), `Hints::downloader_chunk_buf_size`
    /// (the read buffer used when streaming a response to disk), and
    /// `Hints::timeout_for_download` (per-request timeout, in seconds).
    pub fn with_config(max_handles: u32, chunk_buf_size: u32, timeout_for_download: u32) -> Self {
        let client = reqwest::blocking::ClientBuilder::new()
            .pool_max_idle_per_host(max_handles.max(1) as usize)
            .timeout(Duration::from_secs(timeout_for_download.max(1) as u64))
            .build()
            .unwrap_or_else(|e| {
                log::warn!("failed to build configured HTTP client, falling back to default: {e}");
                reqwest::blocking::Client::new()
            });

        Self {
            client,
            next_task: 0,
            tasks: HashMap::new(),
            chunk_buf_size: chunk_buf_size.max(1) as usize,
        }
    }

    fn drain_latest(task: &mut Task) {
        while let Ok(message) = task.rx.try_recv() {
            task.last_status = match message {
                WorkerMessage::Progress { downloaded, total } => TaskStatus::InProgress { downloaded, total },
                WorkerMessage::Done { buffer } => TaskStatus::Finished { buffer },
                WorkerMessage::Failed { detail, errno } => TaskStatus::Failed { detail, errno },
            };
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader for HttpDownloader {
    fn get_content_size(&self, url: &str) -> Result<u64, String> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| format!("HEAD {url} failed: {e}"))?;
        response
            .content_length()
            .ok_or_else(|| format!("{url} did not report Content-Length"))
    }

    fn start(&mut self, url: &str, range: Range, destination: Destination) -> TaskId {
        let id = self.next_task;
        self.next_task += 1;

        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let url = url.to_string();
        let chunk_buf_size = self.chunk_buf_size;

        let handle = std::thread::Builder::new()
            .name(format!("dlc-manager-http-{id}"))
            .spawn(move || run_task(&client, &url, range, destination, chunk_buf_size, &tx))
            .expect("failed to spawn download worker thread");

        self.tasks.insert(
            id,
            Task {
                handle: Some(handle),
                rx,
                last_status: TaskStatus::InProgress { downloaded: 0, total: None },
            },
        );
        TaskId(id)
    }

    fn task_status(&mut self, task: TaskId) -> TaskStatus {
        let Some(entry) = self.tasks.get_mut(&task.0) else {
            return TaskStatus::Failed { detail: "unknown task".into(), errno: None };
        };
        Self::drain_latest(entry);
        if matches!(entry.last_status, TaskStatus::Finished { .. } | TaskStatus::Failed { .. }) {
            if let Some(handle) = entry.handle.take() {
                let _ = handle.join();
            }
        }
        entry.last_status.clone()
    }

    fn remove_task(&mut self, task: TaskId) {
        if let Some(mut entry) = self.tasks.remove(&task.0) {
            if let Some(handle) = entry.handle.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Streams the response body in `chunk_buf_size`-sized reads, reporting
/// progress after every chunk, rather than buffering the whole thing with
/// `Response::bytes` up front.
fn run_task(
    client: &reqwest::blocking::Client,
    url: &str,
    range: Range,
    destination: Destination,
    chunk_buf_size: usize,
    tx: &mpsc::Sender<WorkerMessage>,
) {
    use std::io::Read as _;

    let request = client.get(url).header("Range", format!("bytes={}-{}", range.start, range.end));

    let mut response = match request.send().and_then(|r| r.error_for_status()) {
        Ok(r) => r,
        Err(e) => {
            log::warn!("GET {url} failed: {e}");
            let _ = tx.send(WorkerMessage::Failed { detail: e.to_string(), errno: None });
            return;
        }
    };

    let total = response.content_length();
    let mut downloaded = 0u64;
    let mut body = Vec::new();
    let mut chunk = vec![0_u8; chunk_buf_size];

    loop {
        let read = match response.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                log::warn!("reading response body for {url} failed: {e}");
                let _ = tx.send(WorkerMessage::Failed { detail: e.to_string(), errno: e.raw_os_error() });
                return;
            }
        };
        body.extend_from_slice(&chunk[..read]);
        downloaded += read as u64;
        let _ = tx.send(WorkerMessage::Progress { downloaded, total });
    }

    log::debug!("downloaded {downloaded} bytes from {url}");

    match destination {
        Destination::Memory => {
            let _ = tx.send(WorkerMessage::Done { buffer: Some(body) });
        }
        Destination::File(path) => match std::fs::write(&path, &body) {
            Ok(()) => {
                let _ = tx.send(WorkerMessage::Done { buffer: None });
            }
            Err(e) => {
                log::warn!("writing {} failed: {e}", path.display());
                let _ = tx.send(WorkerMessage::Failed { detail: e.to_string(), errno: e.raw_os_error() });
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_downloader_has_no_tasks() {
        let downloader = HttpDownloader::new();
        assert!(downloader.tasks.is_empty());
    }
}
