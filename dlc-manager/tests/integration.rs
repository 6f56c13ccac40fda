//! End-to-end scenarios driving [`DlcManager`] against an in-memory
//! superpack served by [`dlc_manager::downloader::mock::MockDownloader`]
//! and a real temp directory for local storage.

use std::time::Duration;

use dlc_manager::downloader::mock::MockDownloader;
use dlc_manager::format::{
    self, Compression, FileTableEntry, FooterInfo, Meta, PackInfo, LitePackTrailer,
};
use dlc_manager::fs::StdFileSystem;
use dlc_manager::{DlcManager, Hints};

/// A single concatenated remote blob, matching the on-wire layout: file
/// bodies (each followed by its trailer), then `FileTable`, `Meta`, and
/// `Footer`. Every init step and file download is a byte range against one
/// URL pointing at this blob.
struct Superpack {
    blob: Vec<u8>,
}

fn build_superpack() -> Superpack {
    let base_payload = b"base pack payload bytes".to_vec();
    let dlc1_payload = b"dlc1 pack payload bytes, a bit longer".to_vec();

    let mut blob = Vec::new();
    let mut entries = Vec::new();

    for (name, payload, meta_index) in [
        ("base/a.dvpl".to_string(), base_payload, 0u32),
        ("dlc1/b.dvpl".to_string(), dlc1_payload, 1u32),
    ] {
        let trailer = LitePackTrailer {
            size_compressed: payload.len() as u32,
            crc32_compressed: format::crc32::crc32(&payload),
            compression: Compression::None,
        };

        let start_position = blob.len() as u64;
        blob.extend_from_slice(&payload);
        blob.extend_from_slice(&format::write_lite_pack_trailer(&trailer));

        entries.push(FileTableEntry {
            name,
            original_crc32: format::crc32::crc32(&payload),
            original_size: payload.len() as u32,
            start_position,
            compressed_size: payload.len() as u32,
            compressed_crc32: trailer.crc32_compressed,
            compression: Compression::None,
            meta_index,
        });
    }

    let meta = Meta {
        packs: vec![
            PackInfo { name: "base".into(), dependency_children: vec![] },
            PackInfo { name: "dlc1".into(), dependency_children: vec![0] },
        ],
    };

    let file_table_bytes = format::write_file_table(&entries);
    let meta_bytes = format::write_meta(&meta);

    let footer = format::finalize_footer(FooterInfo {
        pack_archive_marker: format::footer::PACK_ARCHIVE_MARKER,
        files_table_size: file_table_bytes.len() as u32,
        files_table_crc32: format::crc32::crc32(&file_table_bytes),
        meta_data_size: meta_bytes.len() as u32,
        meta_data_crc32: format::crc32::crc32(&meta_bytes),
        files_table_compression: Compression::None,
    });
    let footer_bytes = format::write_footer(&footer);

    blob.extend_from_slice(&file_table_bytes);
    blob.extend_from_slice(&meta_bytes);
    blob.extend_from_slice(&footer_bytes);

    Superpack { blob }
}

fn register_superpack(downloader: &mut MockDownloader, base_url: &str, pack: &Superpack) {
    downloader.register(base_url, pack.blob.clone());
}

fn pump_until<F: Fn(&DlcManager) -> bool>(manager: &mut DlcManager, condition: F, max_ticks: usize) -> bool {
    for _ in 0..max_ticks {
        if condition(manager) {
            return true;
        }
        manager.update(false);
        std::thread::sleep(Duration::from_millis(1));
    }
    condition(manager)
}

fn test_hints(dir: &tempfile::TempDir) -> Hints {
    Hints { log_file_path: dir.path().join("dlc_manager.log"), ..Hints::default() }
}

#[test]
fn cold_cache_happy_path_downloads_requested_pack() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";

    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);

    let dir = tempfile::tempdir().unwrap();
    let mut manager = DlcManager::new(test_hints(&dir), Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize(base_url);

    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000), "manager never reached Ready");

    let handle = manager.request_pack("dlc1", 0).expect("dlc1 is a known pack");
    assert!(
        pump_until(&mut manager, |m| m.is_pack_ready("dlc1"), 10_000),
        "dlc1 never became ready"
    );
    assert!(manager.is_pack_ready("base"), "dlc1's dependency base should also be ready");

    let snapshot = manager.request_snapshot(handle).expect("request still tracked");
    assert_eq!(snapshot.progress(), 1.0);
}

#[test]
fn initialize_finished_reports_file_counts_not_pack_counts() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";
    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);

    let dir = tempfile::tempdir().unwrap();
    let mut manager = DlcManager::new(test_hints(&dir), Box::new(downloader), Box::new(StdFileSystem), dir.path());

    let seen = std::rc::Rc::new(std::cell::RefCell::new(None));
    let seen_clone = std::rc::Rc::clone(&seen);
    manager.signals_mut().initialize_finished.connect(move |event| {
        *seen_clone.borrow_mut() = Some(*event);
    });

    manager.initialize(base_url);
    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000));

    let event = seen.borrow().expect("initialize_finished should have fired");
    // Two files total (base/a.dvpl, dlc1/b.dvpl), none already on disk in a
    // cold cache, so the reported counts must describe files, not the two
    // catalog packs ("base", "dlc1").
    assert_eq!(event.total_files, 2);
    assert_eq!(event.downloaded_files, 0);
}

#[test]
fn deinitialize_cancels_scanner_and_allows_reinitialization() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";
    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);

    let dir = tempfile::tempdir().unwrap();
    let mut manager = DlcManager::new(test_hints(&dir), Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize(base_url);
    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000));

    manager.deinitialize();
    assert!(!manager.is_ready());
    assert!(!manager.is_offline());

    manager.initialize(base_url);
    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000), "manager should reinitialize cleanly");
}

#[test]
fn warm_cache_reuses_locally_cached_footer_without_refetching_meta() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";
    let dir = tempfile::tempdir().unwrap();

    {
        let mut downloader = MockDownloader::default();
        register_superpack(&mut downloader, base_url, &pack);
        let mut manager = DlcManager::new(test_hints(&dir), Box::new(downloader), Box::new(StdFileSystem), dir.path());
        manager.initialize(base_url);
        assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000));
    }

    // Second run: the remote blob is unchanged from last time, so its
    // footer bytes match what's cached locally. CalculateLocalDbHashAndCompare
    // should notice that and skip straight to the cached meta rather than
    // re-parsing the file table.
    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);
    let mut manager = DlcManager::new(test_hints(&dir), Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize(base_url);
    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000), "warm start never reached Ready");
}

#[test]
fn unknown_pack_request_is_a_silent_noop() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";
    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);

    let dir = tempfile::tempdir().unwrap();
    let mut manager = DlcManager::new(test_hints(&dir), Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize(base_url);
    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000));

    assert!(manager.request_pack("no-such-pack", 0).is_none());
}

#[test]
fn dependency_cycle_in_meta_is_rejected_at_parse_time() {
    let meta = Meta {
        packs: vec![
            PackInfo { name: "a".into(), dependency_children: vec![1] },
            PackInfo { name: "b".into(), dependency_children: vec![0] },
        ],
    };
    let bytes = format::write_meta(&meta);
    let crc = format::crc32::crc32(&bytes);
    let result = format::parse_meta(&bytes, crc);
    assert!(matches!(result, Err(dlc_manager::CodecError::DependencyCycle(_))));
}

#[test]
fn init_times_out_with_no_server_and_no_local_cache() {
    // No content registered at all: `get_content_size` fails outright, the
    // same as an unreachable server.
    let downloader = MockDownloader::default();

    let dir = tempfile::tempdir().unwrap();
    let hints = Hints { timeout_for_initialization: 0, skip_cdn_after_attempts: 1, ..test_hints(&dir) };

    let mut manager = DlcManager::new(hints, Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize("http://example.test/superpack");

    assert!(
        pump_until(&mut manager, DlcManager::is_offline, 1000),
        "manager should give up with a zero initialization timeout and an unreachable server"
    );
}

#[test]
fn stalled_download_is_abandoned_after_its_timeout() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";

    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);
    downloader.stall_file_downloads();

    let dir = tempfile::tempdir().unwrap();
    let hints = Hints { timeout_for_download: 0, ..test_hints(&dir) };
    let mut manager = DlcManager::new(hints, Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize(base_url);
    assert!(pump_until(&mut manager, DlcManager::is_ready, 10_000));

    manager.request_pack("base", 0).expect("base is a known pack");

    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let errors_clone = std::rc::Rc::clone(&errors);
    manager.signals_mut().error.connect(move |event| errors_clone.borrow_mut().push(event.clone()));

    assert!(
        pump_until(&mut manager, |_| !errors.borrow().is_empty(), 1_000),
        "a zero-second download timeout should surface a download error quickly"
    );
    assert!(!manager.is_pack_ready("base"), "a stalled download must never be mistaken for a completed one");
}

#[test]
fn request_signals_are_muted_while_backgrounded_without_the_hint() {
    let pack = build_superpack();
    let base_url = "http://example.test/superpack";
    let mut downloader = MockDownloader::default();
    register_superpack(&mut downloader, base_url, &pack);

    let dir = tempfile::tempdir().unwrap();
    let hints = Hints { fire_signals_in_background: false, ..test_hints(&dir) };
    let mut manager = DlcManager::new(hints, Box::new(downloader), Box::new(StdFileSystem), dir.path());
    manager.initialize(base_url);

    for _ in 0..10_000 {
        if manager.is_ready() {
            break;
        }
        manager.update(false);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(manager.is_ready());

    let updates = std::rc::Rc::new(std::cell::RefCell::new(0));
    let updates_clone = std::rc::Rc::clone(&updates);
    manager.signals_mut().request_updated.connect(move |_| *updates_clone.borrow_mut() += 1);
    let started = std::rc::Rc::new(std::cell::RefCell::new(0));
    let started_clone = std::rc::Rc::clone(&started);
    manager.signals_mut().request_start_loading.connect(move |_| *started_clone.borrow_mut() += 1);

    manager.request_pack("dlc1", 0).expect("dlc1 is a known pack");
    for _ in 0..10_000 {
        if manager.is_pack_ready("dlc1") {
            break;
        }
        manager.update(true);
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(manager.is_pack_ready("dlc1"), "download should still progress while backgrounded");
    assert_eq!(*updates.borrow(), 0, "request_updated must be muted while backgrounded");
    assert_eq!(*started.borrow(), 0, "request_start_loading must be muted while backgrounded");
}

