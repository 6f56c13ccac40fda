//! C3: the local-cache scanner. Runs on a background `std::thread`,
//! independent of the init state machine, and hands its findings back
//! through a `crossbeam-channel` rendezvous rather than the original's
//! binary semaphore (`metaDataLoadedSem`).
//!
//! The scanner does two passes: it walks the pack directory once, deleting
//! any `.dvpl` file whose trailer can't even be read (truncated, permission
//! denied, whatever: the original does this eagerly, without waiting for
//! the file table); then it blocks for the file table to arrive from the
//! init state machine and reconciles what it found against it, deleting any
//! file with no matching entry and reporting which entries are verified
//! present.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;

use crate::format::lite_pack::{LITE_PACK_TRAILER_SIZE, read_lite_pack_trailer};
use crate::format::FileTableEntry;

/// What the scanner found on disk for one `.dvpl` file, before reconciling
/// against the file table.
struct OnDiskFile {
    size_on_device: u64,
    crc32_compressed: u32,
    size_compressed: u32,
}

/// A file table entry the scanner confirmed is present and intact on disk.
#[derive(Debug, Clone)]
pub struct ReconciledFile {
    /// Catalog index of the pack this file belongs to.
    pub meta_index: u32,
    /// The file's relative name, as in the file table.
    pub name: String,
}

/// Result of a completed scan-and-reconcile pass.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// File-table entries confirmed present and intact on disk.
    pub reconciled: Vec<ReconciledFile>,
    /// Files deleted because they were unreadable or had no matching
    /// file-table entry.
    pub deleted: Vec<PathBuf>,
}

/// Spawns the scanner thread. `file_table_rx` must receive exactly one
/// message: the file table, once the init state machine has parsed and
/// validated it, once the `GetFileTable` step of initialization completes.
/// `expected_files` sizes the scan's on-disk table up front
/// (`Hints::max_files_to_download`); it's an allocation hint, not a limit:
/// scanning more files than that still works, just with a reallocation.
pub fn spawn(
    root: PathBuf,
    file_table_rx: Receiver<Vec<FileTableEntry>>,
    expected_files: usize,
) -> std::thread::JoinHandle<ScanReport> {
    std::thread::Builder::new()
        .name("dlc-manager-scan".into())
        .spawn(move || run(&root, file_table_rx, expected_files))
        .expect("failed to spawn scanner thread")
}

fn run(root: &Path, file_table_rx: Receiver<Vec<FileTableEntry>>, expected_files: usize) -> ScanReport {
    let mut on_disk = HashMap::with_capacity(expected_files);
    recursive_scan(root, root, &mut on_disk);

    let file_table = file_table_rx.recv().unwrap_or_default();
    reconcile(root, on_disk, &file_table)
}

/// Walks `dir` (relative to `root`) looking for `.dvpl` files. Any file
/// whose trailer can't be read is deleted on the spot: there is no repair
/// for a file we can't even parse, and leaving it around only risks a false
/// "ready" reconciliation later.
fn recursive_scan(root: &Path, dir: &Path, out: &mut HashMap<String, OnDiskFile>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(_) => return,
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let file_type = match entry.file_type() {
            Ok(ft) => ft,
            Err(_) => continue,
        };

        if file_type.is_dir() {
            recursive_scan(root, &path, out);
            continue;
        }

        if path.extension().and_then(|e| e.to_str()) != Some("dvpl") {
            continue;
        }

        let mut file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(_) => {
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        let size_on_device = match file.metadata() {
            Ok(meta) => meta.len(),
            Err(_) => {
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        let trailer = match read_lite_pack_trailer(&mut file) {
            Ok(t) => t,
            Err(_) => {
                let _ = fs::remove_file(&path);
                continue;
            }
        };

        let relative = match path.strip_prefix(root) {
            Ok(rel) => rel.to_string_lossy().replace(std::path::MAIN_SEPARATOR, "/"),
            Err(_) => continue,
        };

        out.insert(
            relative,
            OnDiskFile {
                size_on_device,
                crc32_compressed: trailer.crc32_compressed,
                size_compressed: trailer.size_compressed,
            },
        );
    }
}

/// Matches scanned files against the file table. An entry counts as
/// verified when its stored compressed size and CRC agree with the
/// trailer *and* the file's size on disk is exactly the compressed payload
/// plus the trailer: the same three-way check the original performs in
/// its scan thread before trusting a cached file.
fn reconcile(
    root: &Path,
    mut on_disk: HashMap<String, OnDiskFile>,
    file_table: &[FileTableEntry],
) -> ScanReport {
    let mut reconciled = Vec::new();

    for entry in file_table {
        if let Some(found) = on_disk.remove(&entry.name) {
            let expected_size_on_device =
                entry.compressed_size as u64 + LITE_PACK_TRAILER_SIZE as u64;
            if found.crc32_compressed == entry.compressed_crc32
                && found.size_compressed == entry.compressed_size
                && found.size_on_device == expected_size_on_device
            {
                reconciled.push(ReconciledFile {
                    meta_index: entry.meta_index,
                    name: entry.name.clone(),
                });
            }
            // A readable but mismatched trailer is left in place: the file is
            // a partial/stale download and stays on disk so it can resume.
        }
    }

    // Anything left in `on_disk` has no matching file-table entry: stray.
    let deleted = on_disk
        .into_keys()
        .map(|name| root.join(name))
        .inspect(|path| {
            let _ = fs::remove_file(path);
        })
        .collect();

    ScanReport { reconciled, deleted }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Compression, write_lite_pack_trailer, LitePackTrailer};
    use std::io::Write;

    fn write_dvpl(path: &Path, payload: &[u8], trailer: &LitePackTrailer) {
        let mut file = fs::File::create(path).unwrap();
        file.write_all(payload).unwrap();
        file.write_all(&write_lite_pack_trailer(trailer)).unwrap();
    }

    #[test]
    fn reconciles_intact_file_and_strips_stray_one() {
        let dir = tempfile::tempdir().unwrap();
        let good_payload = b"hello world compressed payload!";
        let good_trailer = LitePackTrailer {
            size_compressed: good_payload.len() as u32,
            crc32_compressed: crate::format::crc32::crc32(good_payload),
            compression: Compression::None,
        };
        write_dvpl(&dir.path().join("base.dvpl"), good_payload, &good_trailer);

        let stray_trailer = LitePackTrailer {
            size_compressed: 3,
            crc32_compressed: 0,
            compression: Compression::None,
        };
        write_dvpl(&dir.path().join("stray.dvpl"), b"xyz", &stray_trailer);

        let mut on_disk = HashMap::new();
        recursive_scan(dir.path(), dir.path(), &mut on_disk);
        assert_eq!(on_disk.len(), 2);

        let file_table = vec![FileTableEntry {
            name: "base.dvpl".into(),
            original_crc32: 0,
            original_size: 0,
            start_position: 0,
            compressed_size: good_payload.len() as u32,
            compressed_crc32: good_trailer.crc32_compressed,
            compression: Compression::None,
            meta_index: 0,
        }];

        let report = reconcile(dir.path(), on_disk, &file_table);
        assert_eq!(report.reconciled.len(), 1);
        assert_eq!(report.reconciled[0].name, "base.dvpl");
        assert_eq!(report.deleted.len(), 1);
        assert!(!dir.path().join("stray.dvpl").exists());
        assert!(dir.path().join("base.dvpl").exists());
    }

    #[test]
    fn mismatched_trailer_is_left_in_place_for_resume() {
        let dir = tempfile::tempdir().unwrap();
        let stale_payload = b"old, truncated payload";
        let stale_trailer = LitePackTrailer {
            size_compressed: stale_payload.len() as u32,
            crc32_compressed: crate::format::crc32::crc32(stale_payload),
            compression: Compression::None,
        };
        write_dvpl(&dir.path().join("base.dvpl"), stale_payload, &stale_trailer);

        let mut on_disk = HashMap::new();
        recursive_scan(dir.path(), dir.path(), &mut on_disk);
        assert_eq!(on_disk.len(), 1);

        let file_table = vec![FileTableEntry {
            name: "base.dvpl".into(),
            original_crc32: 0,
            original_size: 0,
            start_position: 0,
            compressed_size: 9999,
            compressed_crc32: 0xDEAD_BEEF,
            compression: Compression::None,
            meta_index: 0,
        }];

        let report = reconcile(dir.path(), on_disk, &file_table);
        assert!(report.reconciled.is_empty(), "mismatched file must not be marked ready");
        assert!(report.deleted.is_empty(), "a readable trailer with a matching name is not a stray");
        assert!(dir.path().join("base.dvpl").exists(), "left in place so the download can resume");
    }

    #[test]
    fn unreadable_trailer_is_deleted_during_scan() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.dvpl");
        fs::write(&path, b"short").unwrap();

        let mut on_disk = HashMap::new();
        recursive_scan(dir.path(), dir.path(), &mut on_disk);
        assert!(on_disk.is_empty());
        assert!(!path.exists());
    }
}
