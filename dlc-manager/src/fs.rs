//! The local-filesystem seam: thin enough that tests can swap in a fake,
//! but the default [`StdFileSystem`] is what the manager actually uses.

use std::io;
use std::path::{Path, PathBuf};

/// Filesystem operations the manager needs, abstracted so
/// [`crate::manager::init`]'s `TestWriteAccessToPackDirectory` probe and the
/// scanner can be exercised against an in-memory fake in tests.
pub trait FileSystem {
    /// True if `path` exists and is a regular file.
    fn is_file(&self, path: &Path) -> bool;
    /// True if `path` exists and is a directory.
    fn is_directory(&self, path: &Path) -> bool;
    /// Creates `path` and any missing parent directories.
    fn create_directory(&self, path: &Path) -> io::Result<()>;
    /// Removes a regular file. Not an error if it doesn't exist.
    fn delete_file(&self, path: &Path) -> io::Result<()>;
    /// Size in bytes of a regular file.
    fn file_size(&self, path: &Path) -> io::Result<u64>;
    /// Reads an entire file into memory.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;
    /// Writes `bytes` to `path`, creating or truncating it.
    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()>;
    /// Moves `from` to `to`, overwriting `to` if it exists. Used to commit a
    /// verified download from its temporary path into its final `.dvpl` path.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;
}

/// The real filesystem, via `std::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn is_file(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn is_directory(&self, path: &Path) -> bool {
        path.is_dir()
    }

    fn create_directory(&self, path: &Path) -> io::Result<()> {
        std::fs::create_dir_all(path)
    }

    fn delete_file(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn file_size(&self, path: &Path) -> io::Result<u64> {
        Ok(std::fs::metadata(path)?.len())
    }

    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn write(&self, path: &Path, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(path, bytes)
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        std::fs::rename(from, to)
    }
}

/// Probes whether `dir` can actually be written to: creates a throwaway
/// file and deletes it. The original runs this once, at init start, rather
/// than discovering a read-only pack directory mid-download.
pub fn test_write_access(fs: &dyn FileSystem, dir: &Path) -> io::Result<()> {
    let probe = probe_path(dir);
    fs.write(&probe, b"probe")?;
    fs.delete_file(&probe)
}

fn probe_path(dir: &Path) -> PathBuf {
    dir.join(".dlc_manager_write_probe")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_probe_succeeds_on_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(test_write_access(&StdFileSystem, dir.path()).is_ok());
        assert!(!probe_path(dir.path()).exists());
    }

    #[test]
    fn delete_missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(StdFileSystem.delete_file(&missing).is_ok());
    }

    #[test]
    fn rename_moves_file_to_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("a.part");
        let to = dir.path().join("a.dvpl");
        std::fs::write(&from, b"payload").unwrap();
        StdFileSystem.rename(&from, &to).unwrap();
        assert!(!from.exists());
        assert_eq!(std::fs::read(&to).unwrap(), b"payload");
    }
}
