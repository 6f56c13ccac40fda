//! C2: a queryable index over a loaded [`crate::format::Meta`] and
//! [`crate::format::FileTableEntry`] list, plus per-file readiness tracking.
//!
//! One block of immutable parsed data (`Meta`, `FileTableEntry`s) joined
//! with a parallel mutable-state vector the rest of the manager updates as
//! work completes, the same pairing `FrameData`/`ThreadInfo` use elsewhere
//! in this crate family.

use std::collections::HashSet;

use crate::format::{FileTableEntry, Meta};

/// Everything known about the superpack's contents once `Meta` and
/// `FileTable` have both been parsed and cross-validated.
pub struct MetaIndex {
    meta: Meta,
    files: Vec<FileTableEntry>,
    /// Indices into `files` whose artifact is present and verified on disk.
    ready_files: HashSet<usize>,
}

impl MetaIndex {
    /// Builds an index from a parsed [`Meta`] and [`FileTableEntry`] list.
    /// Every entry's `meta_index` must be in range; out-of-range indices are
    /// a codec-level bug upstream, not something this constructor re-checks.
    pub fn new(meta: Meta, files: Vec<FileTableEntry>) -> Self {
        Self {
            meta,
            files,
            ready_files: HashSet::new(),
        }
    }

    /// The underlying pack catalog.
    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    /// All file entries belonging to the superpack, file-table order.
    pub fn files(&self) -> &[FileTableEntry] {
        &self.files
    }

    /// File entries belonging to the pack at catalog index `pack_index`.
    pub fn files_of(&self, pack_index: u32) -> impl Iterator<Item = &FileTableEntry> {
        self.files.iter().filter(move |f| f.meta_index == pack_index)
    }

    /// File-table indices and entries belonging to the pack at catalog index
    /// `pack_index`.
    pub fn file_indices_of(&self, pack_index: u32) -> impl Iterator<Item = (usize, &FileTableEntry)> {
        self.files
            .iter()
            .enumerate()
            .filter(move |(_, f)| f.meta_index == pack_index)
    }

    /// Catalog indices of packs `pack_index` directly depends on.
    pub fn children_of(&self, pack_index: u32) -> &[u32] {
        self.meta
            .packs
            .get(pack_index as usize)
            .map(|p| p.dependency_children.as_slice())
            .unwrap_or(&[])
    }

    /// The transitive closure of `children_of`, not including `pack_index`
    /// itself, each index appearing once.
    pub fn transitive_dependencies(&self, pack_index: u32) -> Vec<u32> {
        let mut seen = HashSet::new();
        let mut stack = vec![pack_index];
        let mut out = Vec::new();
        while let Some(index) = stack.pop() {
            for &child in self.children_of(index) {
                if seen.insert(child) {
                    out.push(child);
                    stack.push(child);
                }
            }
        }
        out
    }

    /// Looks up a pack's catalog index by name.
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.meta.index_of(name)
    }

    /// Looks up a file entry by its relative name.
    pub fn file_info(&self, name: &str) -> Option<&FileTableEntry> {
        self.files.iter().find(|f| f.name == name)
    }

    /// Looks up a file's table index by its relative name.
    pub fn file_index_of(&self, name: &str) -> Option<usize> {
        self.files.iter().position(|f| f.name == name)
    }

    /// True once [`MetaIndex::set_file_ready`] has been called for
    /// `file_index`.
    pub fn is_file_ready(&self, file_index: usize) -> bool {
        self.ready_files.contains(&file_index)
    }

    /// Marks a single file's artifact as present and verified on disk.
    pub fn set_file_ready(&mut self, file_index: usize) {
        self.ready_files.insert(file_index);
    }

    /// Clears a single file's ready state, e.g. after the scanner finds its
    /// on-disk trailer no longer matches.
    pub fn clear_file_ready(&mut self, file_index: usize) {
        self.ready_files.remove(&file_index);
    }

    /// True when every file belonging to `pack_index` is ready. A pack with
    /// no files is vacuously ready.
    pub fn is_ready(&self, pack_index: u32) -> bool {
        self.file_indices_of(pack_index).all(|(i, _)| self.is_file_ready(i))
    }

    /// Marks every file belonging to `pack_index` ready.
    pub fn set_ready(&mut self, pack_index: u32) {
        let indices: Vec<usize> = self.file_indices_of(pack_index).map(|(i, _)| i).collect();
        for i in indices {
            self.ready_files.insert(i);
        }
    }

    /// Clears the ready state of every file belonging to `pack_index`.
    pub fn clear_ready(&mut self, pack_index: u32) {
        let indices: Vec<usize> = self.file_indices_of(pack_index).map(|(i, _)| i).collect();
        for i in indices {
            self.ready_files.remove(&i);
        }
    }

    /// Number of files currently marked ready.
    pub fn ready_count(&self) -> usize {
        self.ready_files.len()
    }

    /// Total number of packs in the catalog.
    pub fn pack_count(&self) -> usize {
        self.meta.packs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{Compression, PackInfo};

    fn sample_index() -> MetaIndex {
        let meta = Meta {
            packs: vec![
                PackInfo { name: "base".into(), dependency_children: vec![] },
                PackInfo { name: "dlc1".into(), dependency_children: vec![0] },
                PackInfo { name: "dlc2".into(), dependency_children: vec![1] },
            ],
        };
        let files = vec![
            FileTableEntry {
                name: "base/a.tex".into(),
                original_crc32: 0,
                original_size: 0,
                start_position: 0,
                compressed_size: 0,
                compressed_crc32: 0,
                compression: Compression::None,
                meta_index: 0,
            },
            FileTableEntry {
                name: "dlc1/b.tex".into(),
                original_crc32: 0,
                original_size: 0,
                start_position: 0,
                compressed_size: 0,
                compressed_crc32: 0,
                compression: Compression::None,
                meta_index: 1,
            },
        ];
        MetaIndex::new(meta, files)
    }

    #[test]
    fn transitive_dependencies_follow_chain() {
        let index = sample_index();
        let mut deps = index.transitive_dependencies(2);
        deps.sort_unstable();
        assert_eq!(deps, vec![0, 1]);
    }

    #[test]
    fn files_of_filters_by_pack() {
        let index = sample_index();
        let names: Vec<_> = index.files_of(0).map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["base/a.tex"]);
    }

    #[test]
    fn ready_state_round_trips() {
        let mut index = sample_index();
        assert!(!index.is_ready(0));
        index.set_ready(0);
        assert!(index.is_ready(0));
        index.clear_ready(0);
        assert!(!index.is_ready(0));
    }

    #[test]
    fn file_granularity_tracks_independently_of_pack_siblings() {
        let meta = Meta {
            packs: vec![PackInfo { name: "base".into(), dependency_children: vec![] }],
        };
        let files = vec![
            FileTableEntry {
                name: "base/a.tex".into(),
                original_crc32: 0,
                original_size: 0,
                start_position: 0,
                compressed_size: 0,
                compressed_crc32: 0,
                compression: Compression::None,
                meta_index: 0,
            },
            FileTableEntry {
                name: "base/b.tex".into(),
                original_crc32: 0,
                original_size: 0,
                start_position: 0,
                compressed_size: 0,
                compressed_crc32: 0,
                compression: Compression::None,
                meta_index: 0,
            },
        ];
        let mut index = MetaIndex::new(meta, files);

        let a = index.file_index_of("base/a.tex").unwrap();
        index.set_file_ready(a);

        assert!(index.is_file_ready(a));
        assert!(!index.is_ready(0), "one mismatched sibling must keep the pack not-ready");

        let b = index.file_index_of("base/b.tex").unwrap();
        index.set_file_ready(b);
        assert!(index.is_ready(0));
    }
}
