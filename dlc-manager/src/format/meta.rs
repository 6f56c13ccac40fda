//! The `Meta` block: the pack catalog and its dependency DAG.
//!
//! Layout, little-endian:
//!
//! ```text
//! pack_count        u32
//! repeated pack_count times:
//!     name_len      u16
//!     name          [u8; name_len]  (utf-8)
//!     child_count   u32
//!     children      [u32; child_count]  (indices into this same array)
//! ```
//!
//! `children` indices are validated to be in range and acyclic at parse
//! time (invariant 4): a pack catalog with a cycle never becomes a `Meta`
//! value, so nothing downstream has to re-check for cycles.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::CodecError;
use crate::format::crc32::crc32;

/// One entry in the pack catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackInfo {
    /// The pack's name, as referenced by requests and `preloaded_packs`.
    pub name: String,
    /// Indices, into the enclosing [`Meta::packs`], of packs this pack
    /// depends on.
    pub dependency_children: Vec<u32>,
}

/// The parsed and validated pack catalog.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Meta {
    /// All known packs, in catalog order. A pack's catalog index is its
    /// stable identity and what [`crate::format::file_table::FileTableEntry::meta_index`]
    /// refers to.
    pub packs: Vec<PackInfo>,
}

impl Meta {
    /// Looks up a pack's catalog index by name.
    pub fn index_of(&self, name: &str) -> Option<u32> {
        self.packs.iter().position(|p| p.name == name).map(|i| i as u32)
    }
}

/// Serializes `meta` into a `Meta` block body (no CRC).
pub fn write_meta(meta: &Meta) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(meta.packs.len() as u32).expect("vec write can't fail");
    for pack in &meta.packs {
        let name_bytes = pack.name.as_bytes();
        out.write_u16::<LE>(name_bytes.len() as u16).expect("vec write can't fail");
        out.write_all(name_bytes).expect("vec write can't fail");
        out.write_u32::<LE>(pack.dependency_children.len() as u32)
            .expect("vec write can't fail");
        for &child in &pack.dependency_children {
            out.write_u32::<LE>(child).expect("vec write can't fail");
        }
    }
    out
}

/// Parses a `Meta` block body, validating it against `expected_crc32` and
/// rejecting any dependency cycle.
pub fn parse_meta(buf: &[u8], expected_crc32: u32) -> Result<Meta, CodecError> {
    let computed = crc32(buf);
    if computed != expected_crc32 {
        return Err(CodecError::BadMeta(format!(
            "meta_data_crc32 mismatch: computed {computed:#010x} != stored {expected_crc32:#010x}"
        )));
    }

    let mut cursor = Cursor::new(buf);
    let pack_count = cursor
        .read_u32::<LE>()
        .map_err(|e| CodecError::BadMeta(format!("pack_count: {e}")))? as usize;

    let mut packs = Vec::with_capacity(pack_count);
    for _ in 0..pack_count {
        let name_len = cursor
            .read_u16::<LE>()
            .map_err(|e| CodecError::BadMeta(format!("name_len: {e}")))? as usize;
        let mut name_buf = vec![0_u8; name_len];
        std::io::Read::read_exact(&mut cursor, &mut name_buf)
            .map_err(|e| CodecError::BadMeta(format!("name: {e}")))?;
        let name = String::from_utf8(name_buf)
            .map_err(|e| CodecError::BadMeta(format!("name utf8: {e}")))?;

        let child_count = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadMeta(format!("child_count: {e}")))? as usize;
        let mut dependency_children = Vec::with_capacity(child_count);
        for _ in 0..child_count {
            let child = cursor
                .read_u32::<LE>()
                .map_err(|e| CodecError::BadMeta(format!("child index: {e}")))?;
            if child as usize >= pack_count {
                return Err(CodecError::BadMeta(format!(
                    "pack {name:?} references out-of-range dependency index {child}"
                )));
            }
            dependency_children.push(child);
        }

        packs.push(PackInfo {
            name,
            dependency_children,
        });
    }

    let meta = Meta { packs };
    check_acyclic(&meta)?;
    Ok(meta)
}

/// Depth-first cycle check over the dependency graph (invariant 4).
fn check_acyclic(meta: &Meta) -> Result<(), CodecError> {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks = vec![Mark::Unvisited; meta.packs.len()];

    fn visit(meta: &Meta, marks: &mut [Mark], index: usize) -> Result<(), CodecError> {
        match marks[index] {
            Mark::Done => return Ok(()),
            Mark::InProgress => {
                return Err(CodecError::DependencyCycle(meta.packs[index].name.clone()));
            }
            Mark::Unvisited => {}
        }

        marks[index] = Mark::InProgress;
        for &child in &meta.packs[index].dependency_children {
            visit(meta, marks, child as usize)?;
        }
        marks[index] = Mark::Done;
        Ok(())
    }

    for index in 0..meta.packs.len() {
        visit(meta, &mut marks, index)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> Meta {
        Meta {
            packs: vec![
                PackInfo { name: "base".into(), dependency_children: vec![] },
                PackInfo { name: "dlc1".into(), dependency_children: vec![0] },
                PackInfo { name: "dlc2".into(), dependency_children: vec![0, 1] },
            ],
        }
    }

    #[test]
    fn round_trip() {
        let meta = sample_meta();
        let body = write_meta(&meta);
        let crc = crc32(&body);
        let parsed = parse_meta(&body, crc).expect("acyclic meta must parse");
        assert_eq!(parsed, meta);
    }

    #[test]
    fn cycle_is_rejected() {
        let meta = Meta {
            packs: vec![
                PackInfo { name: "a".into(), dependency_children: vec![1] },
                PackInfo { name: "b".into(), dependency_children: vec![0] },
            ],
        };
        let body = write_meta(&meta);
        let crc = crc32(&body);
        assert!(matches!(parse_meta(&body, crc), Err(CodecError::DependencyCycle(_))));
    }

    #[test]
    fn out_of_range_index_rejected() {
        let mut body = Vec::new();
        body.write_u32::<LE>(1).unwrap();
        body.write_u16::<LE>(1).unwrap();
        body.write_all(b"a").unwrap();
        body.write_u32::<LE>(1).unwrap();
        body.write_u32::<LE>(99).unwrap();
        let crc = crc32(&body);
        assert!(matches!(parse_meta(&body, crc), Err(CodecError::BadMeta(_))));
    }

    #[test]
    fn index_of_finds_pack() {
        let meta = sample_meta();
        assert_eq!(meta.index_of("dlc2"), Some(2));
        assert_eq!(meta.index_of("missing"), None);
    }
}
