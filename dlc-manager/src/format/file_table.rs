//! The `FileTable` block: one [`FileTableEntry`] per file in the
//! superpack, followed by a `\0`-separated blob of relative file names in
//! the same order.
//!
//! Nothing else in the block says where the entry array ends and the name
//! blob begins, so this prefixes the blob with a `u32` entry count, the same
//! way `FrameData` prefixes its scope tables with explicit counts rather
//! than relying on a sentinel.

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Write};

use crate::error::CodecError;
use crate::format::compression::Compression;
use crate::format::crc32::crc32;

/// Bytes occupied by one serialized [`FileTableEntry`], excluding its name.
pub const FILE_TABLE_ENTRY_SIZE: usize = 4 + 4 + 8 + 4 + 4 + 4 + 4;

/// Metadata for a single file packed into the superpack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTableEntry {
    /// Relative path of the file, as it should appear on disk once unpacked.
    pub name: String,
    /// CRC-32 of the file's uncompressed bytes.
    pub original_crc32: u32,
    /// Size of the file's uncompressed bytes.
    pub original_size: u32,
    /// Byte offset of this file's payload within the superpack.
    pub start_position: u64,
    /// Size of the file's payload as stored (post-compression).
    pub compressed_size: u32,
    /// CRC-32 of the file's payload as stored (post-compression).
    pub compressed_crc32: u32,
    /// Compression applied to this file's payload.
    pub compression: Compression,
    /// Index into the `Meta` block's pack catalog identifying which pack
    /// this file belongs to.
    pub meta_index: u32,
}

impl FileTableEntry {
    fn write_fixed(&self, out: &mut Vec<u8>) {
        out.write_u32::<LE>(self.original_crc32).expect("vec write can't fail");
        out.write_u32::<LE>(self.original_size).expect("vec write can't fail");
        out.write_u64::<LE>(self.start_position).expect("vec write can't fail");
        out.write_u32::<LE>(self.compressed_size).expect("vec write can't fail");
        out.write_u32::<LE>(self.compressed_crc32).expect("vec write can't fail");
        out.write_u32::<LE>(self.compression as u32).expect("vec write can't fail");
        out.write_u32::<LE>(self.meta_index).expect("vec write can't fail");
    }

    fn read_fixed(cursor: &mut Cursor<&[u8]>, name: String) -> Result<Self, CodecError> {
        let original_crc32 = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("original_crc32: {e}")))?;
        let original_size = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("original_size: {e}")))?;
        let start_position = cursor
            .read_u64::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("start_position: {e}")))?;
        let compressed_size = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("compressed_size: {e}")))?;
        let compressed_crc32 = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("compressed_crc32: {e}")))?;
        let compression_tag = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("compression: {e}")))?;
        let compression = Compression::try_from(compression_tag as u8)
            .map_err(CodecError::UnknownCompression)?;
        let meta_index = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFileTable(format!("meta_index: {e}")))?;

        Ok(Self {
            name,
            original_crc32,
            original_size,
            start_position,
            compressed_size,
            compressed_crc32,
            compression,
            meta_index,
        })
    }
}

/// Serializes `entries` into a `FileTable` block body (no CRC).
pub fn write_file_table(entries: &[FileTableEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    out.write_u32::<LE>(entries.len() as u32).expect("vec write can't fail");
    for entry in entries {
        entry.write_fixed(&mut out);
    }
    for entry in entries {
        out.write_all(entry.name.as_bytes()).expect("vec write can't fail");
        out.write_u8(0).expect("vec write can't fail");
    }
    out
}

/// Parses a `FileTable` block body, validating it against `expected_crc32`.
pub fn parse_file_table(buf: &[u8], expected_crc32: u32) -> Result<Vec<FileTableEntry>, CodecError> {
    let computed = crc32(buf);
    if computed != expected_crc32 {
        return Err(CodecError::BadFileTable(format!(
            "files_table_crc32 mismatch: computed {computed:#010x} != stored {expected_crc32:#010x}"
        )));
    }

    let mut cursor = Cursor::new(buf);
    let entry_count = cursor
        .read_u32::<LE>()
        .map_err(|e| CodecError::BadFileTable(format!("entry_count: {e}")))? as usize;

    let fixed_region_end = 4 + entry_count * FILE_TABLE_ENTRY_SIZE;
    if fixed_region_end > buf.len() {
        return Err(CodecError::BadFileTable(format!(
            "entry_count {entry_count} overruns buffer of {} bytes",
            buf.len()
        )));
    }

    let mut fixed = Vec::with_capacity(entry_count);
    for _ in 0..entry_count {
        fixed.push(FileTableEntry::read_fixed(&mut cursor, String::new())?);
    }

    let name_blob = &buf[fixed_region_end..];
    let mut names = name_blob.split(|&b| b == 0).map(|s| {
        String::from_utf8(s.to_vec()).map_err(|e| CodecError::BadFileTable(format!("name utf8: {e}")))
    });

    let mut entries = Vec::with_capacity(entry_count);
    for mut entry in fixed {
        let name = names
            .next()
            .ok_or_else(|| CodecError::BadFileTable("name blob has fewer names than entries".into()))??;
        entry.name = name;
        entries.push(entry);
    }

    // `split` on a `\0`-terminated blob yields one trailing empty slice;
    // anything beyond that means the blob carried more names than entries.
    if names.any(|n| n.map(|s| !s.is_empty()).unwrap_or(true)) {
        return Err(CodecError::BadFileTable(
            "name blob has more names than entries".into(),
        ));
    }

    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_entries() -> Vec<FileTableEntry> {
        vec![
            FileTableEntry {
                name: "textures/hero.tex".into(),
                original_crc32: 1,
                original_size: 100,
                start_position: 0,
                compressed_size: 40,
                compressed_crc32: 2,
                compression: Compression::Lz4,
                meta_index: 0,
            },
            FileTableEntry {
                name: "audio/theme.ogg".into(),
                original_crc32: 3,
                original_size: 200,
                start_position: 40,
                compressed_size: 150,
                compressed_crc32: 4,
                compression: Compression::None,
                meta_index: 1,
            },
        ]
    }

    #[test]
    fn round_trip() {
        let entries = sample_entries();
        let body = write_file_table(&entries);
        let crc = crc32(&body);
        let parsed = parse_file_table(&body, crc).expect("well-formed table must parse");
        assert_eq!(parsed, entries);
    }

    #[test]
    fn crc_mismatch_rejected() {
        let entries = sample_entries();
        let body = write_file_table(&entries);
        assert!(matches!(
            parse_file_table(&body, 0),
            Err(CodecError::BadFileTable(_))
        ));
    }

    #[test]
    fn oversized_entry_count_rejected() {
        let entries = sample_entries();
        let mut body = write_file_table(&entries);
        body[0] = 0xFF; // absurd entry_count
        let crc = crc32(&body);
        assert!(matches!(
            parse_file_table(&body, crc),
            Err(CodecError::BadFileTable(_))
        ));
    }
}
