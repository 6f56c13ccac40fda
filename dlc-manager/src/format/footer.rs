//! The superpack's trailing `Footer` block.
//!
//! Layout, all little-endian:
//!
//! ```text
//! pack_archive_marker   [u8; 4]
//! files_table_size      u32
//! files_table_crc32     u32
//! meta_data_size        u32
//! meta_data_crc32       u32
//! files_table_compression u8, then 3 bytes of padding
//! -- end of FooterInfo (authenticated by info_crc32) --
//! info_crc32            u32
//! ```

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;

use crate::error::CodecError;
use crate::format::compression::Compression;
use crate::format::crc32::crc32;

/// Four-byte magic identifying a valid superpack. The all-zero marker is
/// used by the original as a sentinel for "no server data available,
/// fall back to whatever is cached locally" (see
/// [`crate::manager::init::local_footer_is_empty`]).
pub const PACK_ARCHIVE_MARKER: [u8; 4] = *b"PACK";

/// Number of bytes occupied by a serialized [`FooterInfo`].
pub const FOOTER_INFO_SIZE: usize = 4 + 4 + 4 + 4 + 4 + 4;

/// Number of bytes occupied by a serialized [`Footer`] (`FooterInfo` plus
/// its authenticating CRC).
pub const FOOTER_SIZE: usize = FOOTER_INFO_SIZE + 4;

/// The part of the footer that `info_crc32` authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FooterInfo {
    /// Magic marker; all-zero means "no remote data, use local cache as-is".
    pub pack_archive_marker: [u8; 4],
    /// Byte length of the `FileTable` block.
    pub files_table_size: u32,
    /// CRC-32 authenticating the `FileTable` block.
    pub files_table_crc32: u32,
    /// Byte length of the `Meta` block.
    pub meta_data_size: u32,
    /// CRC-32 authenticating the `Meta` block.
    pub meta_data_crc32: u32,
    /// Compression applied to the `FileTable` block itself (not to the
    /// per-file payloads it describes).
    pub files_table_compression: Compression,
}

impl FooterInfo {
    /// True when `pack_archive_marker` is the all-zero sentinel used to mean
    /// "no remote data was ever negotiated."
    pub fn is_empty_marker(&self) -> bool {
        self.pack_archive_marker == [0, 0, 0, 0]
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.pack_archive_marker);
        out.write_u32::<LE>(self.files_table_size).expect("vec write can't fail");
        out.write_u32::<LE>(self.files_table_crc32).expect("vec write can't fail");
        out.write_u32::<LE>(self.meta_data_size).expect("vec write can't fail");
        out.write_u32::<LE>(self.meta_data_crc32).expect("vec write can't fail");
        out.write_u8(self.files_table_compression as u8).expect("vec write can't fail");
        out.write_all(&[0, 0, 0]).expect("vec write can't fail");
    }

    fn read_from(cursor: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        let mut pack_archive_marker = [0_u8; 4];
        cursor
            .read_exact(&mut pack_archive_marker)
            .map_err(|e| CodecError::BadFooter(format!("marker: {e}")))?;
        let files_table_size = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFooter(format!("files_table_size: {e}")))?;
        let files_table_crc32 = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFooter(format!("files_table_crc32: {e}")))?;
        let meta_data_size = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFooter(format!("meta_data_size: {e}")))?;
        let meta_data_crc32 = cursor
            .read_u32::<LE>()
            .map_err(|e| CodecError::BadFooter(format!("meta_data_crc32: {e}")))?;
        let compression_tag = cursor
            .read_u8()
            .map_err(|e| CodecError::BadFooter(format!("files_table_compression: {e}")))?;
        let files_table_compression =
            Compression::try_from(compression_tag).map_err(CodecError::UnknownCompression)?;
        let mut padding = [0_u8; 3];
        cursor
            .read_exact(&mut padding)
            .map_err(|e| CodecError::BadFooter(format!("padding: {e}")))?;

        Ok(Self {
            pack_archive_marker,
            files_table_size,
            files_table_crc32,
            meta_data_size,
            meta_data_crc32,
            files_table_compression,
        })
    }
}

use std::io::Read as _;
use std::io::Write as _;

/// The full trailing block: [`FooterInfo`] plus the CRC that authenticates
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// The authenticated payload.
    pub info: FooterInfo,
    /// CRC-32 of the serialized `info` bytes.
    pub info_crc32: u32,
}

/// Serializes `footer` to its on-disk/on-wire representation.
pub fn write_footer(footer: &Footer) -> Vec<u8> {
    let mut out = Vec::with_capacity(FOOTER_SIZE);
    footer.info.write_to(&mut out);
    out.write_u32::<LE>(footer.info_crc32).expect("vec write can't fail");
    out
}

/// Builds a [`Footer`] from a [`FooterInfo`], computing `info_crc32`.
pub fn finalize_footer(info: FooterInfo) -> Footer {
    let mut info_bytes = Vec::with_capacity(FOOTER_INFO_SIZE);
    info.write_to(&mut info_bytes);
    let info_crc32 = crc32(&info_bytes);
    Footer { info, info_crc32 }
}

/// Parses and validates a [`Footer`] from exactly [`FOOTER_SIZE`] bytes.
///
/// Rejects short buffers and `info_crc32` mismatches as [`CodecError::BadFooter`].
pub fn parse_footer(buf: &[u8]) -> Result<Footer, CodecError> {
    if buf.len() < FOOTER_SIZE {
        return Err(CodecError::BadFooter(format!(
            "expected {FOOTER_SIZE} bytes, got {}",
            buf.len()
        )));
    }

    let mut cursor = Cursor::new(&buf[..FOOTER_INFO_SIZE]);
    let info = FooterInfo::read_from(&mut cursor)?;

    let mut crc_cursor = Cursor::new(&buf[FOOTER_INFO_SIZE..FOOTER_SIZE]);
    let info_crc32 = crc_cursor
        .read_u32::<LE>()
        .map_err(|e| CodecError::BadFooter(format!("info_crc32: {e}")))?;

    let computed = crc32(&buf[..FOOTER_INFO_SIZE]);
    if computed != info_crc32 {
        return Err(CodecError::BadFooter(format!(
            "info_crc32 mismatch: computed {computed:#010x} != stored {info_crc32:#010x}"
        )));
    }

    Ok(Footer { info, info_crc32 })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_footer() -> Footer {
        finalize_footer(FooterInfo {
            pack_archive_marker: PACK_ARCHIVE_MARKER,
            files_table_size: 123,
            files_table_crc32: 0xDEAD_BEEF,
            meta_data_size: 45,
            meta_data_crc32: 0xCAFE_F00D,
            files_table_compression: Compression::Lz4,
        })
    }

    #[test]
    fn round_trip() {
        let footer = sample_footer();
        let bytes = write_footer(&footer);
        assert_eq!(bytes.len(), FOOTER_SIZE);
        let parsed = parse_footer(&bytes).expect("well-formed footer must parse");
        assert_eq!(parsed, footer);
    }

    #[test]
    fn mutated_info_byte_is_rejected() {
        let footer = sample_footer();
        let mut bytes = write_footer(&footer);
        bytes[8] ^= 0xFF; // inside FooterInfo
        assert!(matches!(parse_footer(&bytes), Err(CodecError::BadFooter(_))));
    }

    #[test]
    fn truncated_buffer_is_rejected() {
        let footer = sample_footer();
        let bytes = write_footer(&footer);
        assert!(matches!(
            parse_footer(&bytes[..FOOTER_SIZE - 1]),
            Err(CodecError::BadFooter(_))
        ));
    }
}
