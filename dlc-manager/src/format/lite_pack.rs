//! The `.dvpl` "LitePack" trailer: 16 bytes appended to a downloaded file
//! recording how to decompress and verify it.
//!
//! Layout, little-endian:
//!
//! ```text
//! size_compressed   u32
//! crc32_compressed  u32
//! compression       u8, then 3 bytes of padding
//! ```

use byteorder::{LittleEndian as LE, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::CodecError;
use crate::format::compression::Compression;

/// Size in bytes of a serialized [`LitePackTrailer`].
pub const LITE_PACK_TRAILER_SIZE: usize = 16;

/// The trailer appended to every `.dvpl` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LitePackTrailer {
    /// Size of the payload preceding this trailer, as stored on disk.
    pub size_compressed: u32,
    /// CRC-32 of the payload preceding this trailer, as stored on disk.
    pub crc32_compressed: u32,
    /// Compression applied to the payload.
    pub compression: Compression,
}

/// Serializes `trailer` to its 16-byte on-disk representation.
pub fn write_lite_pack_trailer(trailer: &LitePackTrailer) -> [u8; LITE_PACK_TRAILER_SIZE] {
    let mut out = Vec::with_capacity(LITE_PACK_TRAILER_SIZE);
    out.write_u32::<LE>(trailer.size_compressed).expect("vec write can't fail");
    out.write_u32::<LE>(trailer.crc32_compressed).expect("vec write can't fail");
    out.write_u8(trailer.compression as u8).expect("vec write can't fail");
    out.write_all(&[0, 0, 0]).expect("vec write can't fail");
    out.try_into().expect("exactly LITE_PACK_TRAILER_SIZE bytes written")
}

/// Parses a trailer from exactly [`LITE_PACK_TRAILER_SIZE`] bytes (the last
/// 16 bytes of a `.dvpl` file).
pub fn parse_lite_pack_trailer(buf: &[u8]) -> Result<LitePackTrailer, CodecError> {
    if buf.len() != LITE_PACK_TRAILER_SIZE {
        return Err(CodecError::TruncatedTrailer);
    }

    let mut cursor = Cursor::new(buf);
    let size_compressed = cursor.read_u32::<LE>().map_err(|_| CodecError::TruncatedTrailer)?;
    let crc32_compressed = cursor.read_u32::<LE>().map_err(|_| CodecError::TruncatedTrailer)?;
    let compression_tag = cursor.read_u8().map_err(|_| CodecError::TruncatedTrailer)?;
    let compression =
        Compression::try_from(compression_tag).map_err(CodecError::UnknownCompression)?;
    let mut padding = [0_u8; 3];
    cursor.read_exact(&mut padding).map_err(|_| CodecError::TruncatedTrailer)?;

    Ok(LitePackTrailer {
        size_compressed,
        crc32_compressed,
        compression,
    })
}

/// Reads a [`LitePackTrailer`] from the last 16 bytes of an open file,
/// restoring the file's prior seek position on success or failure.
pub fn read_lite_pack_trailer(
    file: &mut std::fs::File,
) -> Result<LitePackTrailer, CodecError> {
    use std::io::{Seek, SeekFrom};

    let original_pos = file
        .stream_position()
        .map_err(|_| CodecError::TruncatedTrailer)?;

    let result = (|| {
        file.seek(SeekFrom::End(-(LITE_PACK_TRAILER_SIZE as i64)))
            .map_err(|_| CodecError::TruncatedTrailer)?;
        let mut buf = [0_u8; LITE_PACK_TRAILER_SIZE];
        file.read_exact(&mut buf).map_err(|_| CodecError::TruncatedTrailer)?;
        parse_lite_pack_trailer(&buf)
    })();

    let _ = file.seek(SeekFrom::Start(original_pos));
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let trailer = LitePackTrailer {
            size_compressed: 4096,
            crc32_compressed: 0x1234_5678,
            compression: Compression::Rfc1951,
        };
        let bytes = write_lite_pack_trailer(&trailer);
        assert_eq!(bytes.len(), LITE_PACK_TRAILER_SIZE);
        let parsed = parse_lite_pack_trailer(&bytes).expect("well-formed trailer must parse");
        assert_eq!(parsed, trailer);
    }

    #[test]
    fn wrong_length_rejected() {
        assert!(matches!(
            parse_lite_pack_trailer(&[0_u8; 10]),
            Err(CodecError::TruncatedTrailer)
        ));
    }

    #[test]
    fn unknown_compression_tag_rejected() {
        let trailer = LitePackTrailer {
            size_compressed: 1,
            crc32_compressed: 2,
            compression: Compression::None,
        };
        let mut bytes = write_lite_pack_trailer(&trailer);
        bytes[8] = 0xFF;
        assert!(matches!(
            parse_lite_pack_trailer(&bytes),
            Err(CodecError::UnknownCompression(0xFF))
        ));
    }

    #[test]
    fn reads_trailer_from_real_file_and_restores_position() {
        use std::io::{Seek, Write as _};

        let mut file = tempfile::tempfile().expect("tempfile");
        file.write_all(b"payload-bytes-before-trailer").unwrap();
        let trailer = LitePackTrailer {
            size_compressed: 29,
            crc32_compressed: 0xDEAD_BEEF,
            compression: Compression::Lz4,
        };
        file.write_all(&write_lite_pack_trailer(&trailer)).unwrap();

        file.seek(std::io::SeekFrom::Start(3)).unwrap();
        let parsed = read_lite_pack_trailer(&mut file).expect("trailer must parse");
        assert_eq!(parsed, trailer);
        assert_eq!(file.stream_position().unwrap(), 3);
    }
}
