//! Compression tags shared by the `FileTable` block and the `.dvpl`
//! LitePack trailer.

/// Which, if any, compression was applied to a block or file payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Compression {
    /// Stored as-is.
    None = 0,
    /// LZ4 block compression.
    Lz4 = 1,
    /// LZ4 high-compression variant.
    Lz4Hc = 2,
    /// RFC 1951 raw deflate.
    Rfc1951 = 3,
    /// Zstandard.
    Zstd = 4,
}

impl TryFrom<u8> for Compression {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Lz4),
            2 => Ok(Compression::Lz4Hc),
            3 => Ok(Compression::Rfc1951),
            4 => Ok(Compression::Zstd),
            other => Err(other),
        }
    }
}
