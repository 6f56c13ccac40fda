//! CRC-32 helper used to authenticate every block of the superpack.
//!
//! IEEE polynomial, initial value `0xFFFF_FFFF`, reflected input/output,
//! xorout `0xFFFF_FFFF`: exactly what [`crc32fast`] computes, which is why
//! the crate is used directly rather than hand-rolling a table (grounded on
//! `crc32fast` usage in the pack, e.g. the `datablok`/`sorex` examples'
//! binary-header modules).

/// Computes the CRC-32 (IEEE) of `buf`.
pub fn crc32(buf: &[u8]) -> u32 {
    crc32fast::hash(buf)
}
