//! Binary superpack format: parsing and serialization for each of its
//! blocks, each authenticated by its own CRC-32.

pub mod compression;
pub mod crc32;
pub mod file_table;
pub mod footer;
pub mod lite_pack;
pub mod meta;

pub use compression::Compression;
pub use file_table::{FileTableEntry, parse_file_table, write_file_table};
pub use footer::{Footer, FooterInfo, finalize_footer, parse_footer, write_footer};
pub use lite_pack::{
    LITE_PACK_TRAILER_SIZE, LitePackTrailer, parse_lite_pack_trailer, read_lite_pack_trailer,
    write_lite_pack_trailer,
};
pub use meta::{Meta, PackInfo, parse_meta, write_meta};
