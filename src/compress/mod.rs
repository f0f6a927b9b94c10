//! Compression registry: one entry per supported algorithm, keyed by both
//! name (for `WALG_COMPRESSION_METHOD`) and file extension (for dispatch
//! on an archive member's name during extraction).

mod lz4;
mod lzma;
mod lzo;
mod zstd_codec;

use std::io::{Read, Write};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Lz4,
    Lzma,
    Zstd,
    Lzo,
}

impl CompressionMethod {
    pub fn from_env_name(name: &str) -> Option<Self> {
        match name {
            "lz4" => Some(CompressionMethod::Lz4),
            "lzma" => Some(CompressionMethod::Lzma),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "lz4" => Some(CompressionMethod::Lz4),
            "lzma" => Some(CompressionMethod::Lzma),
            "zst" => Some(CompressionMethod::Zstd),
            "lzo" => Some(CompressionMethod::Lzo),
            _ => None,
        }
    }

    pub fn file_extension(self) -> &'static str {
        match self {
            CompressionMethod::Lz4 => "lz4",
            CompressionMethod::Lzma => "lzma",
            CompressionMethod::Zstd => "zst",
            CompressionMethod::Lzo => "lzo",
        }
    }

    pub fn is_streaming(self) -> bool {
        matches!(self, CompressionMethod::Lz4 | CompressionMethod::Lzma)
    }

    /// Wraps `sink` in a compressing writer. Only the two mandatory
    /// streaming algorithms support this direction.
    pub fn new_writer<'a, W: Write + 'a>(self, sink: W) -> Result<Box<dyn Write + 'a>> {
        match self {
            CompressionMethod::Lz4 => lz4::new_writer(sink),
            CompressionMethod::Lzma => lzma::new_writer(sink),
            CompressionMethod::Zstd | CompressionMethod::Lzo => {
                Err(crate::error::BackupError::UnsupportedFileType(format!(
                    "{} is decompress-only",
                    self.file_extension()
                )))
            }
        }
    }

    /// Decompresses the entirety of `src` into `dst`. Supported for every
    /// registered algorithm, including the compatibility-only ones.
    pub fn decompress<R: Read, W: Write>(self, src: R, dst: W) -> Result<()> {
        match self {
            CompressionMethod::Lz4 => lz4::decompress(src, dst),
            CompressionMethod::Lzma => lzma::decompress(src, dst),
            CompressionMethod::Zstd => zstd_codec::decompress(src, dst),
            CompressionMethod::Lzo => lzo::decompress(src, dst),
        }
    }
}
