//! LZO decompression for compatibility with archives produced by older
//! tooling. There is no LZO writer: new archive members never use it.

use std::io::{Read, Write};

use crate::error::{BackupError, Result};

pub fn decompress<R: Read, W: Write>(mut src: R, mut dst: W) -> Result<()> {
    let mut compressed = Vec::new();
    src.read_to_end(&mut compressed)?;
    let decompressed = minilzo_rs::LZO::new()
        .map_err(|e| BackupError::UnsupportedFileType(format!("lzo init failed: {e:?}")))?
        .decompress_safe(&compressed, compressed.len() * 8)
        .map_err(|e| BackupError::UnsupportedFileType(format!("lzo decompress failed: {e:?}")))?;
    dst.write_all(&decompressed)?;
    Ok(())
}
