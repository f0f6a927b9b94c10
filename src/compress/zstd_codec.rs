//! Zstd is decompress-only here: it exists for reading archives produced by
//! older tooling, never for new writes (see the compression registry table).

use std::io::{Read, Write};

use crate::error::Result;

pub fn decompress<R: Read, W: Write>(src: R, mut dst: W) -> Result<()> {
    let mut decoder = zstd::stream::read::Decoder::new(src)?;
    std::io::copy(&mut decoder, &mut dst)?;
    Ok(())
}
