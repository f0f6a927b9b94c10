use std::io::{Read, Write};

use xz2::read::XzDecoder;
use xz2::write::XzEncoder;

use crate::error::Result;

const DEFAULT_PRESET: u32 = 6;

pub fn new_writer<'a, W: Write + 'a>(sink: W) -> Result<Box<dyn Write + 'a>> {
    Ok(Box::new(XzEncoder::new(sink, DEFAULT_PRESET)))
}

pub fn decompress<R: Read, W: Write>(src: R, mut dst: W) -> Result<()> {
    let mut decoder = XzDecoder::new(src);
    std::io::copy(&mut decoder, &mut dst)?;
    Ok(())
}
