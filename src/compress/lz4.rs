use std::io::{Read, Write};

use lz4_flex::frame::{FrameDecoder, FrameEncoder};

use crate::error::Result;

pub fn new_writer<'a, W: Write + 'a>(sink: W) -> Result<Box<dyn Write + 'a>> {
    Ok(Box::new(FrameEncoder::new(sink)))
}

pub fn decompress<R: Read, W: Write>(src: R, mut dst: W) -> Result<()> {
    let mut decoder = FrameDecoder::new(src);
    std::io::copy(&mut decoder, &mut dst)?;
    Ok(())
}
