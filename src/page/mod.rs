//! Page Codec: page header validity, per-file delta production, and delta
//! application.

mod delta;
mod header;

pub use delta::{apply_delta, produce_delta, DeltaProducer, MAGIC};
pub use header::{is_all_zero, lsn_if_valid, PageHeader, DEFAULT_BLOCK_SIZE, HEADER_SIZE};

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use crate::error::Result;
use crate::lsn::Lsn;

const EXCLUDED_SUFFIXES: [&str; 2] = ["_fsm", "_vm"];

/// A regular file is a *paged file* candidate iff its size is a positive
/// multiple of the page size and its name doesn't end in an excluded
/// suffix (free-space-map, visibility-map).
pub fn is_paged_candidate(path: &Path, len: u64, block_size: usize) -> bool {
    if len == 0 || len % block_size as u64 != 0 {
        return false;
    }
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    !EXCLUDED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// Prepends a handful of already-read bytes back onto a reader.
struct PrefixedReader<R> {
    prefix: Vec<u8>,
    pos: usize,
    inner: R,
}

impl<R: Read> Read for PrefixedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.prefix.len() {
            let n = std::cmp::min(buf.len(), self.prefix.len() - self.pos);
            buf[..n].copy_from_slice(&self.prefix[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        self.inner.read(buf)
    }
}

/// Reads a file for bundling: if it is a paged-file candidate and a
/// baseline LSN was given, attempts to produce a delta stream; on any
/// scan failure (including an invalid, non-zero block) falls back to a
/// plain file reader with `isPaged=false` rather than propagating an
/// error, mirroring the Page Codec's documented fallback behavior.
pub fn read_database_file(
    path: &Path,
    baseline: Option<Lsn>,
    block_size: usize,
) -> Result<(Box<dyn Read + Send>, bool)> {
    let len = std::fs::metadata(path)?.len();
    let Some(baseline) = baseline else {
        return Ok((Box::new(File::open(path)?), false));
    };
    if !is_paged_candidate(path, len, block_size) {
        return Ok((Box::new(File::open(path)?), false));
    }

    let mut producer = produce_delta(path, baseline, block_size)?;
    let mut probe = [0u8; 1];
    match producer.read(&mut probe) {
        Ok(0) => Ok((Box::new(File::open(path)?), false)),
        Ok(n) => Ok((
            Box::new(PrefixedReader {
                prefix: probe[..n].to_vec(),
                pos: 0,
                inner: producer,
            }),
            true,
        )),
        Err(_) => Ok((Box::new(File::open(path)?), false)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Read, Write};
    use tempfile::tempdir;

    fn make_valid_page(lsn: u64, block_size: usize) -> Vec<u8> {
        let mut page = vec![0u8; block_size];
        page[0..4].copy_from_slice(&((lsn >> 32) as u32).to_le_bytes());
        page[4..8].copy_from_slice(&((lsn & 0xFFFF_FFFF) as u32).to_le_bytes());
        page[12..14].copy_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        page[14..16].copy_from_slice(&(HEADER_SIZE as u16).to_le_bytes());
        page[16..18].copy_from_slice(&(block_size as u16).to_le_bytes());
        page[18..20].copy_from_slice(&((block_size as u16).wrapping_add(4)).to_le_bytes());
        page
    }

    #[test]
    fn delta_round_trip_on_modified_block() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel.1");
        let block_size = DEFAULT_BLOCK_SIZE;

        let mut original = Vec::new();
        for i in 0..4u64 {
            original.extend_from_slice(&make_valid_page(100 + i, block_size));
        }
        std::fs::write(&path, &original).unwrap();

        // Bump one block's LSN past the baseline to mark it changed.
        let mut modified = original.clone();
        let changed_block = 2usize;
        let bumped = make_valid_page(500, block_size);
        modified[changed_block * block_size..(changed_block + 1) * block_size]
            .copy_from_slice(&bumped);
        std::fs::write(&path, &modified).unwrap();

        let baseline = Lsn(200);
        let mut producer = produce_delta(&path, baseline, block_size).unwrap();
        let mut delta_bytes = Vec::new();
        producer.read_to_end(&mut delta_bytes).unwrap();

        let target = dir.path().join("restored.1");
        std::fs::write(&target, &original).unwrap(); // start from the old version
        apply_delta(&target, delta_bytes.as_slice()).unwrap();

        let restored = std::fs::read(&target).unwrap();
        assert_eq!(restored, modified);
    }

    #[test]
    fn non_paged_file_falls_back_to_raw_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("README");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"not a page file").unwrap();
        drop(f);

        let (mut reader, is_paged) = read_database_file(&path, Some(Lsn(1)), DEFAULT_BLOCK_SIZE).unwrap();
        assert!(!is_paged);
        let mut buf = Vec::new();
        reader.read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"not a page file");
    }

    #[test]
    fn invalid_block_falls_back_without_erroring() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel.2");
        let block_size = DEFAULT_BLOCK_SIZE;

        let mut data = make_valid_page(100, block_size);
        data.extend_from_slice(&make_valid_page(150, block_size));
        // Corrupt the second block's header so it is neither valid nor all-zero.
        data[block_size + 12..block_size + 14].copy_from_slice(&1u16.to_le_bytes());
        data[block_size] = 0xFF;
        std::fs::write(&path, &data).unwrap();

        let (_reader, is_paged) =
            read_database_file(&path, Some(Lsn(50)), block_size).unwrap();
        assert!(!is_paged);
    }

    #[test]
    fn fsm_suffix_is_excluded_regardless_of_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rel.1_fsm");
        std::fs::write(&path, vec![0u8; DEFAULT_BLOCK_SIZE]).unwrap();
        assert!(!is_paged_candidate(&path, DEFAULT_BLOCK_SIZE as u64, DEFAULT_BLOCK_SIZE));
    }
}
