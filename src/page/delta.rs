//! Per-file delta stream: producing one from a paged file plus a baseline
//! LSN, and applying one back onto a file on restore.
//!
//! The wire format (magic, filesize, blockcount, blockmap, blockdata) is
//! fixed and little-endian throughout; see the module doc on `page`.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::{bounded, Receiver};

use crate::error::{BackupError, Result};
use crate::lsn::Lsn;

use super::header::{is_all_zero, lsn_if_valid, DEFAULT_BLOCK_SIZE};

pub const MAGIC: [u8; 4] = [0x00, 0x01, 0x01, 0x55];

/// Channel capacity for the producer thread; small enough to keep memory
/// bounded, large enough that the scan doesn't stall waiting on the reader.
const CHANNEL_CAPACITY: usize = 4;

/// A `Read` adapter over chunks arriving from the background scan thread.
/// The header (magic + filesize + blockcount + blockmap) is always the
/// first chunk; block data chunks follow in blockmap order.
pub struct DeltaProducer {
    receiver: Receiver<io::Result<Vec<u8>>>,
    handle: Option<thread::JoinHandle<()>>,
    pending: Vec<u8>,
    pos: usize,
    done: bool,
}

impl Read for DeltaProducer {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.done && self.pos >= self.pending.len() {
            return Ok(0);
        }
        loop {
            if self.pos < self.pending.len() {
                let n = std::cmp::min(buf.len(), self.pending.len() - self.pos);
                buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                return Ok(n);
            }
            match self.receiver.recv() {
                Ok(Ok(chunk)) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    self.done = true;
                    return Ok(0);
                }
            }
        }
    }
}

impl Drop for DeltaProducer {
    fn drop(&mut self) {
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Scan `path` against baseline `lsn` and start streaming its delta.
/// The scan itself runs on a dedicated thread; this call returns as soon as
/// the file has been opened, not after the scan completes.
pub fn produce_delta(path: &Path, baseline: Lsn, block_size: usize) -> Result<DeltaProducer> {
    let file = File::open(path)?;
    let filesize = file.metadata()?.len();
    let (tx, rx) = bounded::<io::Result<Vec<u8>>>(CHANNEL_CAPACITY);
    let path = path.to_path_buf();

    let handle = thread::spawn(move || {
        let _ = scan_and_stream(path, filesize, baseline, block_size, &tx);
    });

    Ok(DeltaProducer {
        receiver: rx,
        handle: Some(handle),
        pending: Vec::new(),
        pos: 0,
        done: false,
    })
}

fn scan_and_stream(
    path: PathBuf,
    filesize: u64,
    baseline: Lsn,
    block_size: usize,
    tx: &crossbeam_channel::Sender<io::Result<Vec<u8>>>,
) -> io::Result<()> {
    let mut file = File::open(&path)?;
    let block_count = (filesize / block_size as u64) as u32;
    let mut blockmap = Vec::new();
    let mut buf = vec![0u8; block_size];

    // Pass 1: scan for changed blocks, building the block map.
    for b in 0..block_count {
        if read_exact_or_zero(&mut file, &mut buf)? == 0 {
            break;
        }
        match lsn_if_valid(&buf, block_size as u16) {
            Some(page_lsn) => {
                if is_all_zero(&buf) || page_lsn >= baseline {
                    blockmap.push(b);
                }
            }
            None => {
                let _ = tx.send(Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    BackupError::InvalidBlock {
                        path: path.clone(),
                        reason: format!("block {b} failed header validation"),
                    }
                    .to_string(),
                )));
                return Ok(());
            }
        }
    }

    let mut header = Vec::with_capacity(4 + 8 + 4 + blockmap.len() * 4);
    header.extend_from_slice(&MAGIC);
    header.extend_from_slice(&filesize.to_le_bytes());
    header.extend_from_slice(&(blockmap.len() as u32).to_le_bytes());
    for &b in &blockmap {
        header.extend_from_slice(&b.to_le_bytes());
    }
    if tx.send(Ok(header)).is_err() {
        return Ok(());
    }

    // Pass 2: re-seek and stream the selected blocks, in blockmap order.
    for &b in &blockmap {
        file.seek(SeekFrom::Start(b as u64 * block_size as u64))?;
        let mut page = vec![0u8; block_size];
        read_exact_or_zero(&mut file, &mut page)?;
        if tx.send(Ok(page)).is_err() {
            return Ok(());
        }
    }

    Ok(())
}

/// Reads a full block, zero-padding any short read caused by the file
/// having shrunk between the two scan passes. Returns the number of real
/// (non-padded) bytes read, so callers can detect true EOF.
fn read_exact_or_zero(file: &mut File, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    for b in &mut buf[filled..] {
        *b = 0;
    }
    Ok(filled)
}

/// Apply a delta stream onto `target`, truncating it to the delta's
/// recorded filesize and overwriting the blocks named in the block map.
pub fn apply_delta<R: Read>(target: &Path, mut delta: R) -> Result<()> {
    let mut magic = [0u8; 4];
    delta.read_exact(&mut magic)?;
    if magic != MAGIC {
        return Err(BackupError::CorruptSentinel {
            backup: target.display().to_string(),
            reason: "delta stream has wrong magic bytes".into(),
        });
    }

    let mut filesize_buf = [0u8; 8];
    delta.read_exact(&mut filesize_buf)?;
    let filesize = u64::from_le_bytes(filesize_buf);

    let mut blockcount_buf = [0u8; 4];
    delta.read_exact(&mut blockcount_buf)?;
    let blockcount = u32::from_le_bytes(blockcount_buf);

    let mut blockmap = Vec::with_capacity(blockcount as usize);
    for _ in 0..blockcount {
        let mut b = [0u8; 4];
        delta.read_exact(&mut b)?;
        blockmap.push(u32::from_le_bytes(b));
    }

    let mut out = OpenOptions::new().write(true).create(true).open(target)?;
    out.set_len(filesize)?;

    let mut page = vec![0u8; DEFAULT_BLOCK_SIZE];
    for (i, &block) in blockmap.iter().enumerate() {
        match delta.read_exact(&mut page) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(BackupError::TruncatedDelta {
                    path: target.to_path_buf(),
                    expected: blockcount,
                    got: i as u32,
                });
            }
            Err(e) => return Err(e.into()),
        }
        out.seek(SeekFrom::Start(block as u64 * DEFAULT_BLOCK_SIZE as u64))?;
        out.write_all(&page)?;
    }
    out.sync_all()?;
    Ok(())
}
