//! Archive-Member Abstraction (TarBall): packs files into a size-bounded
//! tar stream, then compresses and optionally encrypts the whole member as
//! one pass before handing it to the Store.

use std::io::{Read, Seek, SeekFrom, Write};

use tar::{Builder, Header};
use tempfile::NamedTempFile;

use crate::compress::CompressionMethod;
use crate::crypto::{Crypter, LazyEncryptingWriter};
use crate::error::Result;
use crate::store::Store;

/// One growing archive member. Entries are written into an uncompressed
/// staging file so `Size()` reflects exactly the declared tar body bytes;
/// compression and encryption happen once, in `close`, rather than per
/// write, since the registry's compressors don't expose a common streaming
/// trait object.
pub struct TarBall {
    builder: Builder<NamedTempFile>,
    size: u64,
    name: String,
    closed: bool,
}

impl TarBall {
    /// `name` should already carry its ordinal, e.g. `part_003` — the
    /// compression extension is appended at `close` time.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let staging = NamedTempFile::new()?;
        Ok(TarBall {
            builder: Builder::new(staging),
            size: 0,
            name: name.into(),
            closed: false,
        })
    }

    /// Append one entry. Must not be called after `close`.
    pub fn append<R: Read>(&mut self, header: &Header, data: R) -> Result<()> {
        debug_assert!(!self.closed, "write after TarBall close");
        self.size += header.size().unwrap_or(0);
        self.builder.append(header, data)?;
        Ok(())
    }

    pub fn append_dir(&mut self, path: &str, mode: u32) -> Result<()> {
        let mut header = Header::new_gnu();
        header.set_entry_type(tar::EntryType::Directory);
        header.set_mode(mode);
        header.set_size(0);
        header.set_cksum();
        self.builder.append_data(&mut header, path, std::io::empty())?;
        Ok(())
    }

    /// Running uncompressed body size; monotone non-decreasing by
    /// construction (append never removes bytes).
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Flushes the tar trailer, compresses, optionally encrypts, uploads
    /// to `store` under `<name>.<ext>`, and returns the final key. This is
    /// the member's one and only upload task; callers that want concurrent
    /// uploads across members spawn `close` itself on a worker thread.
    pub fn close(
        mut self,
        method: CompressionMethod,
        crypter: Option<&Crypter>,
        store: &dyn Store,
        prefix: &str,
    ) -> Result<String> {
        self.closed = true;
        let mut staging = self.builder.into_inner()?;
        staging.flush()?;
        staging.seek(SeekFrom::Start(0))?;

        let mut compressed = NamedTempFile::new()?;
        {
            let mut writer = method.new_writer(&mut compressed)?;
            std::io::copy(&mut staging, &mut writer)?;
        } // compressor's Drop impl flushes the final frame/block.
        compressed.flush()?;
        compressed.seek(SeekFrom::Start(0))?;

        let key = format!("{prefix}.{}", method.file_extension());

        match crypter {
            Some(crypter) => {
                let mut ciphertext = Vec::new();
                {
                    let mut writer = LazyEncryptingWriter::new(&mut ciphertext, crypter);
                    std::io::copy(&mut compressed, &mut writer)?;
                    writer.finish()?;
                }
                store.put_object(&key, &mut ciphertext.as_slice())?;
            }
            None => {
                store.put_object(&key, &mut compressed)?;
            }
        }

        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::local_fs::LocalFsStore;
    use tempfile::tempdir;

    #[test]
    fn close_uploads_one_member_with_correct_extension() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());

        let mut tarball = TarBall::new("part_001").unwrap();
        let mut header = Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        tarball.append(&header, &b"hello"[..]).unwrap();
        assert_eq!(tarball.size(), 5);

        let key = tarball
            .close(CompressionMethod::Lz4, None, &store, "part_001")
            .unwrap();
        assert_eq!(key, "part_001.lz4");
        assert!(store.read_object(&key).is_ok());
    }

    #[test]
    fn size_matches_sum_of_entry_sizes_after_round_trip() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());

        let mut tarball = TarBall::new("part_002").unwrap();
        let payloads: [&[u8]; 3] = [b"hello", b"world!!", b"rust"];
        let mut expected_total = 0u64;
        for payload in payloads {
            let mut header = Header::new_gnu();
            header.set_size(payload.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tarball.append(&header, payload).unwrap();
            expected_total += payload.len() as u64;
        }
        assert_eq!(tarball.size(), expected_total);

        let key = tarball
            .close(CompressionMethod::Lz4, None, &store, "part_002")
            .unwrap();

        let reader = store.read_object(&key).unwrap();
        let mut decompressed = Vec::new();
        CompressionMethod::Lz4.decompress(reader, &mut decompressed).unwrap();

        let mut archive = tar::Archive::new(std::io::Cursor::new(decompressed));
        let mut sum = 0u64;
        for entry in archive.entries().unwrap() {
            let entry = entry.unwrap();
            sum += entry.header().size().unwrap();
        }
        assert_eq!(sum, expected_total);
    }
}
