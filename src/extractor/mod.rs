//! Backup Extractor (component E): downloads archive members in parallel,
//! decrypts, decompresses, and streams each into a pluggable interpreter.

use std::io::{Cursor, Read};
use std::path::Path;

use crossbeam_channel::bounded;
use tracing::{instrument, warn};

use crate::compress::CompressionMethod;
use crate::config::Config;
use crate::crypto::{decrypt_stream, Crypter};
use crate::error::{BackupError, Result};
use crate::store::Store;

/// Receives `(header, body)` pairs as a member's tar stream is read. One
/// call per entry, in the order the entries appear in the member.
pub trait TarInterpreter: Send + Sync {
    fn interpret(&self, header: &tar::Header, body: &mut dyn Read) -> Result<()>;
}

/// Returns a token to its channel on every exit path — success, error, or
/// unwind — so a panicking worker can't leak a concurrency slot.
struct TokenGuard<'a> {
    returner: &'a crossbeam_channel::Sender<()>,
}

impl Drop for TokenGuard<'_> {
    fn drop(&mut self) {
        let _ = self.returner.send(());
    }
}

pub struct Extractor<'a> {
    config: &'a Config,
    crypter: Option<&'a Crypter>,
    store: &'a dyn Store,
}

impl<'a> Extractor<'a> {
    pub fn new(config: &'a Config, crypter: Option<&'a Crypter>, store: &'a dyn Store) -> Self {
        Extractor {
            config,
            crypter,
            store,
        }
    }

    /// `member_keys` is every object under `tar_partitions/` for one
    /// backup. The member whose name starts with `pg_control` is
    /// extracted last, serially, after the rest have all completed —
    /// `pg_control` on disk is only ever written by a fully-finished run.
    #[instrument(skip(self, interpreter))]
    pub fn extract_all(&self, member_keys: &[String], interpreter: &dyn TarInterpreter) -> Result<()> {
        let (control, rest): (Vec<_>, Vec<_>) = member_keys
            .iter()
            .cloned()
            .partition(|k| k.starts_with("pg_control"));

        let (token_tx, token_rx) = bounded::<()>(self.config.download_concurrency);
        for _ in 0..self.config.download_concurrency {
            let _ = token_tx.send(());
        }

        let first_error = std::thread::scope(|scope| {
            let handles: Vec<_> = rest
                .iter()
                .map(|key| {
                    let token_rx = token_rx.clone();
                    let token_tx = token_tx.clone();
                    scope.spawn(move || {
                        let _ = token_rx.recv();
                        let _guard = TokenGuard { returner: &token_tx };
                        self.extract_one(key, interpreter)
                    })
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => Some(e),
                    Err(_) => Some(BackupError::PartialUpload {
                        key: "unknown".into(),
                        reason: "extraction worker panicked".into(),
                    }),
                })
                .fold(None, |acc: Option<BackupError>, e| {
                    if acc.is_some() {
                        warn!(error = %e, "additional extraction worker failure");
                    } else {
                        warn!(error = %e, "extraction worker failed");
                    }
                    acc.or(Some(e))
                })
        });

        if let Some(e) = first_error {
            return Err(e);
        }

        for key in &control {
            self.extract_one(key, interpreter)?;
        }

        Ok(())
    }

    fn extract_one(&self, key: &str, interpreter: &dyn TarInterpreter) -> Result<()> {
        let method = method_for_key(key)?;

        // Download.
        let reader = self.store.read_object(key)?;

        // Transform: decrypt (if enabled) then decompress, fully into
        // memory — the registry's decompressors don't share a streaming
        // trait object, so buffering is the uniform join point.
        let decompressed = match self.crypter {
            Some(crypter) => {
                let plaintext_compressed = decrypt_stream(reader, crypter)?;
                let mut out = Vec::new();
                method.decompress(Cursor::new(plaintext_compressed), &mut out)?;
                out
            }
            None => {
                let mut out = Vec::new();
                method.decompress(reader, &mut out)?;
                out
            }
        };

        // Interpret.
        let mut archive = tar::Archive::new(Cursor::new(decompressed));
        for entry in archive.entries()? {
            let mut entry = entry?;
            let header = entry.header().clone();
            interpreter.interpret(&header, &mut entry)?;
        }

        Ok(())
    }
}

fn method_for_key(key: &str) -> Result<CompressionMethod> {
    let ext = Path::new(key)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| BackupError::UnsupportedFileType(key.to_string()))?;
    CompressionMethod::from_extension(ext).ok_or_else(|| BackupError::UnsupportedFileType(ext.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ObjectMetadata;
    use std::collections::HashMap;
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct NoOpInterpreter;

    impl TarInterpreter for NoOpInterpreter {
        fn interpret(&self, _header: &tar::Header, _body: &mut dyn Read) -> Result<()> {
            Ok(())
        }
    }

    /// A `Store` whose `read_object` sleeps while held, so overlapping calls
    /// across worker threads reveal themselves in `peak`.
    struct ConcurrencyTrackingStore {
        objects: HashMap<String, Vec<u8>>,
        active: AtomicUsize,
        peak: Arc<AtomicUsize>,
    }

    impl Store for ConcurrencyTrackingStore {
        fn get_sub_folder(&self, _prefix: &str) -> Box<dyn Store> {
            unimplemented!("not exercised by this test")
        }

        fn list_folder(&self) -> Result<(Vec<String>, Vec<String>)> {
            Ok((self.objects.keys().cloned().collect(), Vec::new()))
        }

        fn read_object(&self, key: &str) -> Result<Box<dyn Read + Send>> {
            let bytes = self
                .objects
                .get(key)
                .cloned()
                .ok_or_else(|| BackupError::NotFound(key.to_string()))?;

            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(active, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(30));
            self.active.fetch_sub(1, Ordering::SeqCst);

            Ok(Box::new(Cursor::new(bytes)))
        }

        fn put_object(&self, _key: &str, _reader: &mut dyn Read) -> Result<()> {
            unimplemented!("not exercised by this test")
        }

        fn delete_objects(&self, _keys: &[String]) -> Result<()> {
            unimplemented!("not exercised by this test")
        }

        fn head_object(&self, _key: &str) -> Result<ObjectMetadata> {
            unimplemented!("not exercised by this test")
        }
    }

    fn make_empty_lz4_member() -> Vec<u8> {
        let empty_tar = tar::Builder::new(Vec::new()).into_inner().unwrap();
        let mut out = Vec::new();
        {
            let mut writer = CompressionMethod::Lz4.new_writer(&mut out).unwrap();
            writer.write_all(&empty_tar).unwrap();
        }
        out
    }

    #[test]
    fn download_concurrency_is_bounded_by_config() {
        let member = make_empty_lz4_member();
        let member_count = 7;
        let objects: HashMap<String, Vec<u8>> = (0..member_count)
            .map(|i| (format!("part_{i:03}.lz4"), member.clone()))
            .collect();
        let keys: Vec<String> = objects.keys().cloned().collect();

        let peak = Arc::new(AtomicUsize::new(0));
        let store = ConcurrencyTrackingStore {
            objects,
            active: AtomicUsize::new(0),
            peak: peak.clone(),
        };

        let mut config = Config::default();
        config.download_concurrency = 2;

        let extractor = Extractor::new(&config, None, &store);
        extractor.extract_all(&keys, &NoOpInterpreter).unwrap();

        assert!(
            peak.load(Ordering::SeqCst) <= config.download_concurrency,
            "observed concurrency {} exceeded configured bound {}",
            peak.load(Ordering::SeqCst),
            config.download_concurrency
        );
    }
}
