//! Backup Bundler (component D): walks a data directory, routes each entry
//! into size-bounded archive members, and emits the per-backup sentinel
//! once every member has uploaded.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use tar::Header;
use tracing::{info, instrument, warn};
use walkdir::WalkDir;

use crate::archive::TarBall;
use crate::compress::CompressionMethod;
use crate::config::Config;
use crate::crypto::Crypter;
use crate::error::{BackupError, Result};
use crate::fsx;
use crate::lsn::Lsn;
use crate::page::{self, DEFAULT_BLOCK_SIZE};
use crate::sentinel::{sentinel_key, FileEntry, Sentinel};
use crate::store::Store;

const EXCLUDE_DIR_NAMES: [&str; 10] = [
    "pg_xlog",
    "pg_wal",
    "pg_replslot",
    "pg_dynshmem",
    "pg_notify",
    "pg_serial",
    "pg_snapshots",
    "pg_subtrans",
    "log",
    "pg_log",
];

const EXCLUDE_FILE_NAMES: [&str; 2] = ["postmaster.pid", "postmaster.opts"];

const PG_CONTROL: &str = "pg_control";

pub struct ParentBackup<'a> {
    pub name: &'a str,
    pub sentinel: &'a Sentinel,
}

pub struct Bundler<'a> {
    config: &'a Config,
    crypter: Option<&'a Crypter>,
    store: &'a dyn Store,
}

impl<'a> Bundler<'a> {
    pub fn new(config: &'a Config, crypter: Option<&'a Crypter>, store: &'a dyn Store) -> Self {
        Bundler {
            config,
            crypter,
            store,
        }
    }

    /// Walks `data_dir` and produces a full or incremental backup named
    /// `backup_name`. `parent` and `label_files` (`backup_label`,
    /// `tablespace_map`) are both optional — their absence means a full
    /// backup with no stop-backup label files yet attached.
    #[instrument(skip(self, label_files))]
    pub fn bundle(
        &self,
        data_dir: &Path,
        backup_name: &str,
        start_lsn: Lsn,
        finish_lsn: Lsn,
        parent: Option<ParentBackup>,
        label_files: &[(String, Vec<u8>)],
    ) -> Result<Sentinel> {
        let prefix = format!("{backup_name}/tar_partitions");
        let method = self.config.compression_method;
        let mut files = BTreeMap::new();
        let mut part_no = 0u32;
        let mut pg_control_path: Option<PathBuf> = None;

        let member_store = self.store.get_sub_folder(&prefix);

        let result: Result<()> = std::thread::scope(|scope| {
            let mut handles: Vec<std::thread::ScopedJoinHandle<Result<String>>> = Vec::new();
            let mut current = TarBall::new(format!("part_{:03}", part_no))?;

            let mut it = WalkDir::new(data_dir).sort_by_file_name().into_iter();
            while let Some(entry) = it.next() {
                let entry = entry.map_err(|e| BackupError::Io(e.into()))?;
                let rel = match entry.path().strip_prefix(data_dir) {
                    Ok(r) if !r.as_os_str().is_empty() => r.to_path_buf(),
                    _ => continue, // root itself
                };
                let name = entry.file_name().to_string_lossy().into_owned();

                if entry.file_type().is_dir() && EXCLUDE_DIR_NAMES.contains(&name.as_str()) {
                    current.append_dir(&rel.to_string_lossy(), 0o755)?;
                    it.skip_current_dir();
                    continue;
                }
                if entry.file_type().is_dir() {
                    current.append_dir(&rel.to_string_lossy(), 0o755)?;
                    continue;
                }
                if EXCLUDE_FILE_NAMES.contains(&name.as_str()) {
                    continue;
                }
                if name == PG_CONTROL {
                    pg_control_path = Some(entry.path().to_path_buf());
                    continue;
                }

                let path = entry.path().to_path_buf();
                let meta = entry.metadata().map_err(|e| BackupError::Io(e.into()))?;
                let mtime = mtime_of(&meta);
                let rel_str = rel.to_string_lossy().into_owned();

                if let Some(parent) = parent.as_ref() {
                    if let Some(prior) = parent.sentinel.files.get(&rel_str) {
                        if prior.size == meta.len() as i64 && prior.mtime == mtime {
                            files.insert(
                                rel_str,
                                FileEntry {
                                    is_incremented: false,
                                    is_skipped: true,
                                    mtime,
                                    size: meta.len() as i64,
                                },
                            );
                            continue;
                        }
                    }
                }

                let baseline = parent.as_ref().map(|p| p.sentinel.finish_lsn());

                let (reader, is_paged) =
                    page::read_database_file(&path, baseline, DEFAULT_BLOCK_SIZE)?;

                let mut header = Header::new_gnu();
                header.set_mode(fsx::maybe_unix_mode(&meta).unwrap_or(0o644));
                if let Ok(mtime_secs) = meta.modified().unwrap_or(std::time::SystemTime::now()).duration_since(UNIX_EPOCH) {
                    header.set_mtime(mtime_secs.as_secs());
                }

                if is_paged {
                    let mut reader = reader;
                    let mut buf = Vec::new();
                    std::io::Read::read_to_end(&mut reader, &mut buf)?;
                    header.set_size(buf.len() as u64);
                    header.set_cksum();
                    current.append(&header, buf.as_slice())?;
                } else {
                    header.set_size(meta.len());
                    header.set_cksum();
                    current.append(&header, reader)?;
                }

                files.insert(
                    rel_str,
                    FileEntry {
                        is_incremented: is_paged,
                        is_skipped: false,
                        mtime,
                        size: meta.len() as i64,
                    },
                );

                if current.size() >= self.config.member_size_threshold {
                    part_no += 1;
                    let next = TarBall::new(format!("part_{:03}", part_no))?;
                    let finished = std::mem::replace(&mut current, next);
                    let crypter = self.crypter;
                    let store = member_store.as_ref();
                    let member_prefix = finished.name().to_string();
                    handles.push(scope.spawn(move || finished.close(method, crypter, store, &member_prefix)));
                }
            }

            // Flush the last non-control member, even if empty (keeps
            // naming contiguous and handles the all-excluded-tree case).
            let crypter = self.crypter;
            let store = member_store.as_ref();
            let member_prefix = current.name().to_string();
            handles.push(scope.spawn(move || current.close(method, crypter, store, &member_prefix)));

            // pg_control and the stop-backup label files are sealed into a
            // dedicated member uploaded after every other member's upload
            // has been spawned, so it is always the last to land.
            let mut control = TarBall::new("pg_control.tar")?;
            if let Some(pg_control_path) = pg_control_path.as_ref() {
                let meta = std::fs::metadata(pg_control_path)?;
                let mut header = Header::new_gnu();
                header.set_mode(fsx::maybe_unix_mode(&meta).unwrap_or(0o600));
                header.set_size(meta.len());
                header.set_cksum();
                let file = std::fs::File::open(pg_control_path)?;
                control.append(&header, file)?;
                files.insert(
                    PG_CONTROL.to_string(),
                    FileEntry {
                        is_incremented: false,
                        is_skipped: false,
                        mtime: mtime_of(&meta),
                        size: meta.len() as i64,
                    },
                );
            }
            for (name, bytes) in label_files {
                let mut header = Header::new_gnu();
                header.set_mode(0o600);
                header.set_size(bytes.len() as u64);
                header.set_cksum();
                control.append(&header, bytes.as_slice())?;
            }

            let first_error = handles
                .into_iter()
                .filter_map(|h| match h.join() {
                    Ok(Ok(_key)) => None,
                    Ok(Err(e)) => Some(e),
                    Err(_) => Some(BackupError::PartialUpload {
                        key: "unknown".into(),
                        reason: "member upload thread panicked".into(),
                    }),
                })
                .fold(None, |acc, e| {
                    if acc.is_none() {
                        warn!(error = %e, "archive member upload failed");
                    } else {
                        warn!(error = %e, "additional archive member upload failure");
                    }
                    acc.or(Some(e))
                });

            // pg_control member closes and uploads last, synchronously on
            // this thread, after every other member's upload has already
            // been spawned and joined above.
            control.close(method, self.crypter, member_store.as_ref(), "pg_control.tar")?;

            match first_error {
                Some(e) => Err(e),
                None => Ok(()),
            }
        });
        result?;

        let mut sentinel = match parent {
            Some(p) => Sentinel::new_incremental(start_lsn, p.name.to_string(), p.sentinel.finish_lsn()),
            None => Sentinel::new_full(start_lsn),
        };
        sentinel.backup_finish_lsn = finish_lsn.into();
        sentinel.files = files;

        let json = sentinel.to_json()?;
        self.store.put_object(&sentinel_key(backup_name), &mut json.as_slice())?;
        info!(backup = backup_name, "sentinel written; backup complete");

        Ok(sentinel)
    }
}

fn mtime_of(meta: &std::fs::Metadata) -> DateTime<Utc> {
    meta.modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
