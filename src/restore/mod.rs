//! Restore Driver (component H): resolves a backup name (or `LATEST`),
//! recurses through the incremental chain, and drives the extractor once
//! per chain level, base-first. Each incremental level moves the directory's
//! current contents aside into `increment_base/`, restores its own skipped
//! files straight back out of that base, and extracts its own tar members on
//! top — the same move-aside-and-merge dance the original implementation
//! does in `UnwrapBackup`, run once per chain level inside one `restore()`
//! call.

mod interpreter;

use std::path::Path;

use tracing::{info, instrument};

use crate::config::Config;
use crate::crypto::Crypter;
use crate::error::{BackupError, Result};
use crate::extractor::Extractor;
use crate::sentinel::{backup_name_from_sentinel_key, sentinel_key, Sentinel};
use crate::store::Store;

pub use interpreter::RestoreInterpreter;

pub const LATEST: &str = "LATEST";

pub struct RestoreDriver<'a> {
    config: &'a Config,
    crypter: Option<&'a Crypter>,
    store: &'a dyn Store,
}

impl<'a> RestoreDriver<'a> {
    pub fn new(config: &'a Config, crypter: Option<&'a Crypter>, store: &'a dyn Store) -> Self {
        RestoreDriver {
            config,
            crypter,
            store,
        }
    }

    /// Scans for sentinel objects and returns the name of the backup with
    /// the greatest `BackupFinishLSN`, tie-broken by lexicographic object
    /// order.
    pub fn resolve_latest(&self) -> Result<String> {
        let (objects, _) = self.store.list_folder()?;
        let mut best: Option<(String, Sentinel)> = None;
        for key in objects {
            let Some(name) = backup_name_from_sentinel_key(&key) else {
                continue;
            };
            let bytes = match self.store.read_object(&key) {
                Ok(mut r) => {
                    let mut buf = Vec::new();
                    std::io::Read::read_to_end(&mut r, &mut buf)?;
                    buf
                }
                Err(_) => continue,
            };
            let sentinel = Sentinel::from_json(&bytes)?;
            best = match best {
                None => Some((name.to_string(), sentinel)),
                Some((best_name, best_sentinel)) => {
                    if sentinel.finish_lsn() > best_sentinel.finish_lsn()
                        || (sentinel.finish_lsn() == best_sentinel.finish_lsn() && name > best_name.as_str())
                    {
                        Some((name.to_string(), sentinel))
                    } else {
                        Some((best_name, best_sentinel))
                    }
                }
            };
        }
        best.map(|(name, _)| name)
            .ok_or_else(|| BackupError::NotFound("no backups found".into()))
    }

    fn fetch_sentinel(&self, backup_name: &str) -> Result<Sentinel> {
        let key = sentinel_key(backup_name);
        let mut reader = self.store.read_object(&key)?;
        let mut bytes = Vec::new();
        std::io::Read::read_to_end(&mut reader, &mut bytes)?;
        Sentinel::from_json(&bytes)
    }

    /// Builds the chain root-first: `[full, ..., target]`.
    fn resolve_chain(&self, backup_name: &str) -> Result<Vec<(String, Sentinel)>> {
        let mut chain = Vec::new();
        let mut current_name = backup_name.to_string();
        loop {
            let sentinel = self.fetch_sentinel(&current_name)?;
            let parent = sentinel.increment_from.clone();
            chain.push((current_name.clone(), sentinel));

            if let Some(max_steps) = self.config.delta_max_steps {
                if chain.len() as u32 > max_steps {
                    return Err(BackupError::ChainTooLong {
                        backup: backup_name.to_string(),
                        max_steps,
                    });
                }
            }

            match parent {
                Some(parent_name) => current_name = parent_name,
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    #[instrument(skip(self))]
    pub fn restore(&self, backup_name_or_latest: &str, target_dir: &Path) -> Result<()> {
        let backup_name = if backup_name_or_latest == LATEST {
            self.resolve_latest()?
        } else {
            backup_name_or_latest.to_string()
        };

        let chain = self.resolve_chain(&backup_name)?;

        for (name, sentinel) in &chain {
            info!(backup = %name, "unwrapping chain level");
            self.unwrap_one(target_dir, name, sentinel)?;
        }

        Ok(())
    }

    /// Materializes one chain level onto `target_dir`. A root (non-
    /// incremental) level requires an empty directory. An incremental level
    /// moves whatever is already there aside into `increment_base/`,
    /// restores its own skipped files straight back out, extracts its own
    /// tar members (patching incremented files against their base content),
    /// and finally discards `increment_base/`.
    fn unwrap_one(&self, target_dir: &Path, name: &str, sentinel: &Sentinel) -> Result<()> {
        std::fs::create_dir_all(target_dir)?;
        let increment_base = target_dir.join("increment_base");

        if sentinel.is_incremental() {
            move_aside(target_dir, &increment_base)?;
            restore_skipped_files(&increment_base, target_dir, sentinel)?;
        } else if std::fs::read_dir(target_dir)?.next().is_some() {
            return Err(BackupError::NonEmptyTargetDirectory(target_dir.to_path_buf()));
        }

        let member_store = self.store.get_sub_folder(&format!("{name}/tar_partitions"));
        let (member_keys, _) = member_store.list_folder()?;
        let extractor = Extractor::new(self.config, self.crypter, member_store.as_ref());
        let base_dir = sentinel.is_incremental().then(|| increment_base.clone());
        let interpreter = RestoreInterpreter::new(target_dir, sentinel, base_dir.as_deref());
        extractor.extract_all(&member_keys, &interpreter)?;

        if sentinel.is_incremental() {
            std::fs::remove_dir_all(&increment_base)?;
        }
        Ok(())
    }
}

/// Moves every entry currently under `target_dir` into `increment_base`
/// (creating it if needed), leaving `target_dir` empty for the level about
/// to be extracted onto it.
fn move_aside(target_dir: &Path, increment_base: &Path) -> Result<()> {
    std::fs::create_dir_all(increment_base)?;
    for entry in std::fs::read_dir(target_dir)? {
        let entry = entry?;
        if entry.file_name() == "increment_base" {
            continue;
        }
        std::fs::rename(entry.path(), increment_base.join(entry.file_name()))?;
    }
    Ok(())
}

/// Moves every file the level's sentinel marks `IsSkipped` straight back
/// from `increment_base` onto `target_dir` — those files never appear in
/// the level's own tar members at all.
fn restore_skipped_files(increment_base: &Path, target_dir: &Path, sentinel: &Sentinel) -> Result<()> {
    for (rel, entry) in &sentinel.files {
        if !entry.is_skipped {
            continue;
        }
        let src = increment_base.join(rel);
        if !src.exists() {
            continue;
        }
        let dest = target_dir.join(rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(src, dest)?;
    }
    Ok(())
}
