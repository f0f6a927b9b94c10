//! Filesystem-backed `Store`. Puts stage into a `NamedTempFile` in the same
//! directory and persist (atomic rename) only on success, so a reader never
//! observes a partially written object — the same trick the archive writer
//! uses to make a finalized archive appear all at once.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::{BackupError, Result};

use super::{ObjectMetadata, Store};

pub struct LocalFsStore {
    root: PathBuf,
}

impl LocalFsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        LocalFsStore { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

impl Store for LocalFsStore {
    fn get_sub_folder(&self, prefix: &str) -> Box<dyn Store> {
        Box::new(LocalFsStore::new(self.root.join(prefix)))
    }

    fn list_folder(&self) -> Result<(Vec<String>, Vec<String>)> {
        let mut objects = Vec::new();
        let mut sub_folders = Vec::new();
        if !self.root.exists() {
            return Ok((objects, sub_folders));
        }
        let mut entries: Vec<_> = fs::read_dir(&self.root)?.collect::<std::io::Result<_>>()?;
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let file_type = entry.file_type()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if file_type.is_dir() {
                sub_folders.push(name);
            } else {
                objects.push(name);
            }
        }
        Ok((objects, sub_folders))
    }

    fn read_object(&self, key: &str) -> Result<Box<dyn Read + Send>> {
        let path = self.path_for(key);
        match File::open(&path) {
            Ok(f) => Ok(Box::new(f)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackupError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn put_object(&self, key: &str, reader: &mut dyn Read) -> Result<()> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let parent = path.parent().unwrap_or(Path::new("."));
        let mut staging = NamedTempFile::new_in(parent)?;
        std::io::copy(reader, &mut staging)?;
        staging.flush()?;
        staging
            .persist(&path)
            .map_err(|e| BackupError::PartialUpload {
                key: key.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    fn delete_objects(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            let path = self.path_for(key);
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn head_object(&self, key: &str) -> Result<ObjectMetadata> {
        let path = self.path_for(key);
        match fs::metadata(&path) {
            Ok(meta) => Ok(ObjectMetadata { size: meta.len() }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BackupError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        store.put_object("foo.txt", &mut &b"hello"[..]).unwrap();
        let mut out = Vec::new();
        store.read_object("foo.txt").unwrap().read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn read_missing_object_is_not_found() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        let err = store.read_object("missing").unwrap_err();
        assert!(matches!(err, BackupError::NotFound(_)));
    }

    #[test]
    fn list_folder_separates_objects_and_subfolders() {
        let dir = tempdir().unwrap();
        let store = LocalFsStore::new(dir.path());
        store.put_object("a.txt", &mut &b"x"[..]).unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let (objects, sub_folders) = store.list_folder().unwrap();
        assert_eq!(objects, vec!["a.txt".to_string()]);
        assert_eq!(sub_folders, vec!["sub".to_string()]);
    }
}
