//! Sentinel/Manifest (component F): per-backup JSON document. Field names
//! are bit-exact on the wire — restore tooling written against the
//! original format must be able to parse ours.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lsn::Lsn;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileEntry {
    #[serde(rename = "IsIncremented")]
    pub is_incremented: bool,
    #[serde(rename = "IsSkipped")]
    pub is_skipped: bool,
    #[serde(rename = "MTime")]
    pub mtime: DateTime<Utc>,
    #[serde(rename = "Size")]
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sentinel {
    #[serde(rename = "BackupStartLSN")]
    pub backup_start_lsn: u64,
    #[serde(rename = "BackupFinishLSN")]
    pub backup_finish_lsn: u64,
    #[serde(rename = "IncrementFrom")]
    pub increment_from: Option<String>,
    #[serde(rename = "IncrementFromLSN")]
    pub increment_from_lsn: Option<u64>,
    #[serde(rename = "Files")]
    pub files: BTreeMap<String, FileEntry>,
}

impl Sentinel {
    pub fn new_full(start_lsn: Lsn) -> Self {
        Sentinel {
            backup_start_lsn: start_lsn.into(),
            backup_finish_lsn: 0,
            increment_from: None,
            increment_from_lsn: None,
            files: BTreeMap::new(),
        }
    }

    pub fn new_incremental(start_lsn: Lsn, parent_name: String, parent_lsn: Lsn) -> Self {
        Sentinel {
            backup_start_lsn: start_lsn.into(),
            backup_finish_lsn: 0,
            increment_from: Some(parent_name),
            increment_from_lsn: Some(parent_lsn.into()),
            files: BTreeMap::new(),
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.increment_from.is_some()
    }

    pub fn finish_lsn(&self) -> Lsn {
        Lsn(self.backup_finish_lsn)
    }

    pub fn to_json(&self) -> crate::error::Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    pub fn from_json(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

pub const SENTINEL_SUFFIX: &str = "_backup_stop_sentinel.json";

pub fn sentinel_key(backup_name: &str) -> String {
    format!("{backup_name}{SENTINEL_SUFFIX}")
}

pub fn backup_name_from_sentinel_key(key: &str) -> Option<&str> {
    key.strip_suffix(SENTINEL_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_then_deserialize_is_identity() {
        let mut sentinel = Sentinel::new_incremental(Lsn(100), "base_000000010000000000000001".into(), Lsn(100));
        sentinel.backup_finish_lsn = 200;
        sentinel.files.insert(
            "base/1".into(),
            FileEntry {
                is_incremented: true,
                is_skipped: false,
                mtime: Utc::now(),
                size: 8192,
            },
        );

        let json = sentinel.to_json().unwrap();
        let parsed = Sentinel::from_json(&json).unwrap();
        assert_eq!(sentinel, parsed);
    }

    #[test]
    fn sentinel_key_round_trips_backup_name() {
        let key = sentinel_key("base_000000010000000000000001");
        assert_eq!(
            backup_name_from_sentinel_key(&key),
            Some("base_000000010000000000000001")
        );
    }
}
