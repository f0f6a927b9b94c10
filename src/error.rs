//! Crate-wide error type.
//!
//! One variant per behavioral error kind a caller might need to match on,
//! plus wrapping variants for the ambient I/O/serialization/crypto failures
//! that bubble up from underneath. Workers never panic on these; they report
//! to a collector channel and the driver decides whether the run is fatal.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid block encountered while scanning {path}: {reason}")]
    InvalidBlock { path: PathBuf, reason: String },

    #[error("truncated delta stream for {path}: expected {expected} blocks, got {got}")]
    TruncatedDelta {
        path: PathBuf,
        expected: u32,
        got: u32,
    },

    #[error("corrupt sentinel for backup {backup}: {reason}")]
    CorruptSentinel { backup: String, reason: String },

    #[error("unsupported archive member extension: {0}")]
    UnsupportedFileType(String),

    #[error("upload interrupted for {key}: {reason}")]
    PartialUpload { key: String, reason: String },

    #[error("external tool failed: {tool} exited with {status}")]
    ExternalToolFailure { tool: String, status: String },

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("no backup chain root found for {0}")]
    NoFullBackup(String),

    #[error("target directory {0} is not empty and no incremental base was found")]
    NonEmptyTargetDirectory(PathBuf),

    #[error("delta chain for {backup} exceeds WALG_DELTA_MAX_STEPS ({max_steps})")]
    ChainTooLong { backup: String, max_steps: u32 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("OpenPGP error: {0}")]
    Pgp(String),
}

pub type Result<T> = std::result::Result<T, BackupError>;
