//! Process-wide configuration, read once from the environment and passed
//! down explicitly — nothing in the core re-reads the environment mid-run,
//! matching the "configured once, read many" rule applied to the crypter.

use std::env;

use crate::compress::CompressionMethod;

const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 10;
const DEFAULT_MEMBER_SIZE_THRESHOLD: u64 = 1 << 30; // 1 GiB

#[derive(Debug, Clone)]
pub struct Config {
    /// Empty ⇒ encryption off.
    pub gpg_key_id: Option<String>,
    pub download_concurrency: usize,
    pub compression_method: CompressionMethod,
    pub delta_max_steps: Option<u32>,
    pub member_size_threshold: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            gpg_key_id: None,
            download_concurrency: DEFAULT_DOWNLOAD_CONCURRENCY,
            compression_method: CompressionMethod::Lz4,
            delta_max_steps: None,
            member_size_threshold: DEFAULT_MEMBER_SIZE_THRESHOLD,
        }
    }
}

impl Config {
    /// Build a `Config` from the environment inputs table, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();

        if let Ok(key_id) = env::var("WALE_GPG_KEY_ID") {
            if !key_id.is_empty() {
                cfg.gpg_key_id = Some(key_id);
            }
        }

        if let Ok(raw) = env::var("WALG_DOWNLOAD_CONCURRENCY") {
            if let Ok(n) = raw.parse::<usize>() {
                if n > 0 {
                    cfg.download_concurrency = n;
                }
            }
        }

        if let Ok(raw) = env::var("WALG_COMPRESSION_METHOD") {
            if let Some(method) = CompressionMethod::from_env_name(&raw) {
                cfg.compression_method = method;
            }
        }

        if let Ok(raw) = env::var("WALG_DELTA_MAX_STEPS") {
            if let Ok(n) = raw.parse::<u32>() {
                cfg.delta_max_steps = Some(n);
            }
        }

        cfg
    }

    pub fn encryption_enabled(&self) -> bool {
        self.gpg_key_id.is_some()
    }
}
