//! OpenPGP-style encryption (component B, encryption half).
//!
//! Key material comes from a `KeyProvider` — by default an external keyring
//! agent invoked as a subprocess, with its armored output cached on disk
//! keyed by key-id, matching the source's `GetPubRingArmour`/
//! `GetSecretRingArmour` contract. The actual encrypt/decrypt operations use
//! the `pgp` crate rather than shelling out for every byte.

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process::Command;
use std::sync::OnceLock;

use pgp::composed::{
    Deserializable, KeyType, Message, SecretKeyParamsBuilder, SignedPublicKey, SignedSecretKey,
};
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::types::KeyTrait;
use rand::thread_rng;

use crate::error::{BackupError, Result};

/// Given a key-id, returns armored key bytes, possibly cached on disk. The
/// external-agent implementation below is one instance of this contract;
/// tests use an in-memory one.
pub trait KeyProvider: Send + Sync {
    fn public_key_armor(&self, key_id: &str) -> Result<String>;
    fn secret_key_armor(&self, key_id: &str) -> Result<String>;
}

/// Shells out to a local keyring agent (`gpg`) and caches its armored
/// output under `~/.basewarden/keys/<key_id>.{pub,sec}.asc`.
pub struct GpgAgentKeyProvider {
    cache_dir: PathBuf,
}

impl GpgAgentKeyProvider {
    pub fn new() -> Self {
        let cache_dir = dirs_home()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".basewarden")
            .join("keys");
        GpgAgentKeyProvider { cache_dir }
    }

    fn cached_or_fetch(&self, key_id: &str, suffix: &str, args: &[&str]) -> Result<String> {
        let _ = fs::create_dir_all(&self.cache_dir);
        let cache_path = self.cache_dir.join(format!("{key_id}.{suffix}.asc"));
        if let Ok(cached) = fs::read_to_string(&cache_path) {
            if !cached.is_empty() {
                return Ok(cached);
            }
        }

        let output = Command::new("gpg")
            .args(args)
            .arg(key_id)
            .output()
            .map_err(|e| BackupError::ExternalToolFailure {
                tool: "gpg".into(),
                status: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(BackupError::ExternalToolFailure {
                tool: "gpg".into(),
                status: output.status.to_string(),
            });
        }
        let armor = String::from_utf8_lossy(&output.stdout).into_owned();
        let _ = fs::write(&cache_path, &armor);
        Ok(armor)
    }
}

impl Default for GpgAgentKeyProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyProvider for GpgAgentKeyProvider {
    fn public_key_armor(&self, key_id: &str) -> Result<String> {
        self.cached_or_fetch(key_id, "pub", &["--export", "--armor"])
    }

    fn secret_key_armor(&self, key_id: &str) -> Result<String> {
        self.cached_or_fetch(key_id, "sec", &["--export-secret-keys", "--armor"])
    }
}

fn dirs_home() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

/// Process-wide, lazily initialized once per key-id. Injected into the
/// bundler and extractor rather than reached for as a global, but internally
/// caches the parsed key material so repeated archive members in one run
/// don't re-parse the armor.
pub struct Crypter {
    key_id: String,
    provider: Box<dyn KeyProvider>,
    public_key: OnceLock<Result<SignedPublicKey>>,
    secret_key: OnceLock<Result<SignedSecretKey>>,
}

impl Crypter {
    pub fn new(key_id: String, provider: Box<dyn KeyProvider>) -> Self {
        Crypter {
            key_id,
            provider,
            public_key: OnceLock::new(),
            secret_key: OnceLock::new(),
        }
    }

    fn public_key(&self) -> Result<&SignedPublicKey> {
        self.public_key
            .get_or_init(|| {
                let armor = self.provider.public_key_armor(&self.key_id)?;
                let (key, _) = SignedPublicKey::from_string(&armor)
                    .map_err(|e| BackupError::Pgp(e.to_string()))?;
                Ok(key)
            })
            .as_ref()
            .map_err(|e| BackupError::Pgp(e.to_string()))
    }

    fn secret_key(&self) -> Result<&SignedSecretKey> {
        self.secret_key
            .get_or_init(|| {
                let armor = self.provider.secret_key_armor(&self.key_id)?;
                let (key, _) = SignedSecretKey::from_string(&armor)
                    .map_err(|e| BackupError::Pgp(e.to_string()))?;
                Ok(key)
            })
            .as_ref()
            .map_err(|e| BackupError::Pgp(e.to_string()))
    }

    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let pubkey = self.public_key()?;
        let message = Message::new_literal_bytes("", plaintext);
        let mut rng = thread_rng();
        let encrypted = message
            .encrypt_to_keys(&mut rng, SymmetricKeyAlgorithm::AES256, &[&pubkey.public_key()])
            .map_err(|e| BackupError::Pgp(e.to_string()))?;
        encrypted
            .to_bytes()
            .map_err(|e| BackupError::Pgp(e.to_string()))
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        let secret = self.secret_key()?;
        let message = Message::from_bytes(ciphertext).map_err(|e| BackupError::Pgp(e.to_string()))?;
        let (decrypted, _) = message
            .decrypt(|| String::new(), &[secret])
            .map_err(|e| BackupError::DecryptionFailed(e.to_string()))?;
        decrypted
            .get_content()
            .map_err(|e| BackupError::DecryptionFailed(e.to_string()))?
            .ok_or_else(|| BackupError::DecryptionFailed("empty decrypted message".into()))
    }
}

/// Generates a fresh keypair, only used by tests that need a working
/// key-id/provider pair without a real keyring.
#[cfg(test)]
pub fn generate_test_keypair() -> (SignedSecretKey, SignedPublicKey) {
    let mut rng = thread_rng();
    let params = SecretKeyParamsBuilder::default()
        .key_type(KeyType::Rsa(2048))
        .can_encrypt(true)
        .primary_user_id("basewarden-test <test@example.com>".into())
        .build()
        .unwrap();
    let secret_key = params.generate(&mut rng).unwrap();
    let passwd_fn = || String::new();
    let signed_secret = secret_key.sign(&mut rng, passwd_fn).unwrap();
    let public = signed_secret.public_key();
    let signed_public = public.sign(&mut rng, &signed_secret, passwd_fn).unwrap();
    (signed_secret, signed_public)
}

/// A writer that defers initializing the underlying encryption stream
/// until the first non-empty write (or close, whichever comes first), and
/// silently drops zero-length writes so upstream compressors that issue
/// them don't stall waiting on a pipe. Since the `pgp` crate's API
/// operates on whole messages, bytes are buffered and the encrypt pass
/// runs once, at `finish`.
pub struct LazyEncryptingWriter<'a, W: Write> {
    sink: W,
    crypter: &'a Crypter,
    buffer: Vec<u8>,
    finished: bool,
}

impl<'a, W: Write> LazyEncryptingWriter<'a, W> {
    pub fn new(sink: W, crypter: &'a Crypter) -> Self {
        LazyEncryptingWriter {
            sink,
            crypter,
            buffer: Vec::new(),
            finished: false,
        }
    }

    /// Encrypts whatever was buffered (possibly nothing) and flushes the
    /// resulting cipher bytes to the sink. Always produces a valid,
    /// decryptable artifact, even for zero accumulated bytes.
    pub fn finish(mut self) -> Result<W> {
        self.do_finish()?;
        Ok(self.sink)
    }

    fn do_finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        let ciphertext = self.crypter.encrypt(&self.buffer)?;
        self.sink.write_all(&ciphertext)?;
        self.finished = true;
        Ok(())
    }
}

impl<W: Write> Write for LazyEncryptingWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> Drop for LazyEncryptingWriter<'_, W> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.do_finish();
        }
    }
}

/// Reads and decrypts a complete ciphertext stream into memory. Mirrors
/// `LazyEncryptingWriter`'s whole-message approach on the way back in.
pub fn decrypt_stream<R: Read>(mut src: R, crypter: &Crypter) -> Result<Vec<u8>> {
    let mut ciphertext = Vec::new();
    src.read_to_end(&mut ciphertext)?;
    crypter.decrypt(&ciphertext)
}
