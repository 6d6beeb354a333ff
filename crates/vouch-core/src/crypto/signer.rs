//! Ed25519 ledger signing key: load-or-generate, sign, verify, rotate.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ed25519_dalek::{Signature, Signer as _, SigningKey, Verifier as _, VerifyingKey};
use thiserror::Error;
use zeroize::Zeroizing;

/// Size of the hex-encoded key file payload: 64 raw bytes (secret ‖ public).
const KEYPAIR_BYTES: usize = 64;

/// Errors that can occur during signer operations.
#[derive(Debug, Error)]
pub enum SignerError {
    /// I/O error reading or writing the key file.
    #[error("key file I/O: {0}")]
    Io(#[from] std::io::Error),

    /// The key file exists but is not valid hex.
    #[error("key file is not valid hex: {0}")]
    InvalidEncoding(#[from] hex::FromHexError),

    /// The key file decoded to the wrong number of bytes.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected decoded length.
        expected: usize,
        /// Actual decoded length.
        actual: usize,
    },

    /// The decoded bytes are not a consistent Ed25519 keypair.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),
}

/// The ledger signing key.
///
/// The key is immutable after construction except through [`rotate`], which
/// takes the write half of the lock so it is mutually exclusive with
/// in-flight signs.
///
/// [`rotate`]: LedgerSigner::rotate
pub struct LedgerSigner {
    inner: RwLock<SigningKey>,
    key_path: PathBuf,
}

impl LedgerSigner {
    /// Loads the key from `key_path`, or generates and persists a fresh one
    /// if the file does not exist.
    ///
    /// A file that exists but cannot be parsed is an error, never silently
    /// replaced: an unreadable ledger key means prior signatures could no
    /// longer be attributed.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError`] on I/O failure or malformed key material.
    pub fn load_or_generate(key_path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let key_path = key_path.as_ref().to_path_buf();

        let signing_key = if key_path.exists() {
            read_key_file(&key_path)?
        } else {
            let key = SigningKey::generate(&mut rand::rngs::OsRng);
            write_key_file(&key_path, &key)?;
            key
        };

        Ok(Self {
            inner: RwLock::new(signing_key),
            key_path,
        })
    }

    /// Signs the ASCII bytes of a hex hash, returning the signature as hex.
    #[must_use]
    pub fn sign_hash(&self, hash: &str) -> String {
        let key = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let signature = key.sign(hash.as_bytes());
        hex::encode(signature.to_bytes())
    }

    /// Verifies a hex signature over a hex hash against the current key.
    #[must_use]
    pub fn verify_signature(&self, hash: &str, signature_hex: &str) -> bool {
        let key = self.inner.read().unwrap_or_else(|e| e.into_inner());
        verify_bytes(&key.verifying_key(), hash, signature_hex)
    }

    /// Returns the active public key as hex.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        let key = self.inner.read().unwrap_or_else(|e| e.into_inner());
        hex::encode(key.verifying_key().to_bytes())
    }

    /// Generates a new keypair, atomically replaces the key file, and swaps
    /// the in-memory key. Returns `(old_public_hex, new_public_hex)`.
    ///
    /// Events signed with the old key stay verifiable through the public key
    /// stored in their run record; operationally, rotation begins a new run.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError`] if the replacement file cannot be written or
    /// renamed into place. The in-memory key is only swapped after the file
    /// is durable.
    pub fn rotate(&self) -> Result<(String, String), SignerError> {
        let mut key = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let old_pub = hex::encode(key.verifying_key().to_bytes());
        let new_key = SigningKey::generate(&mut rand::rngs::OsRng);
        let new_pub = hex::encode(new_key.verifying_key().to_bytes());

        // Write-then-rename so a crash mid-rotation leaves the old key intact.
        let tmp_path = self.key_path.with_extension("rotate.tmp");
        write_key_file(&tmp_path, &new_key)?;
        fs::rename(&tmp_path, &self.key_path)?;

        *key = new_key;
        Ok((old_pub, new_pub))
    }

    /// Returns the path of the backing key file.
    #[must_use]
    pub fn key_path(&self) -> &Path {
        &self.key_path
    }
}

/// Verifies a hex signature over a hex hash with an arbitrary public key.
///
/// Used by the chain verifier, which must check against the public key a run
/// was created with rather than whatever key is active now.
#[must_use]
pub fn verify_with_key(public_key_hex: &str, hash: &str, signature_hex: &str) -> bool {
    let Ok(key_bytes) = hex::decode(public_key_hex) else {
        return false;
    };
    let Ok(key_bytes): Result<[u8; 32], _> = key_bytes.try_into() else {
        return false;
    };
    let Ok(verifying_key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    verify_bytes(&verifying_key, hash, signature_hex)
}

fn verify_bytes(verifying_key: &VerifyingKey, hash: &str, signature_hex: &str) -> bool {
    let Ok(sig_bytes) = hex::decode(signature_hex) else {
        return false;
    };
    let Ok(sig_bytes): Result<[u8; 64], _> = sig_bytes.try_into() else {
        return false;
    };
    let signature = Signature::from_bytes(&sig_bytes);
    verifying_key.verify(hash.as_bytes(), &signature).is_ok()
}

fn read_key_file(path: &Path) -> Result<SigningKey, SignerError> {
    let hex_data = fs::read_to_string(path)?;
    let decoded = Zeroizing::new(hex::decode(hex_data.trim())?);

    if decoded.len() != KEYPAIR_BYTES {
        return Err(SignerError::InvalidKeySize {
            expected: KEYPAIR_BYTES,
            actual: decoded.len(),
        });
    }

    let mut keypair_bytes = Zeroizing::new([0u8; KEYPAIR_BYTES]);
    keypair_bytes.copy_from_slice(&decoded);

    SigningKey::from_keypair_bytes(&keypair_bytes)
        .map_err(|e| SignerError::InvalidKeyMaterial(e.to_string()))
}

fn write_key_file(path: &Path, key: &SigningKey) -> Result<(), SignerError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let keypair_bytes = Zeroizing::new(key.to_keypair_bytes());
    let hex_key = Zeroizing::new(hex::encode(&*keypair_bytes));

    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(hex_key.as_bytes())?;
    file.sync_all()?;

    Ok(())
}
