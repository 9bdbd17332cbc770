//! String encryption with AES-256-GCM under a PBKDF2-derived key
//!
//! The 12-byte IV is the native GCM nonce size; the 16-byte tag authenticates
//! both the ciphertext and the key, so a wrong password always fails instead of
//! yielding garbage plaintext.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;
use secrecy::SecretString;
use std::fmt;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

use crate::error::CipherError;
use crate::kdf::{cache_id, derive_key, DerivedKey, KdfParams, KeyCache};
use crate::{IV_SIZE, SALT_SIZE, TAG_SIZE};

/// Parsed form of `salt:iv:ciphertext`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
    pub salt: [u8; SALT_SIZE],
    pub iv: [u8; IV_SIZE],
    /// Ciphertext with the GCM tag appended
    pub ciphertext: Vec<u8>,
}

impl fmt::Display for EncryptedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            hex::encode(self.salt),
            hex::encode(self.iv),
            STANDARD.encode(&self.ciphertext)
        )
    }
}

impl FromStr for EncryptedValue {
    type Err = CipherError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 {
            return Err(CipherError::Malformed(format!(
                "expected 3 colon-separated segments, found {}",
                parts.len()
            )));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(CipherError::Malformed("empty segment".into()));
        }

        let salt = decode_fixed::<SALT_SIZE>(parts[0], "salt")?;
        let iv = decode_fixed::<IV_SIZE>(parts[1], "iv")?;
        let ciphertext = STANDARD
            .decode(parts[2])
            .map_err(|e| CipherError::Malformed(format!("ciphertext is not base64: {e}")))?;
        if ciphertext.len() < TAG_SIZE {
            return Err(CipherError::Malformed(format!(
                "ciphertext too short: {} bytes (minimum {TAG_SIZE})",
                ciphertext.len()
            )));
        }

        Ok(Self {
            salt,
            iv,
            ciphertext,
        })
    }
}

fn decode_fixed<const N: usize>(segment: &str, what: &str) -> Result<[u8; N], CipherError> {
    let bytes = hex::decode(segment)
        .map_err(|e| CipherError::Malformed(format!("{what} is not hex: {e}")))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        CipherError::Malformed(format!("{what} has {} bytes (expected {N})", b.len()))
    })
}

/// True if `raw` has the exact shape `encrypt` produces.
///
/// Shape only: a value can look encrypted and still fail to decrypt under the
/// current password.
pub fn looks_encrypted(raw: &str) -> bool {
    raw.parse::<EncryptedValue>().is_ok()
}

/// Password-based cipher with a bounded key-derivation cache.
///
/// One instance is shared by everything that encrypts for a store; the cache
/// is internal scratch state and is never exposed.
pub struct Cipher {
    iterations: u32,
    cache: Mutex<KeyCache>,
}

impl Cipher {
    pub fn new(params: KdfParams) -> Self {
        Self {
            iterations: params.iterations.max(1),
            cache: Mutex::new(KeyCache::new(params.cache_capacity)),
        }
    }

    /// Derive (or fetch from cache) the key for `(password, salt)`.
    pub fn derive_key(&self, password: &SecretString, salt: &[u8]) -> DerivedKey {
        let id = cache_id(password, salt);
        if let Some(key) = self.cache().get(&id) {
            return key;
        }
        let key = derive_key(password, salt, self.iterations);
        self.cache().insert(id, key.clone());
        key
    }

    /// Encrypt `plaintext` under a fresh salt and IV, returning `salt:iv:ciphertext`.
    pub fn encrypt(&self, plaintext: &str, password: &SecretString) -> Result<String, CipherError> {
        let mut rng = rand::thread_rng();
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);
        let mut iv = [0u8; IV_SIZE];
        rng.fill_bytes(&mut iv);

        let key = self.derive_key(password, &salt);
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&iv), plaintext.as_bytes())
            .map_err(|e| CipherError::Encryption(e.to_string()))?;

        Ok(EncryptedValue {
            salt,
            iv,
            ciphertext,
        }
        .to_string())
    }

    /// Decrypt a `salt:iv:ciphertext` string.
    pub fn decrypt(&self, encoded: &str, password: &SecretString) -> Result<String, CipherError> {
        let value: EncryptedValue = encoded.parse()?;
        let key = self.derive_key(password, &value.salt);
        let cipher = Aes256Gcm::new(key.as_bytes().into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&value.iv), value.ciphertext.as_slice())
            .map_err(|_| CipherError::DecryptionFailed)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::InvalidUtf8)
    }

    /// Drop every cached derivation (on logout or reset).
    pub fn clear_key_cache(&self) {
        let mut cache = self.cache();
        let dropped = cache.len();
        cache.clear();
        debug!(dropped, "key cache cleared");
    }

    /// Number of cached derivations.
    pub fn cached_keys(&self) -> usize {
        self.cache().len()
    }

    fn cache(&self) -> MutexGuard<'_, KeyCache> {
        // A poisoned cache is still structurally valid.
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for Cipher {
    fn default() -> Self {
        Self::new(KdfParams::default())
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("iterations", &self.iterations)
            .field("cached_keys", &self.cached_keys())
            .finish()
    }
}
