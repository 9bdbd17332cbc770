//! Key derivation: PBKDF2-HMAC-SHA256 password → AES key, with a bounded cache

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use zeroize::Zeroize;

use crate::{DEFAULT_CACHE_CAPACITY, DEFAULT_ITERATIONS, KEY_SIZE};

/// A 256-bit key derived from a password and salt.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct DerivedKey {
    bytes: [u8; KEY_SIZE],
}

impl DerivedKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for DerivedKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for DerivedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DerivedKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// PBKDF2 parameters
#[derive(Debug, Clone)]
pub struct KdfParams {
    /// HMAC-SHA256 rounds (default: 20000)
    pub iterations: u32,
    /// Maximum number of cached derivations (default: 100, 0 disables caching)
    pub cache_capacity: usize,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_ITERATIONS,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// Derive a 256-bit key from a password and salt using PBKDF2-HMAC-SHA256.
///
/// CPU-bound; async callers should run it on a blocking thread.
pub fn derive_key(password: &SecretString, salt: &[u8], iterations: u32) -> DerivedKey {
    let mut key = [0u8; KEY_SIZE];
    pbkdf2::pbkdf2_hmac::<Sha256>(
        password.expose_secret().as_bytes(),
        salt,
        iterations.max(1),
        &mut key,
    );
    DerivedKey::from_bytes(key)
}

/// Cache identity of a `(password, salt)` pair.
///
/// The password itself is never retained; only a SHA-256 digest of the
/// length-prefixed pair is used as the map key.
pub(crate) fn cache_id(password: &SecretString, salt: &[u8]) -> [u8; 32] {
    let pw = password.expose_secret().as_bytes();
    let mut hasher = Sha256::new();
    hasher.update((pw.len() as u64).to_be_bytes());
    hasher.update(pw);
    hasher.update(salt);
    hasher.finalize().into()
}

/// Bounded derivation cache. When full, the oldest insertion is evicted first.
pub struct KeyCache {
    capacity: usize,
    entries: HashMap<[u8; 32], DerivedKey>,
    order: VecDeque<[u8; 32]>,
}

impl KeyCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    pub fn get(&self, id: &[u8; 32]) -> Option<DerivedKey> {
        self.entries.get(id).cloned()
    }

    pub fn insert(&mut self, id: [u8; 32], key: DerivedKey) {
        if self.capacity == 0 || self.entries.contains_key(&id) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(id);
        self.entries.insert(id, key);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("capacity", &self.capacity)
            .field("len", &self.entries.len())
            .finish()
    }
}
