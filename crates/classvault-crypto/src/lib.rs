//! classvault-crypto: password-based encryption of opaque strings
//!
//! Encoded value format (text):
//! ```text
//! <salt: 16 bytes hex>:<iv: 12 bytes hex>:<ciphertext + 16-byte GCM tag, base64>
//! ```
//!
//! Key derivation:
//! ```text
//! password + salt ──PBKDF2-HMAC-SHA256 (20 000 rounds)──▶ 256-bit AES key
//!                  └── cached per (password, salt), bounded FIFO
//! ```
//!
//! Every `encrypt` draws a fresh salt and IV, so identical inputs never produce
//! identical output.

pub mod cipher;
pub mod error;
pub mod kdf;

pub use cipher::{looks_encrypted, Cipher, EncryptedValue};
pub use error::CipherError;
pub use kdf::{derive_key, DerivedKey, KdfParams, KeyCache};

/// Size of a derived AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of the per-value PBKDF2 salt
pub const SALT_SIZE: usize = 16;

/// Size of an AES-GCM nonce (96-bit)
pub const IV_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Default PBKDF2 round count
pub const DEFAULT_ITERATIONS: u32 = 20_000;

/// Default bound on cached derivations
pub const DEFAULT_CACHE_CAPACITY: usize = 100;
