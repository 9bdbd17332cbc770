use thiserror::Error;

#[derive(Debug, Error)]
pub enum CipherError {
    /// The input is not `salt:iv:ciphertext` or a segment fails to decode.
    #[error("malformed encrypted value: {0}")]
    Malformed(String),

    /// Authentication failed. A wrong password and tampered ciphertext are
    /// reported identically.
    #[error("decryption failed: wrong password or corrupted data")]
    DecryptionFailed,

    #[error("decrypted data is not valid UTF-8")]
    InvalidUtf8,

    #[error("encryption failed: {0}")]
    Encryption(String),
}
