//! In-memory password session.

use secrecy::SecretString;
use std::sync::Arc;

/// The active decryption secret for one store. Never persisted.
///
/// Cloning shares the same secret allocation.
#[derive(Clone)]
pub struct Session {
    password: Arc<SecretString>,
}

impl Session {
    pub fn new(password: SecretString) -> Self {
        Self {
            password: Arc::new(password),
        }
    }

    pub fn password(&self) -> &SecretString {
        &self.password
    }

    pub(crate) fn shared_password(&self) -> Arc<SecretString> {
        Arc::clone(&self.password)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("password", &"[REDACTED]")
            .finish()
    }
}
