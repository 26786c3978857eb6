//! Public key identity.

use std::fmt;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::KeyResolveError;

/// Opaque public key material used to seal secrets.
///
/// The provider never interprets the bytes; it only hands them to the
/// [`Sealer`](crate::Sealer) and fingerprints them to notice when the
/// controller rotates its key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    /// Creates a key from raw bytes (usually a PEM certificate).
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Returns the raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Returns the lowercase hex SHA-256 digest of the key bytes.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(&self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PublicKey")
            .field("len", &self.0.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl From<&str> for PublicKey {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes())
    }
}

impl From<Vec<u8>> for PublicKey {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

/// Fetches the current sealing key from the controller.
///
/// Implementations report "controller not deployed yet" as
/// [`KeyResolveError::NotFound`] or [`KeyResolveError::ServiceUnavailable`] so
/// the [`ReadinessPoller`](crate::ReadinessPoller) can keep waiting.
#[async_trait]
pub trait PublicKeyResolver: Send + Sync {
    /// Resolves the current public key.
    async fn resolve(&self) -> Result<PublicKey, KeyResolveError>;
}
