//! SealedSecret Core - Domain types and traits
//!
//! This crate provides the foundational types for the sealed secret provider:
//!
//! - [`PublicKey`] and its fingerprint, used to detect key rotation
//! - [`SecretManifest`], the plaintext input handed to a [`Sealer`]
//! - [`SealedSecretDocument`], the YAML document persisted in Git
//! - [`ReadinessPoller`], a bounded-retry wait for the key service to come up
//!
//! Sealing itself and key retrieval are provided by collaborators through the
//! [`Sealer`] and [`PublicKeyResolver`] traits.

pub mod error;
pub mod key;
pub mod manifest;
pub mod readiness;
pub mod secret;

pub use error::{KeyResolveError, ManifestError, SealError};
pub use key::{PublicKey, PublicKeyResolver};
pub use manifest::{KEY_FINGERPRINT_ANNOTATION, SealedSecretDocument};
pub use readiness::{PollError, ReadinessPoller, ReadinessPollerBuilder, RetryClass};
pub use secret::{Sealer, SecretManifest};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
