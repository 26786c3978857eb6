//! Error types for the sealed secret domain.
//!
//! Each collaborator boundary gets its own error type so callers can decide
//! whether to retry, surface or suppress a failure:
//!
//! - [`KeyResolveError`] separates "the key service is not up yet" from real
//!   failures, which is what the readiness poller keys its retries on
//! - [`SealError`] wraps failures of the external sealing transform
//! - [`ManifestError`] covers reading and writing the persisted YAML document

use thiserror::Error;

/// Errors reported by a public key resolver.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyResolveError {
    /// The key service (or the key itself) does not exist yet.
    #[error("public key not found: {0}")]
    NotFound(String),

    /// The key service exists but cannot answer yet.
    #[error("key service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Any other failure.
    #[error("failed to resolve public key: {0}")]
    Other(String),
}

impl KeyResolveError {
    /// Creates a NotFound error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a ServiceUnavailable error.
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    /// Creates an Other error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other(message.into())
    }

    /// Returns true if the key service is expected to become ready later.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::ServiceUnavailable(_))
    }
}

/// Failure of the sealing transform.
#[derive(Debug, Error)]
#[error("failed to seal secret '{secret}': {message}")]
pub struct SealError {
    /// Name of the secret being sealed.
    pub secret: String,
    /// Description of the failure.
    pub message: String,
}

impl SealError {
    /// Creates a new SealError.
    pub fn new(secret: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            message: message.into(),
        }
    }
}

/// Errors reading or writing a sealed secret document.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document is not valid YAML or does not match the expected shape.
    #[error("failed to parse sealed secret document: {0}")]
    Parse(#[source] serde_yaml::Error),

    /// The document could not be serialized.
    #[error("failed to serialize sealed secret document: {0}")]
    Serialize(#[source] serde_yaml::Error),

    /// A required field is missing or empty.
    #[error("invalid sealed secret document: missing {field}")]
    MissingField {
        /// Name of the missing field.
        field: &'static str,
    },

    /// The secret input failed validation.
    #[error("invalid secret '{name}': {reason}")]
    InvalidSecret {
        /// Name of the offending secret (may be empty).
        name: String,
        /// Why it is invalid.
        reason: String,
    },
}

impl ManifestError {
    /// Creates an InvalidSecret error.
    pub fn invalid_secret(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidSecret {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_error_display() {
        let err = KeyResolveError::not_found("service sealed-secrets");
        assert_eq!(err.to_string(), "public key not found: service sealed-secrets");

        let err = KeyResolveError::unavailable("503");
        assert_eq!(err.to_string(), "key service unavailable: 503");
    }

    #[test]
    fn test_key_error_is_not_ready() {
        assert!(KeyResolveError::not_found("x").is_not_ready());
        assert!(KeyResolveError::unavailable("x").is_not_ready());
        assert!(!KeyResolveError::other("forbidden").is_not_ready());
    }

    #[test]
    fn test_seal_error_display() {
        let err = SealError::new("db-creds", "bad key");
        assert_eq!(err.to_string(), "failed to seal secret 'db-creds': bad key");
    }

    #[test]
    fn test_manifest_error_display() {
        let err = ManifestError::MissingField {
            field: "spec.encryptedData",
        };
        assert_eq!(
            err.to_string(),
            "invalid sealed secret document: missing spec.encryptedData"
        );
    }
}
