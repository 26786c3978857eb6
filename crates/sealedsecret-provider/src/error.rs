//! Provider error type.

use sealedsecret_core::{KeyResolveError, ManifestError, PollError, SealError};
use sealedsecret_git::{ReviewError, SessionError};

/// Errors returned by the secret publisher.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The settings could not be loaded.
    #[error("failed to load settings: {0}")]
    Settings(#[from] config::ConfigError),

    /// The settings were loaded but are not usable.
    #[error("invalid settings: {0}")]
    InvalidSettings(String),

    /// The secret or the sealed document is malformed.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The sealing key could not be obtained.
    #[error("sealing public key unavailable: {0}")]
    Key(#[from] PollError<KeyResolveError>),

    /// The sealer failed.
    #[error(transparent)]
    Seal(#[from] SealError),

    /// A repository operation failed.
    #[error("{operation} of {path} failed: {source}")]
    Session {
        operation: &'static str,
        path: String,
        #[source]
        source: SessionError,
    },

    /// The review request failed.
    #[error("review request for {branch} failed: {source}")]
    Review {
        branch: String,
        #[source]
        source: ReviewError,
    },
}

impl ProviderError {
    /// Creates a new session error.
    pub fn session(operation: &'static str, path: impl Into<String>, source: SessionError) -> Self {
        Self::Session {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Returns true if retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Session { source, .. } => source.is_transient(),
            Self::Key(err) => err.is_deadline_exceeded(),
            _ => false,
        }
    }
}
