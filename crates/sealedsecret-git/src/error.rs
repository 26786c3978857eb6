//! Error types for repository sessions and review requests.

use std::path::PathBuf;

/// Errors that can occur while working with a repository session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The remote repository could not be cloned.
    #[error("failed to clone {url}: {message}")]
    Clone { url: String, message: String },

    /// The source branch could not be created or checked out.
    #[error("failed to materialize branch {branch}: {message}")]
    Branch { branch: String, message: String },

    /// The requested path is not tracked in the working tree.
    #[error("path not found: {}", .path.display())]
    NotFound { path: PathBuf },

    /// The path is not a valid repository-relative file path.
    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: &'static str },

    /// An I/O error occurred in the working tree.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local Git operation failed.
    #[error("git error during {operation}: {message}")]
    Git {
        operation: &'static str,
        message: String,
    },

    /// Fetching from the remote failed.
    #[error("failed to fetch from {remote}: {message}")]
    Fetch { remote: String, message: String },

    /// Pushing to the remote failed.
    #[error("failed to push {branch}: {message}")]
    Push { branch: String, message: String },

    /// The remote refused the reference update.
    #[error("push of {branch} rejected by remote: {reason}")]
    PushRejected { branch: String, reason: String },

    /// The caller cancelled the operation.
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The operation did not finish in time.
    #[error("{operation} timed out after {seconds}s")]
    Timeout {
        operation: &'static str,
        seconds: u64,
    },

    /// The blocking task running the operation failed.
    #[error("{operation} task failed: {message}")]
    Task {
        operation: &'static str,
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SessionError {
    /// Creates a new Git error.
    pub fn git(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Git {
            operation,
            message: err.to_string(),
        }
    }

    /// Creates a new I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates a new not found error.
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Returns true if the path was absent.
    ///
    /// Callers use this to treat deletes of missing files as already done and
    /// to notice files removed behind their back.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true if the error came from talking to the remote and a later
    /// publish might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::Push { .. }
                | Self::PushRejected { .. }
                | Self::Timeout { .. }
        )
    }
}

/// Errors that can occur while submitting a review request.
#[derive(Debug, thiserror::Error)]
pub enum ReviewError {
    /// The repository URL cannot be mapped to a review API.
    #[error("invalid repository URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// No project visible to the token has the repository URL.
    #[error("no project found for {url}")]
    ProjectNotFound { url: String },

    /// The review API answered with an error status.
    #[error("review API returned {status}: {message}")]
    Api { status: u16, message: String },

    /// The request did not complete.
    #[error("review API request failed: {0}")]
    Http(#[from] reqwest::Error),
}

impl ReviewError {
    /// Creates a new invalid URL error.
    pub fn invalid_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Returns the HTTP status for API errors.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Http(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}
