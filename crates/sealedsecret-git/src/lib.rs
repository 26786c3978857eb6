//! # SealedSecret Git Backend
//!
//! Publishes sealed secret manifests to a Git repository.
//!
//! A [`RepositorySession`] owns a private clone of one remote branch. Every
//! publish or delete is a locked write, commit, fetch and push cycle, so
//! many resources can share one session safely. A [`ReviewSubmitter`] then
//! asks the hosting platform to merge the branch.
//!
//! ## Features
//!
//! - Clone and branch checkout via libgit2, idempotent across runs
//! - Lock-serialized mutations with atomic file replacement
//! - Configurable push policy (force or fast-forward only)
//! - Cancellation and timeouts for every remote operation
//! - Idempotent GitLab merge requests
//!
//! ## Example
//!
//! ```ignore
//! use sealedsecret_git::{RepositorySession, ReviewSubmitter, SessionConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! let config = SessionConfig::builder()
//!     .url("https://gitlab.com/org/secrets")
//!     .source_branch("sealed-secrets")
//!     .basic_auth("bot", token)
//!     .build()?;
//!
//! let cancel = CancellationToken::new();
//! let session = RepositorySession::open(config, &cancel).await?;
//! session.publish("apps/db.yaml", sealed_yaml, &cancel).await?;
//!
//! let review = ReviewSubmitter::gitlab(session.url(), token)?;
//! review
//!     .submit(session.url(), session.source_branch(), session.target_branch())
//!     .await?;
//! ```

pub mod error;
pub mod repository;
pub mod review;
pub mod sync;

// Re-exports
pub use error::{ReviewError, SessionError};
pub use repository::{
    BranchName, CommitInfo, Credentials, RepositorySession, SessionConfig, SessionConfigBuilder,
};
pub use review::{
    GitLabClient, MergeRequest, Project, ReviewApi, ReviewRequest, ReviewSubmitter, SubmitOutcome,
    is_duplicate_request,
};
pub use sync::{ConflictPolicy, SyncState};

// Re-export sealedsecret_core for consumers
pub use sealedsecret_core;
