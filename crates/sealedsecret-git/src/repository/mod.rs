//! Repository sessions.
//!
//! This module owns the working copy the provider writes sealed secrets into.

mod branch;
mod config;
mod session;

pub use branch::BranchName;
pub use config::{Credentials, SessionConfig, SessionConfigBuilder};
pub use session::{CommitInfo, RepositorySession};
