//! SealedSecret Provider - secret resource lifecycle
//!
//! Ties the pieces together for one managed secret:
//!
//! 1. wait for the sealing key service ([`sealedsecret_core::ReadinessPoller`])
//! 2. seal the secret with an external [`sealedsecret_core::Sealer`]
//! 3. publish the document through a shared [`sealedsecret_git::RepositorySession`]
//! 4. optionally open a merge request ([`sealedsecret_git::ReviewSubmitter`])
//!
//! [`LocalSealer`] stops after step 2 and hands the document back.
//!
//! Settings are loaded with the `config` crate and logging goes through
//! `tracing`.

pub mod error;
pub mod local;
pub mod publisher;
pub mod settings;
pub mod telemetry;

pub use error::ProviderError;
pub use local::{LocalSealer, LocalSecret};
pub use publisher::{PublishedSecret, ReadOutcome, SecretPublisher, SecretResource, SecretState};
pub use settings::{GitSettings, LogSettings, ProviderSettings, ReadinessSettings, ReviewSettings};
pub use telemetry::init_tracing;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
