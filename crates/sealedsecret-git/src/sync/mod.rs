//! Remote reconciliation.
//!
//! Every local commit is followed by a fetch and a push of the source branch.
//! The [`ConflictPolicy`] decides whether that push may overwrite a remote
//! branch that moved in the meantime.

mod remote;
mod state;

use serde::{Deserialize, Serialize};

pub(crate) use remote::{RemoteSynchronizer, apply_transport_timeout, clone_fetch_options};
pub use state::SyncState;

/// How a push treats a remote branch that diverged from the local one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Last writer wins: the remote branch is replaced by the local one.
    ///
    /// Safe only while a single session writes to the branch. Commits pushed
    /// by anyone else between the fetch and the push are discarded.
    ForceOverwrite,
    /// The push fails with [`SessionError::PushRejected`](crate::SessionError::PushRejected)
    /// when it is not a fast-forward.
    RejectOnDivergence,
}

impl ConflictPolicy {
    /// Returns true if pushes under this policy are forced.
    pub fn is_force(self) -> bool {
        matches!(self, Self::ForceOverwrite)
    }
}
