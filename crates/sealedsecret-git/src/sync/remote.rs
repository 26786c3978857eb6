//! Fetch and push against the session's remote using libgit2.

use std::cell::RefCell;
use std::time::Duration;

use git2::{
    Cred, CredentialType, ErrorCode, FetchOptions, PushOptions, RemoteCallbacks, Repository,
};
use parking_lot::{Mutex, const_mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ConflictPolicy;
use crate::error::SessionError;
use crate::repository::{Credentials, SessionConfig};

/// Socket timeout currently installed in libgit2, in milliseconds.
static TRANSPORT_TIMEOUT_MS: Mutex<Option<i32>> = const_mutex(None);

/// Bounds connect and read calls of libgit2's network transports.
///
/// The setting is process-wide, so the shortest timeout asked for by any
/// session wins. Local-path remotes do not use sockets and are unaffected.
pub(crate) fn apply_transport_timeout(timeout: Duration) -> Result<(), SessionError> {
    let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX).max(1);

    let mut installed = TRANSPORT_TIMEOUT_MS.lock();
    if installed.is_some_and(|current| current <= millis) {
        return Ok(());
    }

    // SAFETY: libgit2 keeps these in plain globals; every write goes through
    // the lock held above.
    unsafe {
        git2::opts::set_server_connect_timeout_in_milliseconds(millis)
            .and_then(|()| git2::opts::set_server_timeout_in_milliseconds(millis))
    }
    .map_err(|e| SessionError::git("configure transport timeout", e))?;

    debug!("libgit2 transport timeout set to {}ms", millis);
    *installed = Some(millis);
    Ok(())
}

/// Builds the callbacks shared by clone, fetch and push.
///
/// libgit2 only looks at the cancellation token from inside these callbacks.
/// A transfer that stalls before the first progress report is ended by the
/// socket timeout from [`apply_transport_timeout`] instead.
fn remote_callbacks<'a>(
    credentials: Option<&'a Credentials>,
    cancel: &'a CancellationToken,
) -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();

    let mut attempted = false;
    callbacks.credentials(move |url, _username_from_url, allowed| {
        // libgit2 calls back again with the same answer after a 401
        if attempted {
            return Err(git2::Error::from_str(
                "authentication failed: credentials were rejected",
            ));
        }
        attempted = true;

        match credentials {
            Some(creds) if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) => {
                Cred::userpass_plaintext(creds.username(), creds.token())
            },
            Some(_) => Err(git2::Error::from_str(&format!(
                "{} does not accept username/token authentication",
                url
            ))),
            None => Err(git2::Error::from_str(&format!(
                "{} requires authentication but no credentials are configured",
                url
            ))),
        }
    });
    callbacks.transfer_progress(move |_| !cancel.is_cancelled());
    callbacks.sideband_progress(move |_| !cancel.is_cancelled());
    callbacks.push_negotiation(move |_| {
        if cancel.is_cancelled() {
            Err(git2::Error::from_str("push cancelled"))
        } else {
            Ok(())
        }
    });

    callbacks
}

/// Fetch options for the initial clone.
pub(crate) fn clone_fetch_options<'a>(
    config: &'a SessionConfig,
    cancel: &'a CancellationToken,
) -> FetchOptions<'a> {
    let mut options = FetchOptions::new();
    options.remote_callbacks(remote_callbacks(config.credentials(), cancel));
    options
}

/// Reconciles the local source branch with the remote.
pub(crate) struct RemoteSynchronizer<'a> {
    repo: &'a Repository,
    config: &'a SessionConfig,
    cancel: &'a CancellationToken,
    operation: &'static str,
}

impl<'a> RemoteSynchronizer<'a> {
    pub(crate) fn new(
        repo: &'a Repository,
        config: &'a SessionConfig,
        cancel: &'a CancellationToken,
        operation: &'static str,
    ) -> Self {
        Self {
            repo,
            config,
            cancel,
            operation,
        }
    }

    /// Fetches, then pushes the source branch under `policy`.
    pub(crate) fn reconcile(&self, policy: ConflictPolicy) -> Result<(), SessionError> {
        self.fetch()?;
        self.push(policy)
    }

    /// Updates the remote-tracking references. Nothing new is not an error.
    pub(crate) fn fetch(&self) -> Result<(), SessionError> {
        self.checkpoint()?;

        let remote_name = self.config.remote_name();
        let mut remote = self
            .repo
            .find_remote(remote_name)
            .map_err(|e| self.fetch_error(e))?;

        let mut options = FetchOptions::new();
        options.remote_callbacks(remote_callbacks(self.config.credentials(), self.cancel));

        let refspecs: [&str; 0] = [];
        remote
            .fetch(&refspecs, Some(&mut options), None)
            .map_err(|e| self.fetch_error(e))?;

        let received = remote.stats().received_objects();
        if received == 0 {
            debug!("Remote {} already up to date", remote_name);
        } else {
            debug!("Fetched {} objects from {}", received, remote_name);
        }

        Ok(())
    }

    /// Pushes the source branch.
    pub(crate) fn push(&self, policy: ConflictPolicy) -> Result<(), SessionError> {
        self.checkpoint()?;

        let branch = self.config.source_branch();
        let mut remote = self
            .repo
            .find_remote(self.config.remote_name())
            .map_err(|e| self.push_error(e))?;

        let rejection: RefCell<Option<String>> = RefCell::new(None);
        let mut callbacks = remote_callbacks(self.config.credentials(), self.cancel);
        callbacks.push_update_reference(|refname, status| {
            if let Some(reason) = status {
                warn!("Remote rejected update of {}: {}", refname, reason);
                *rejection.borrow_mut() = Some(reason.to_string());
            }
            Ok(())
        });

        let mut options = PushOptions::new();
        options.remote_callbacks(callbacks);

        let refspec = branch.push_refspec(policy.is_force());
        remote
            .push(&[refspec.as_str()], Some(&mut options))
            .map_err(|e| self.push_error(e))?;

        if let Some(reason) = rejection.borrow_mut().take() {
            return Err(SessionError::PushRejected {
                branch: branch.to_string(),
                reason,
            });
        }

        info!(
            "Pushed {} to {} ({:?})",
            branch,
            self.config.remote_name(),
            policy
        );
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), SessionError> {
        if self.cancel.is_cancelled() {
            return Err(SessionError::Cancelled {
                operation: self.operation,
            });
        }
        Ok(())
    }

    fn fetch_error(&self, err: git2::Error) -> SessionError {
        if self.cancel.is_cancelled() {
            return SessionError::Cancelled {
                operation: self.operation,
            };
        }
        SessionError::Fetch {
            remote: self.config.remote_name().to_string(),
            message: err.message().to_string(),
        }
    }

    fn push_error(&self, err: git2::Error) -> SessionError {
        if self.cancel.is_cancelled() {
            return SessionError::Cancelled {
                operation: self.operation,
            };
        }
        let branch = self.config.source_branch().to_string();
        if err.code() == ErrorCode::NotFastForward {
            return SessionError::PushRejected {
                branch,
                reason: err.message().to_string(),
            };
        }
        SessionError::Push {
            branch,
            message: err.message().to_string(),
        }
    }
}
