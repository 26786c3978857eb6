//! Repository session configuration.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::BranchName;
use crate::error::SessionError;
use crate::sync::ConflictPolicy;

/// Basic-auth credentials for the remote (username plus access token).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    username: String,
    token: String,
}

impl Credentials {
    /// Creates new credentials.
    pub fn new(username: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            token: token.into(),
        }
    }

    /// Returns the username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Returns the access token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// Configuration for a [`RepositorySession`](super::RepositorySession).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// The repository URL (HTTPS, or a local path in tests).
    url: String,

    /// Branch the session writes to.
    source_branch: BranchName,

    /// Branch review requests target. Never written.
    #[serde(default = "default_target_branch")]
    target_branch: BranchName,

    /// Credentials for the remote (optional).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credentials: Option<Credentials>,

    /// Author and committer name.
    #[serde(default = "default_author_name")]
    author_name: String,

    /// Author and committer email.
    #[serde(default = "default_author_email")]
    author_email: String,

    /// Name of the remote created by the clone.
    #[serde(default = "default_remote_name")]
    remote_name: String,

    /// Clone timeout duration.
    #[serde(default = "default_clone_timeout", with = "humantime_serde")]
    clone_timeout: Duration,

    /// Timeout for one mutation, including fetch and push.
    #[serde(default = "default_sync_timeout", with = "humantime_serde")]
    sync_timeout: Duration,

    /// Push policy used after a publish.
    #[serde(default = "default_publish_policy")]
    publish_policy: ConflictPolicy,

    /// Push policy used after a delete.
    #[serde(default = "default_delete_policy")]
    delete_policy: ConflictPolicy,
}

fn default_target_branch() -> BranchName {
    BranchName::new("main").unwrap_or_else(|_| unreachable!("\"main\" is a valid branch name"))
}

fn default_author_name() -> String {
    "SEALEDSECRET-PROVIDER".to_string()
}

fn default_author_email() -> String {
    "sealedsecret-provider@localhost".to_string()
}

fn default_remote_name() -> String {
    "origin".to_string()
}

fn default_clone_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_sync_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_publish_policy() -> ConflictPolicy {
    ConflictPolicy::ForceOverwrite
}

fn default_delete_policy() -> ConflictPolicy {
    ConflictPolicy::RejectOnDivergence
}

impl SessionConfig {
    /// Creates a new builder for SessionConfig.
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::default()
    }

    /// Returns the repository URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the branch the session writes to.
    pub fn source_branch(&self) -> &BranchName {
        &self.source_branch
    }

    /// Returns the branch review requests target.
    pub fn target_branch(&self) -> &BranchName {
        &self.target_branch
    }

    /// Returns the credentials.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Returns the commit author name.
    pub fn author_name(&self) -> &str {
        &self.author_name
    }

    /// Returns the commit author email.
    pub fn author_email(&self) -> &str {
        &self.author_email
    }

    /// Returns the remote name.
    pub fn remote_name(&self) -> &str {
        &self.remote_name
    }

    /// Returns the clone timeout.
    pub fn clone_timeout(&self) -> Duration {
        self.clone_timeout
    }

    /// Returns the timeout for one mutation.
    pub fn sync_timeout(&self) -> Duration {
        self.sync_timeout
    }

    /// Returns the push policy used after a publish.
    pub fn publish_policy(&self) -> ConflictPolicy {
        self.publish_policy
    }

    /// Returns the push policy used after a delete.
    pub fn delete_policy(&self) -> ConflictPolicy {
        self.delete_policy
    }
}

/// Builder for SessionConfig.
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    url: Option<String>,
    source_branch: Option<String>,
    target_branch: Option<String>,
    credentials: Option<Credentials>,
    author_name: Option<String>,
    author_email: Option<String>,
    remote_name: Option<String>,
    clone_timeout: Option<Duration>,
    sync_timeout: Option<Duration>,
    publish_policy: Option<ConflictPolicy>,
    delete_policy: Option<ConflictPolicy>,
}

impl SessionConfigBuilder {
    /// Sets the repository URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the branch the session writes to.
    pub fn source_branch(mut self, branch: impl Into<String>) -> Self {
        self.source_branch = Some(branch.into());
        self
    }

    /// Sets the branch review requests target.
    pub fn target_branch(mut self, branch: impl Into<String>) -> Self {
        self.target_branch = Some(branch.into());
        self
    }

    /// Sets basic authentication credentials.
    pub fn basic_auth(mut self, username: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, token));
        self
    }

    /// Sets the commit author.
    pub fn author(mut self, name: impl Into<String>, email: impl Into<String>) -> Self {
        self.author_name = Some(name.into());
        self.author_email = Some(email.into());
        self
    }

    /// Sets the remote name.
    pub fn remote_name(mut self, name: impl Into<String>) -> Self {
        self.remote_name = Some(name.into());
        self
    }

    /// Sets the clone timeout.
    pub fn clone_timeout(mut self, timeout: Duration) -> Self {
        self.clone_timeout = Some(timeout);
        self
    }

    /// Sets the timeout for one mutation.
    pub fn sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = Some(timeout);
        self
    }

    /// Sets the push policy used after a publish.
    pub fn publish_policy(mut self, policy: ConflictPolicy) -> Self {
        self.publish_policy = Some(policy);
        self
    }

    /// Sets the push policy used after a delete.
    pub fn delete_policy(mut self, policy: ConflictPolicy) -> Self {
        self.delete_policy = Some(policy);
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or a branch name is
    /// invalid.
    pub fn build(self) -> Result<SessionConfig, SessionError> {
        let url = self
            .url
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| SessionError::InvalidConfig("url is required".to_string()))?;
        let source_branch = self
            .source_branch
            .ok_or_else(|| SessionError::InvalidConfig("source_branch is required".to_string()))?;
        let source_branch = BranchName::new(source_branch)
            .map_err(|e| SessionError::InvalidConfig(format!("source_branch: {}", e)))?;
        let target_branch = match self.target_branch {
            Some(branch) => BranchName::new(branch)
                .map_err(|e| SessionError::InvalidConfig(format!("target_branch: {}", e)))?,
            None => default_target_branch(),
        };
        let remote_name = self.remote_name.unwrap_or_else(default_remote_name);
        if remote_name.is_empty() || remote_name.contains(char::is_whitespace) {
            return Err(SessionError::InvalidConfig(format!(
                "invalid remote name '{}'",
                remote_name
            )));
        }

        Ok(SessionConfig {
            url,
            source_branch,
            target_branch,
            credentials: self.credentials,
            author_name: self.author_name.unwrap_or_else(default_author_name),
            author_email: self.author_email.unwrap_or_else(default_author_email),
            remote_name,
            clone_timeout: self.clone_timeout.unwrap_or_else(default_clone_timeout),
            sync_timeout: self.sync_timeout.unwrap_or_else(default_sync_timeout),
            publish_policy: self.publish_policy.unwrap_or_else(default_publish_policy),
            delete_policy: self.delete_policy.unwrap_or_else(default_delete_policy),
        })
    }
}
