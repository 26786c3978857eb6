//! Provider settings.
//!
//! Settings come from an optional YAML/TOML/JSON file overlaid with
//! environment variables such as `SEALEDSECRET_GIT__URL` or
//! `SEALEDSECRET_REVIEW__ENABLED`.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use sealedsecret_core::ReadinessPoller;
use sealedsecret_git::{ConflictPolicy, SessionConfig};
use serde::Deserialize;

use crate::error::ProviderError;

/// Prefix of environment variables read by [`ProviderSettings::load`].
pub const ENV_PREFIX: &str = "SEALEDSECRET";

/// Top-level provider settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderSettings {
    pub git: GitSettings,
    #[serde(default)]
    pub review: ReviewSettings,
    #[serde(default)]
    pub readiness: ReadinessSettings,
    #[serde(default)]
    pub log: LogSettings,
}

/// Repository settings.
#[derive(Clone, Deserialize)]
pub struct GitSettings {
    pub url: String,
    pub source_branch: String,
    #[serde(default = "default_target_branch")]
    pub target_branch: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_author_name")]
    pub author_name: String,
    #[serde(default = "default_author_email")]
    pub author_email: String,
    #[serde(default = "default_clone_timeout")]
    pub clone_timeout_secs: u64,
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_publish_policy")]
    pub publish_policy: ConflictPolicy,
    #[serde(default = "default_delete_policy")]
    pub delete_policy: ConflictPolicy,
}

/// Review request settings.
#[derive(Clone, Default, Deserialize)]
pub struct ReviewSettings {
    /// Open a merge request after every publish and delete.
    #[serde(default)]
    pub enabled: bool,
    /// API base such as `https://gitlab.example.com/api/v4`. Derived from
    /// the repository URL when unset.
    #[serde(default)]
    pub api_url: Option<String>,
    /// API token. Falls back to the Git token.
    #[serde(default)]
    pub token: Option<String>,
}

/// Deadlines for waiting on the sealing key.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessSettings {
    #[serde(default = "default_create_deadline")]
    pub create_deadline_secs: u64,
    #[serde(default = "default_read_deadline")]
    pub read_deadline_secs: u64,
    #[serde(default = "default_initial_interval")]
    pub initial_interval_ms: u64,
    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LogSettings {
    /// Default `EnvFilter` directives; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_target_branch() -> String {
    "main".to_string()
}

fn default_author_name() -> String {
    "SEALEDSECRET-PROVIDER".to_string()
}

fn default_author_email() -> String {
    "sealedsecret-provider@localhost".to_string()
}

fn default_clone_timeout() -> u64 {
    120
}

fn default_sync_timeout() -> u64 {
    60
}

fn default_publish_policy() -> ConflictPolicy {
    ConflictPolicy::ForceOverwrite
}

fn default_delete_policy() -> ConflictPolicy {
    ConflictPolicy::RejectOnDivergence
}

fn default_create_deadline() -> u64 {
    180
}

fn default_read_deadline() -> u64 {
    60
}

fn default_initial_interval() -> u64 {
    500
}

fn default_max_interval() -> u64 {
    10
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for ReadinessSettings {
    fn default() -> Self {
        Self {
            create_deadline_secs: default_create_deadline(),
            read_deadline_secs: default_read_deadline(),
            initial_interval_ms: default_initial_interval(),
            max_interval_secs: default_max_interval(),
        }
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

impl ProviderSettings {
    /// Loads settings from `path` (if given) and the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ProviderError> {
        Self::load_with(path, environment())
    }

    /// Loads settings from `path` (if given) and an explicit environment
    /// source.
    pub fn load_with(path: Option<&Path>, env: Environment) -> Result<Self, ProviderError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        let settings: Self = builder.add_source(env).build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<(), ProviderError> {
        if self.review.enabled && self.review_token().is_none() {
            return Err(ProviderError::InvalidSettings(
                "review.enabled requires review.token or git.token".to_string(),
            ));
        }
        if self.readiness.create_deadline_secs == 0 || self.readiness.read_deadline_secs == 0 {
            return Err(ProviderError::InvalidSettings(
                "readiness deadlines must be at least one second".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the token used for review requests.
    pub fn review_token(&self) -> Option<&str> {
        self.review
            .token
            .as_deref()
            .or(self.git.token.as_deref())
    }
}

/// The environment source for [`ENV_PREFIX`]: `SEALEDSECRET_GIT__URL` maps to
/// `git.url`.
pub fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl GitSettings {
    /// Builds the repository session configuration.
    pub fn to_session_config(&self) -> Result<SessionConfig, ProviderError> {
        let mut builder = SessionConfig::builder()
            .url(&self.url)
            .source_branch(&self.source_branch)
            .target_branch(&self.target_branch)
            .author(&self.author_name, &self.author_email)
            .clone_timeout(Duration::from_secs(self.clone_timeout_secs))
            .sync_timeout(Duration::from_secs(self.sync_timeout_secs))
            .publish_policy(self.publish_policy)
            .delete_policy(self.delete_policy);

        if let Some(token) = &self.token {
            let username = self.username.as_deref().unwrap_or("oauth2");
            builder = builder.basic_auth(username, token);
        }

        builder
            .build()
            .map_err(|e| ProviderError::InvalidSettings(e.to_string()))
    }
}

impl std::fmt::Debug for GitSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitSettings")
            .field("url", &self.url)
            .field("source_branch", &self.source_branch)
            .field("target_branch", &self.target_branch)
            .field("username", &self.username)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("publish_policy", &self.publish_policy)
            .field("delete_policy", &self.delete_policy)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for ReviewSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReviewSettings")
            .field("enabled", &self.enabled)
            .field("api_url", &self.api_url)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ReadinessSettings {
    /// Poller used while creating a secret.
    pub fn create_poller(&self) -> ReadinessPoller {
        self.poller(self.create_deadline_secs)
    }

    /// Poller used while reading a secret back.
    pub fn read_poller(&self) -> ReadinessPoller {
        self.poller(self.read_deadline_secs)
    }

    fn poller(&self, deadline_secs: u64) -> ReadinessPoller {
        ReadinessPoller::builder()
            .deadline(Duration::from_secs(deadline_secs))
            .initial_interval(Duration::from_millis(self.initial_interval_ms))
            .max_interval(Duration::from_secs(self.max_interval_secs))
            .build()
    }
}
