//! Sealed secret lifecycle: seal, publish, read back and remove.

use std::sync::Arc;

use sealedsecret_core::{
    PublicKeyResolver, ReadinessPoller, SealedSecretDocument, Sealer, SecretManifest,
};
use sealedsecret_git::{
    CommitInfo, GitLabClient, RepositorySession, ReviewSubmitter, SubmitOutcome,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::ProviderError;
use crate::local::seal_stamped;
use crate::settings::ProviderSettings;

/// A secret and the repository path it is published under.
#[derive(Debug, Clone)]
pub struct SecretResource {
    pub path: String,
    pub secret: SecretManifest,
}

impl SecretResource {
    /// Creates a new resource.
    pub fn new(path: impl Into<String>, secret: SecretManifest) -> Self {
        Self {
            path: path.into(),
            secret,
        }
    }
}

/// Result of a create or update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedSecret {
    pub path: String,
    /// Fingerprint of the key the secret was sealed with.
    pub key_fingerprint: String,
    pub commit: CommitInfo,
    /// Set when review requests are enabled.
    pub review: Option<SubmitOutcome>,
}

/// What a read found in the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// The file is gone; the caller should forget or recreate the resource.
    Absent,
    /// The file is present.
    Present(SecretState),
}

/// The published state of a secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretState {
    pub name: String,
    pub namespace: String,
    pub secret_type: String,
    pub encrypted_keys: Vec<String>,
    /// Fingerprint recorded in the document, if any.
    pub key_fingerprint: Option<String>,
    /// True when the secret was sealed with a key other than the current one.
    pub rotated: bool,
}

/// Seals secrets and publishes them through a shared repository session.
pub struct SecretPublisher {
    session: RepositorySession,
    sealer: Arc<dyn Sealer>,
    resolver: Arc<dyn PublicKeyResolver>,
    review: Option<ReviewSubmitter>,
    create_poller: ReadinessPoller,
    read_poller: ReadinessPoller,
}

impl SecretPublisher {
    /// Creates a publisher with default key deadlines and no review requests.
    pub fn new(
        session: RepositorySession,
        sealer: Arc<dyn Sealer>,
        resolver: Arc<dyn PublicKeyResolver>,
    ) -> Self {
        Self {
            session,
            sealer,
            resolver,
            review: None,
            create_poller: ReadinessPoller::new(std::time::Duration::from_secs(180)),
            read_poller: ReadinessPoller::new(std::time::Duration::from_secs(60)),
        }
    }

    /// Opens the repository session described by `settings` and builds a
    /// publisher around it.
    pub async fn from_settings(
        settings: &ProviderSettings,
        sealer: Arc<dyn Sealer>,
        resolver: Arc<dyn PublicKeyResolver>,
        cancel: &CancellationToken,
    ) -> Result<Self, ProviderError> {
        let config = settings.git.to_session_config()?;
        let session = RepositorySession::open(config, cancel)
            .await
            .map_err(|e| ProviderError::session("open", &settings.git.url, e))?;

        let mut publisher = Self::new(session, sealer, resolver).with_pollers(
            settings.readiness.create_poller(),
            settings.readiness.read_poller(),
        );

        if settings.review.enabled {
            let token = settings.review_token().ok_or_else(|| {
                ProviderError::InvalidSettings("review requests need a token".to_string())
            })?;
            let client = match &settings.review.api_url {
                Some(api_url) => {
                    let base = Url::parse(api_url).map_err(|e| {
                        ProviderError::InvalidSettings(format!("review.api_url: {}", e))
                    })?;
                    GitLabClient::new(base, token)
                },
                None => GitLabClient::for_repository(&settings.git.url, token),
            }
            .map_err(|e| ProviderError::InvalidSettings(e.to_string()))?;

            publisher = publisher.with_review(ReviewSubmitter::new(Arc::new(client)));
        }

        Ok(publisher)
    }

    /// Requests review after every change.
    pub fn with_review(mut self, review: ReviewSubmitter) -> Self {
        self.review = Some(review);
        self
    }

    /// Replaces the key pollers used by create and read.
    pub fn with_pollers(mut self, create: ReadinessPoller, read: ReadinessPoller) -> Self {
        self.create_poller = create;
        self.read_poller = read;
        self
    }

    /// Returns the repository session.
    pub fn session(&self) -> &RepositorySession {
        &self.session
    }

    /// Seals the secret with the current key and publishes it.
    ///
    /// Waits up to the create deadline for the key service to come up.
    pub async fn create(
        &self,
        resource: &SecretResource,
        cancel: &CancellationToken,
    ) -> Result<PublishedSecret, ProviderError> {
        resource.secret.validate()?;

        let key = self
            .create_poller
            .resolve_key(self.resolver.as_ref(), cancel)
            .await?;
        let (content, fingerprint) = seal_stamped(self.sealer.as_ref(), &resource.secret, &key)?;

        let commit = self
            .session
            .publish(&resource.path, content, cancel)
            .await
            .map_err(|e| ProviderError::session("publish", &resource.path, e))?;
        info!(
            "Published {}/{} to {}",
            resource.secret.namespace, resource.secret.name, resource.path
        );

        let review = self.request_review().await?;

        Ok(PublishedSecret {
            path: resource.path.clone(),
            key_fingerprint: fingerprint,
            commit,
            review,
        })
    }

    /// Reseals and republishes the secret, replacing the previous content.
    pub async fn update(
        &self,
        resource: &SecretResource,
        cancel: &CancellationToken,
    ) -> Result<PublishedSecret, ProviderError> {
        self.create(resource, cancel).await
    }

    /// Reads the published secret back.
    ///
    /// `known_fingerprint` is the fingerprint the caller recorded at create
    /// time; the one stored in the document is used when it is `None`.
    pub async fn read(
        &self,
        path: &str,
        known_fingerprint: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome, ProviderError> {
        let content = match self.session.read(path).await {
            Ok(content) => content,
            Err(e) if e.is_not_found() => {
                debug!("{} is no longer in the repository", path);
                return Ok(ReadOutcome::Absent);
            },
            Err(e) => return Err(ProviderError::session("read", path, e)),
        };
        let document = SealedSecretDocument::from_yaml(&content)?;

        let current = self
            .read_poller
            .resolve_key(self.resolver.as_ref(), cancel)
            .await?
            .fingerprint();
        let sealed_with = known_fingerprint.or(document.key_fingerprint());
        let rotated = sealed_with.is_some_and(|fingerprint| fingerprint != current);
        if rotated {
            info!("Sealing key changed since {} was published", path);
        }

        Ok(ReadOutcome::Present(SecretState {
            name: document.name().to_string(),
            namespace: document.namespace().to_string(),
            secret_type: document.secret_type().to_string(),
            encrypted_keys: document.encrypted_keys().map(str::to_string).collect(),
            key_fingerprint: document.key_fingerprint().map(str::to_string),
            rotated,
        }))
    }

    /// Removes the published secret and requests review.
    ///
    /// Returns `None` when the file was already gone. Review is requested in
    /// that case too, since an earlier removal may not have reached it.
    pub async fn delete(
        &self,
        path: &str,
        cancel: &CancellationToken,
    ) -> Result<Option<CommitInfo>, ProviderError> {
        let commit = match self.session.delete(path, cancel).await {
            Ok(commit) => {
                info!("Removed {}", path);
                Some(commit)
            },
            Err(e) if e.is_not_found() => {
                debug!("{} already removed", path);
                None
            },
            Err(e) => return Err(ProviderError::session("delete", path, e)),
        };

        self.request_review().await?;
        Ok(commit)
    }

    async fn request_review(&self) -> Result<Option<SubmitOutcome>, ProviderError> {
        let Some(review) = &self.review else {
            return Ok(None);
        };

        let source = self.session.source_branch();
        let outcome = review
            .submit(self.session.url(), source, self.session.target_branch())
            .await
            .map_err(|source_err| ProviderError::Review {
                branch: source.to_string(),
                source: source_err,
            })?;
        Ok(Some(outcome))
    }
}

impl std::fmt::Debug for SecretPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretPublisher")
            .field("session", &self.session)
            .field("review", &self.review.is_some())
            .finish_non_exhaustive()
    }
}
