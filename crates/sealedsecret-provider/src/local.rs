//! Sealing without a repository: the document is handed back to the caller.

use std::sync::Arc;
use std::time::Duration;

use sealedsecret_core::{
    PublicKey, PublicKeyResolver, ReadinessPoller, SealedSecretDocument, Sealer, SecretManifest,
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ProviderError;
use crate::settings::ReadinessSettings;

/// A sealed document kept by the caller instead of being published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSecret {
    /// The sealed document, fingerprint annotation included.
    pub yaml_content: Vec<u8>,
    /// Fingerprint of the key the secret was sealed with.
    pub key_fingerprint: String,
}

/// Seals secrets with the current key and returns the YAML.
pub struct LocalSealer {
    sealer: Arc<dyn Sealer>,
    resolver: Arc<dyn PublicKeyResolver>,
    poller: ReadinessPoller,
}

impl LocalSealer {
    /// Creates a sealer that waits up to a minute for the key service.
    pub fn new(sealer: Arc<dyn Sealer>, resolver: Arc<dyn PublicKeyResolver>) -> Self {
        Self {
            sealer,
            resolver,
            poller: ReadinessPoller::new(Duration::from_secs(60)),
        }
    }

    /// Creates a sealer that waits as long as a read would.
    pub fn from_settings(
        settings: &ReadinessSettings,
        sealer: Arc<dyn Sealer>,
        resolver: Arc<dyn PublicKeyResolver>,
    ) -> Self {
        Self::new(sealer, resolver).with_poller(settings.read_poller())
    }

    /// Replaces the key poller.
    pub fn with_poller(mut self, poller: ReadinessPoller) -> Self {
        self.poller = poller;
        self
    }

    /// Seals `secret` and stamps the key fingerprint into the document.
    ///
    /// Nothing is written anywhere; the caller stores the result.
    pub async fn seal_local(
        &self,
        secret: &SecretManifest,
        cancel: &CancellationToken,
    ) -> Result<LocalSecret, ProviderError> {
        secret.validate()?;
        debug!("Sealing {}/{} locally", secret.namespace, secret.name);

        let key = self
            .poller
            .resolve_key(self.resolver.as_ref(), cancel)
            .await?;
        let (yaml_content, key_fingerprint) = seal_stamped(self.sealer.as_ref(), secret, &key)?;

        Ok(LocalSecret {
            yaml_content,
            key_fingerprint,
        })
    }
}

impl std::fmt::Debug for LocalSealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalSealer")
            .field("deadline", &self.poller.deadline())
            .finish_non_exhaustive()
    }
}

/// Seals `secret` with `key` and records the key fingerprint in the
/// document. Returns the YAML and the fingerprint.
pub(crate) fn seal_stamped(
    sealer: &dyn Sealer,
    secret: &SecretManifest,
    key: &PublicKey,
) -> Result<(Vec<u8>, String), ProviderError> {
    let fingerprint = key.fingerprint();
    let sealed = sealer.seal(secret, key)?;
    let mut document = SealedSecretDocument::from_yaml(&sealed)?;
    document.set_key_fingerprint(fingerprint.clone());
    Ok((document.to_yaml()?, fingerprint))
}
