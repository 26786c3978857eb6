//! Plaintext secret input and the sealing collaborator.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, SealError};
use crate::key::PublicKey;

fn default_secret_type() -> String {
    "Opaque".to_string()
}

/// The structured secret handed to a [`Sealer`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretManifest {
    /// Secret name.
    pub name: String,
    /// Target namespace.
    pub namespace: String,
    /// Secret type, `Opaque` unless stated otherwise.
    #[serde(rename = "type", default = "default_secret_type")]
    pub secret_type: String,
    /// Values that will be base64 encoded by the sealer.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub data: IndexMap<String, String>,
    /// Values stored as plain strings.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub string_data: IndexMap<String, String>,
}

impl SecretManifest {
    /// Creates an Opaque secret with no data.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            secret_type: default_secret_type(),
            data: IndexMap::new(),
            string_data: IndexMap::new(),
        }
    }

    /// Sets the secret type.
    pub fn with_type(mut self, secret_type: impl Into<String>) -> Self {
        self.secret_type = secret_type.into();
        self
    }

    /// Adds a `data` entry.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Adds a `stringData` entry.
    pub fn with_string_data(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_data.insert(key.into(), value.into());
        self
    }

    /// Checks that the secret can be addressed in a cluster.
    pub fn validate(&self) -> Result<(), ManifestError> {
        if self.name.trim().is_empty() {
            return Err(ManifestError::invalid_secret(&self.name, "name cannot be empty"));
        }
        if self.namespace.trim().is_empty() {
            return Err(ManifestError::invalid_secret(
                &self.name,
                "namespace cannot be empty",
            ));
        }
        if self.secret_type.trim().is_empty() {
            return Err(ManifestError::invalid_secret(&self.name, "type cannot be empty"));
        }
        Ok(())
    }
}

/// Encrypts a secret for a specific controller key.
///
/// The output is the encoded `SealedSecret` document. It is treated as opaque
/// bytes apart from stamping the key fingerprint annotation on it.
pub trait Sealer: Send + Sync {
    /// Seals `secret` with `key`.
    fn seal(&self, secret: &SecretManifest, key: &PublicKey) -> Result<Vec<u8>, SealError>;
}
