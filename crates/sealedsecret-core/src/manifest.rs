//! The `SealedSecret` document persisted in the repository.
//!
//! Only the fields the provider needs are modelled. Everything else a sealer
//! emits is kept in the `extra` maps so a parse/serialize cycle does not drop
//! it.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::ManifestError;
use crate::secret::SecretManifest;

/// Annotation carrying the fingerprint of the key the document was sealed with.
pub const KEY_FINGERPRINT_ANNOTATION: &str = "sealedsecret-provider/public-key-hash";

const API_VERSION: &str = "bitnami.com/v1alpha1";
const KIND: &str = "SealedSecret";

fn default_api_version() -> String {
    API_VERSION.to_string()
}

fn default_kind() -> String {
    KIND.to_string()
}

/// A sealed secret as stored in Git.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecretDocument {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    pub spec: SealedSecretSpec,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// Object metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub annotations: IndexMap<String, String>,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// The `spec` block: encrypted values keyed by their original field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedSecretSpec {
    #[serde(default)]
    pub encrypted_data: IndexMap<String, String>,
    #[serde(default)]
    pub template: SecretTemplate,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// Template of the secret the controller will materialise.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretTemplate {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub secret_type: Option<String>,
    #[serde(default)]
    pub metadata: TemplateMeta,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

/// Name and namespace of the target secret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(flatten)]
    pub extra: IndexMap<String, serde_yaml::Value>,
}

impl SealedSecretDocument {
    /// Builds a document for `secret` from already encrypted values.
    pub fn new(secret: &SecretManifest, encrypted_data: IndexMap<String, String>) -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta {
                name: secret.name.clone(),
                namespace: secret.namespace.clone(),
                ..Default::default()
            },
            spec: SealedSecretSpec {
                encrypted_data,
                template: SecretTemplate {
                    secret_type: Some(secret.secret_type.clone()),
                    metadata: TemplateMeta {
                        name: secret.name.clone(),
                        namespace: secret.namespace.clone(),
                        extra: IndexMap::new(),
                    },
                    extra: IndexMap::new(),
                },
                extra: IndexMap::new(),
            },
            extra: IndexMap::new(),
        }
    }

    /// Parses a document from YAML bytes.
    pub fn from_yaml(bytes: &[u8]) -> Result<Self, ManifestError> {
        let doc: Self = serde_yaml::from_slice(bytes).map_err(ManifestError::Parse)?;
        if doc.name().is_empty() {
            return Err(ManifestError::MissingField {
                field: "metadata.name",
            });
        }
        Ok(doc)
    }

    /// Serializes the document to YAML bytes.
    pub fn to_yaml(&self) -> Result<Vec<u8>, ManifestError> {
        serde_yaml::to_string(self)
            .map(String::into_bytes)
            .map_err(ManifestError::Serialize)
    }

    /// Returns the target secret name.
    pub fn name(&self) -> &str {
        non_empty_or(&self.spec.template.metadata.name, &self.metadata.name)
    }

    /// Returns the target namespace.
    pub fn namespace(&self) -> &str {
        non_empty_or(
            &self.spec.template.metadata.namespace,
            &self.metadata.namespace,
        )
    }

    /// Returns the target secret type (`Opaque` when the template omits it).
    pub fn secret_type(&self) -> &str {
        self.spec
            .template
            .secret_type
            .as_deref()
            .unwrap_or("Opaque")
    }

    /// Returns the fingerprint of the key this document was sealed with.
    pub fn key_fingerprint(&self) -> Option<&str> {
        self.metadata
            .annotations
            .get(KEY_FINGERPRINT_ANNOTATION)
            .map(String::as_str)
    }

    /// Records the fingerprint of the sealing key.
    pub fn set_key_fingerprint(&mut self, fingerprint: impl Into<String>) {
        self.metadata
            .annotations
            .insert(KEY_FINGERPRINT_ANNOTATION.to_string(), fingerprint.into());
    }

    /// Returns the names of the encrypted fields.
    pub fn encrypted_keys(&self) -> impl Iterator<Item = &str> {
        self.spec.encrypted_data.keys().map(String::as_str)
    }
}

fn non_empty_or<'a>(preferred: &'a str, fallback: &'a str) -> &'a str {
    if preferred.is_empty() {
        fallback
    } else {
        preferred
    }
}
