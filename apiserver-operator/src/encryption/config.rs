use crate::{Error, Result};
use k8s_openapi::api::core::v1::Secret;
use kube_core::ResourceExt;
use serde::{Deserialize, Serialize};

/// Key of the encryption configuration inside its secret
pub const ENCRYPTION_CONFIG_KEY: &str = "encryption-config";

/// `apiserver.config.k8s.io/v1 EncryptionConfiguration`, as mounted into the operand
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfiguration {
    /// Always `EncryptionConfiguration`
    #[serde(default)]
    pub kind: String,
    /// Always `apiserver.config.k8s.io/v1`
    #[serde(default)]
    pub api_version: String,
    /// Provider chains per group of resources
    #[serde(default)]
    pub resources: Vec<ResourceConfiguration>,
}

/// The providers used for a set of resources, first one writes
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfiguration {
    /// Resources like `secrets` or `routes.route.openshift.io`
    pub resources: Vec<String>,
    /// Providers in order of preference
    #[serde(default)]
    pub providers: Vec<ProviderConfiguration>,
}

/// One provider; exactly one of the fields is set
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfiguration {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aescbc: Option<KeysConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aesgcm: Option<KeysConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secretbox: Option<KeysConfiguration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity: Option<IdentityConfiguration>,
}

/// Keys of a symmetric provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfiguration {
    /// Keys in order of preference
    pub keys: Vec<Key>,
}

/// A named key
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Key id
    pub name: String,
    /// Base64 encoded key material
    pub secret: String,
}

/// The `identity` (no encryption) provider
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfiguration {}

/// Decodes the configuration stored under [`ENCRYPTION_CONFIG_KEY`] in `secret`
///
/// Both JSON and YAML encodings are accepted.
pub fn decode(secret: &Secret) -> Result<EncryptionConfiguration> {
    let invalid = |reason: String| Error::InvalidEncryptionConfig {
        namespace: secret.namespace().unwrap_or_default(),
        name: secret.name_any(),
        reason,
    };
    let raw = secret
        .data
        .as_ref()
        .and_then(|data| data.get(ENCRYPTION_CONFIG_KEY))
        .ok_or_else(|| invalid(format!("missing key {ENCRYPTION_CONFIG_KEY:?}")))?;
    serde_yaml::from_slice(&raw.0).map_err(|err| invalid(err.to_string()))
}

#[cfg(test)]
pub(crate) fn encryption_secret(namespace: &str, name: &str, resources: &[&str], key: &str) -> Secret {
    use k8s_openapi::{apimachinery::pkg::apis::meta::v1::ObjectMeta, ByteString};

    let config = serde_json::json!({
        "kind": "EncryptionConfiguration",
        "apiVersion": "apiserver.config.k8s.io/v1",
        "resources": [{
            "resources": resources,
            "providers": [{"aescbc": {"keys": [{"name": "1", "secret": key}]}}, {"identity": {}}],
        }],
    });
    Secret {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            ..ObjectMeta::default()
        },
        data: Some([(ENCRYPTION_CONFIG_KEY.to_string(), ByteString(config.to_string().into_bytes()))].into()),
        ..Secret::default()
    }
}
